//! wstun-provider: exposes a reachable TCP endpoint through the
//! gateway under a chosen name.

mod provider;
mod tunnel;

pub use provider::run;
