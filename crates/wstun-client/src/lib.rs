//! wstun-client: local TCP endpoint tunneling to a named provider.

mod client;

pub use client::{run, serve};
