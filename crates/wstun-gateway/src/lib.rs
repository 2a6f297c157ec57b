//! wstun-gateway: central relay routing between providers and clients.

mod routing;
mod server;

pub use server::Gateway;
