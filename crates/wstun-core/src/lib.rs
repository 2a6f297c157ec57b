//! wstun-core: shared library for the wstun reverse-tunnel relay.
//!
//! Provides the binary wire codec (inner frames + provider envelopes),
//! the keyed queue registry that demultiplexes frames to logical
//! connections, the bidirectional connection pump, and the
//! configuration/logging plumbing used by all three binaries.

pub mod codec;
pub mod config;
pub mod error;
pub mod log;
pub mod pump;
pub mod registry;

// Re-export commonly used items at crate root.
pub use codec::{Envelope, Frame};
pub use config::{ClientConfig, ConfigFile, GatewayConfig, ProviderConfig};
pub use error::{Result, TunnelError};
pub use registry::{QueueMap, QueueReceiver, QueueSender};
