use thiserror::Error;

/// Errors produced by the wstun protocol layer.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown frame tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("key already registered: {0}")]
    DuplicateKey(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
