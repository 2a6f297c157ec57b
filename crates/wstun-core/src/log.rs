//! Logging setup shared by the three binaries.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, TunnelError};

/// Initialize the process-wide tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. With a file
/// path, output is appended there instead of stderr. Calling this more
/// than once is a no-op.
pub fn init(level: &str, file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(level)
            .map_err(|e| TunnelError::Config(format!("invalid value for log.level: {e}")))
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    TunnelError::Config(format!("cannot open log.file {}: {e}", path.display()))
                })?;
            let _ = builder.with_writer(Mutex::new(file)).try_init();
        }
        None => {
            let _ = builder.try_init();
        }
    }
    Ok(())
}
