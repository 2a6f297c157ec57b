//! wstun-provider: registers a name with the gateway and bridges
//! tunneled streams to real TCP endpoints.

use clap::Parser;
use std::path::PathBuf;
use tracing::error;
use wstun_core::ConfigFile;

/// wstun-provider — expose a TCP endpoint through the gateway
#[derive(Parser, Debug)]
#[command(name = "wstun-provider", version, about = "wstun provider")]
struct Cli {
    /// Config file path (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name of this provider (overrides provider.name)
    #[arg(long)]
    provider_name: Option<String>,

    /// Gateway WebSocket URL (overrides gateway.url)
    #[arg(long)]
    gateway_url: Option<String>,

    /// Shared secret (overrides gateway.password)
    #[arg(long)]
    gateway_password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => match ConfigFile::load(path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        None => ConfigFile::default(),
    };

    let level = cli.log_level.as_deref().unwrap_or(&file.log.level);
    if let Err(e) = wstun_core::log::init(level, file.log.file.as_deref()) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let config = match file.provider(
        cli.provider_name.as_deref(),
        cli.gateway_url.as_deref(),
        cli.gateway_password.as_deref(),
    ) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = wstun_provider::run(config).await {
        error!(error = %e, "provider error");
        std::process::exit(1);
    }
}
