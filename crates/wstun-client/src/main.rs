//! wstun-client: offers a local TCP endpoint that tunnels to a named
//! provider's real endpoint through the gateway.

use clap::Parser;
use std::path::PathBuf;
use tracing::error;
use wstun_core::ConfigFile;

/// wstun-client — local tunnel endpoint
#[derive(Parser, Debug)]
#[command(name = "wstun-client", version, about = "wstun client")]
struct Cli {
    /// Config file path (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Provider to tunnel to (overrides provider.name)
    #[arg(long)]
    provider_name: Option<String>,

    /// Gateway WebSocket URL (overrides gateway.url)
    #[arg(long)]
    gateway_url: Option<String>,

    /// Shared secret (overrides gateway.password)
    #[arg(long)]
    gateway_password: Option<String>,

    /// Local listen port (overrides client.port)
    #[arg(short, long)]
    port: Option<u16>,

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

    let config = match file.client(
        cli.provider_name.as_deref(),
        cli.gateway_url.as_deref(),
        cli.gateway_password.as_deref(),
        cli.port,
    ) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = wstun_client::run(config).await {
        error!(error = %e, "client error");
        std::process::exit(1);
    }
}
