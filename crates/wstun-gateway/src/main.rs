//! wstun-gateway: central relay for the wstun reverse tunnel.
//!
//! Accepts WebSocket connections from providers (`/p/<name>`) and
//! clients (`/c/<name>`), authenticates them against a shared secret,
//! and relays opaque frames between the two sides.

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{error, info};
use wstun_core::ConfigFile;
use wstun_gateway::Gateway;

/// wstun-gateway — reverse-tunnel relay
#[derive(Parser, Debug)]
#[command(name = "wstun-gateway", version, about = "wstun reverse-tunnel gateway")]
struct Cli {
    /// Config file path (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port (overrides gateway.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Shared secret (overrides gateway.password)
    #[arg(long)]
    password: Option<String>,

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

    let config = match file.gateway(cli.port, cli.password.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind((cli.bind.as_str(), config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %cli.bind, port = config.port, error = %e, "cannot bind listener");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %cli.bind,
        port = config.port,
        "starting wstun-gateway"
    );

    let gateway = Gateway::new(config);

    tokio::select! {
        result = gateway.run(listener) => {
            if let Err(e) = result {
                error!(error = %e, "gateway error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("wstun-gateway stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
