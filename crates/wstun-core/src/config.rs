//! Configuration: TOML file + CLI overrides.
//!
//! One file format is shared by all three tools; each resolver method
//! validates only the fields its role needs and fails fast naming the
//! first missing or malformed field. Binaries exit non-zero on a
//! resolver error before any networking starts.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, TunnelError};

/// Top-level config file structure. Every section is optional in the
/// file; requiredness is decided per role at resolve time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub log: LogSection,
}

/// `[gateway]` section: where the gateway listens / where peers dial in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaySection {
    pub url: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
}

/// `[provider]` section: the provider's registered name and the real
/// endpoint clients tunnel to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSection {
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
}

/// `[client]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientSection {
    pub port: Option<u16>,
}

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub password: String,
}

/// Resolved provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub gateway_url: String,
    pub password: String,
}

/// Resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub provider_name: String,
    pub gateway_url: String,
    pub password: String,
    pub remote_host: String,
    pub remote_port: u16,
    pub local_port: u16,
}

impl ConfigFile {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| TunnelError::Config(format!("{}: {e}", path.display())))
    }

    /// Resolve the gateway role config. CLI overrides win over the file.
    pub fn gateway(
        &self,
        cli_port: Option<u16>,
        cli_password: Option<&str>,
    ) -> Result<GatewayConfig> {
        Ok(GatewayConfig {
            port: cli_port
                .or(self.gateway.port)
                .ok_or_else(|| missing("gateway.port"))?,
            password: override_or(cli_password, &self.gateway.password, "gateway.password")?,
        })
    }

    /// Resolve the provider role config.
    pub fn provider(
        &self,
        cli_name: Option<&str>,
        cli_url: Option<&str>,
        cli_password: Option<&str>,
    ) -> Result<ProviderConfig> {
        Ok(ProviderConfig {
            name: override_or(cli_name, &self.provider.name, "provider.name")?,
            gateway_url: gateway_url(cli_url, &self.gateway.url)?,
            password: override_or(cli_password, &self.gateway.password, "gateway.password")?,
        })
    }

    /// Resolve the client role config. The client addresses a provider
    /// by name and tells it which real endpoint to open.
    pub fn client(
        &self,
        cli_name: Option<&str>,
        cli_url: Option<&str>,
        cli_password: Option<&str>,
        cli_local_port: Option<u16>,
    ) -> Result<ClientConfig> {
        Ok(ClientConfig {
            provider_name: override_or(cli_name, &self.provider.name, "provider.name")?,
            gateway_url: gateway_url(cli_url, &self.gateway.url)?,
            password: override_or(cli_password, &self.gateway.password, "gateway.password")?,
            remote_host: self
                .provider
                .hostname
                .clone()
                .ok_or_else(|| missing("provider.hostname"))?,
            remote_port: self
                .provider
                .port
                .ok_or_else(|| missing("provider.port"))?,
            local_port: cli_local_port
                .or(self.client.port)
                .ok_or_else(|| missing("client.port"))?,
        })
    }
}

/// Join the gateway base URL with a role path and provider name,
/// tolerating a trailing slash on the base.
pub fn join_gateway_url(base: &str, role: &str, provider_name: &str) -> String {
    let base = base.strip_suffix('/').unwrap_or(base);
    format!("{base}/{role}/{provider_name}")
}

fn gateway_url(cli: Option<&str>, file: &Option<String>) -> Result<String> {
    let url = override_or(cli, file, "gateway.url")?;
    if !url.starts_with("ws") {
        return Err(TunnelError::Config(format!(
            "invalid value for gateway.url: \"{url}\" must start with \"ws\""
        )));
    }
    Ok(url)
}

fn override_or(cli: Option<&str>, file: &Option<String>, field: &str) -> Result<String> {
    cli.map(|s| s.to_string())
        .or_else(|| file.clone())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing(field))
}

fn missing(field: &str) -> TunnelError {
    TunnelError::Config(format!("missing required field {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
[gateway]
url = "ws://gw.example:8765"
port = 8765
password = "s3cret"

[provider]
name = "provider-1"
hostname = "127.0.0.1"
port = 5432

[client]
port = 9000

[log]
level = "debug"
"#;

    #[test]
    fn loads_full_file_and_resolves_all_roles() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let cfg = ConfigFile::load(file.path()).unwrap();

        let gw = cfg.gateway(None, None).unwrap();
        assert_eq!(gw.port, 8765);
        assert_eq!(gw.password, "s3cret");

        let provider = cfg.provider(None, None, None).unwrap();
        assert_eq!(provider.name, "provider-1");
        assert_eq!(provider.gateway_url, "ws://gw.example:8765");

        let client = cfg.client(None, None, None, None).unwrap();
        assert_eq!(client.remote_host, "127.0.0.1");
        assert_eq!(client.remote_port, 5432);
        assert_eq!(client.local_port, 9000);
        assert_eq!(cfg.log.level, "debug");
    }

    #[test]
    fn cli_overrides_win() {
        let cfg: ConfigFile = toml::from_str(FULL).unwrap();
        let gw = cfg.gateway(Some(1234), Some("other")).unwrap();
        assert_eq!(gw.port, 1234);
        assert_eq!(gw.password, "other");
    }

    #[test]
    fn missing_field_is_named() {
        let cfg = ConfigFile::default();
        let err = cfg.gateway(Some(1), None).unwrap_err();
        assert!(err.to_string().contains("gateway.password"));
    }

    #[test]
    fn url_must_be_websocket() {
        let cfg: ConfigFile = toml::from_str(FULL).unwrap();
        let err = cfg
            .provider(None, Some("http://gw.example"), None)
            .unwrap_err();
        assert!(err.to_string().contains("gateway.url"));
    }

    #[test]
    fn missing_file_fails() {
        assert!(ConfigFile::load(Path::new("/nonexistent/wstun.toml")).is_err());
    }

    #[test]
    fn url_join_tolerates_trailing_slash() {
        assert_eq!(
            join_gateway_url("ws://gw:1/", "c", "p1"),
            "ws://gw:1/c/p1"
        );
        assert_eq!(
            join_gateway_url("ws://gw:1", "p", "p1"),
            "ws://gw:1/p/p1"
        );
    }
}
