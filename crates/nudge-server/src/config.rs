//! Server configuration: TOML file + CLI overrides.

use crate::locator::StaticLocatorConf;
use nudge_core::{PushError, PushResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub locator: LocatorSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public hostname used in minted endpoint URLs and recorded as the
    /// UAID host binding.
    #[serde(default = "default_host")]
    pub host: String,
    /// Full base URL for minted endpoints. Defaults to `http://{host}:{port}`.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            endpoint_url: None,
        }
    }
}

/// `[locator]` section of the config TOML.
///
/// # TOML Example
///
/// ```toml
/// [locator]
/// name = "static"
///
/// [locator.static]
/// contacts = ["push-2.example.org:3000"]
/// bucket_size = 10
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LocatorSection {
    /// Which registered locator flavor to build.
    #[serde(default = "default_locator_name")]
    pub name: String,
    #[serde(rename = "static", default)]
    pub static_conf: StaticLocatorConf,
}

impl Default for LocatorSection {
    fn default() -> Self {
        Self {
            name: default_locator_name(),
            static_conf: StaticLocatorConf::default(),
        }
    }
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "localhost".to_owned()
}
fn default_locator_name() -> String {
    "static".to_owned()
}

/// Resolved server configuration (file values with CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the WebSocket listener binds.
    pub port: u16,
    /// Public hostname of this node.
    pub host: String,
    /// Base URL for minted endpoints.
    endpoint_url: Option<String>,
    /// Locator selection and settings.
    pub locator: LocatorSection,
}

impl ServerConfig {
    /// Load configuration from a TOML file, then apply CLI overrides.
    ///
    /// A missing file falls back to defaults silently; a file that exists
    /// but cannot be parsed is an error.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_host: Option<&str>,
    ) -> PushResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)
                    .map_err(|e| PushError::Other(format!("cannot read config: {e}")))?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| PushError::Other(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        let port = cli_port.unwrap_or(file_config.server.port);
        let host = cli_host
            .map(|s| s.to_owned())
            .unwrap_or(file_config.server.host);

        Ok(Self {
            port,
            host,
            endpoint_url: file_config.server.endpoint_url,
            locator: file_config.locator,
        })
    }

    /// Base URL under which push endpoints are minted.
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint_url {
            Some(url) => url.trim_end_matches('/').to_owned(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let config = ServerConfig::load(None, None, None).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.endpoint_url(), "http://localhost:8080");
        assert_eq!(config.locator.name, "static");
        assert_eq!(config.locator.static_conf.bucket_size, 10);
    }

    #[test]
    fn cli_overrides_win() {
        let config = ServerConfig::load(None, Some(9000), Some("push.example.org")).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "push.example.org");
        assert_eq!(config.endpoint_url(), "http://push.example.org:9000");
    }

    #[test]
    fn file_values_parse() {
        let raw = r#"
            [server]
            port = 3100
            host = "push-1.example.org"
            endpoint_url = "https://updates.example.org/"

            [locator]
            name = "static"

            [locator.static]
            contacts = ["push-2.example.org:3100", "push-3.example.org:3100"]
            bucket_size = 4
        "#;
        let file: ConfigFile = toml::from_str(raw).unwrap();
        assert_eq!(file.server.port, 3100);
        assert_eq!(file.locator.static_conf.contacts.len(), 2);
        assert_eq!(file.locator.static_conf.bucket_size, 4);

        let config = ServerConfig {
            port: file.server.port,
            host: file.server.host,
            endpoint_url: file.server.endpoint_url,
            locator: file.locator,
        };
        // Trailing slash is normalized away so minted URLs stay clean.
        assert_eq!(config.endpoint_url(), "https://updates.example.org");
    }

    #[test]
    fn missing_file_is_fine() {
        let config =
            ServerConfig::load(Some(Path::new("/nonexistent/nudge.toml")), None, None).unwrap();
        assert_eq!(config.port, 8080);
    }
}
