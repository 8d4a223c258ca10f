use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Process-level configuration, read once at startup from `config.toml`.
///
/// Provider credentials live in the hot-reloadable settings file instead,
/// see [`crate::settings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Provider settings file, rewritten when OAuth tokens are refreshed
    #[serde(default = "default_settings_path")]
    pub settings_path: String,

    /// Header carrying the authenticated user id, injected by the upstream proxy
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// How often the settings file is checked for changes
    #[serde(default = "default_settings_poll_secs")]
    pub settings_poll_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8088
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_settings_path() -> String {
    "settings.toml".to_string()
}

fn default_identity_header() -> String {
    "X-User-Id".to_string()
}

fn default_settings_poll_secs() -> u64 {
    10
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            settings_path: default_settings_path(),
            identity_header: default_identity_header(),
            settings_poll_secs: default_settings_poll_secs(),
        }
    }
}

impl BackendConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path))?;
        let config: BackendConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path))?;
        Ok(config)
    }

    /// Like [`BackendConfig::from_file`], but a missing file yields the defaults
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
