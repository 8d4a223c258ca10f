//! Provider settings snapshot and its store.
//!
//! The snapshot is immutable: every change (file edit, refreshed OAuth
//! tokens) builds a new [`Settings`] and swaps it in under the write lock.

use ailimits_common::ProviderId;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Cache TTL when no override is configured
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Public client id used by the Claude CLI for the refresh-token grant
const CLAUDE_OAUTH_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid settings in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write settings file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(
        deserialize_with = "numeric::positive_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub cache_ttl_secs: Option<u64>,
    pub access: AccessSettings,
    pub augment: AugmentSettings,
    pub zai: ZaiSettings,
    pub openai: OpenAiSettings,
    pub claude: ClaudeSettings,
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessSettings {
    /// Empty means everyone with an identity header is allowed
    pub allowed_user_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentSettings {
    pub enabled: bool,
    pub access_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZaiSettings {
    pub enabled: bool,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub enabled: bool,
    pub admin_key: String,
    #[serde(
        deserialize_with = "numeric::non_negative_amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub monthly_budget: Option<f64>,
    #[serde(
        deserialize_with = "numeric::non_negative_amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub credit_balance: Option<f64>,
    pub window: CostWindow,
}

/// Time range summed by the cost report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostWindow {
    #[default]
    #[serde(rename = "calendar_month")]
    CalendarMonth,
    #[serde(rename = "rolling_30d")]
    Rolling30d,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeSettings {
    pub enabled: bool,
    pub source: ClaudeSource,
    pub access_token: String,
    pub refresh_token: String,
    /// Model used for the one-token rate-limit request
    pub model: String,
    pub oauth_client_id: String,
}

impl Default for ClaudeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            source: ClaudeSource::default(),
            access_token: String::new(),
            refresh_token: String::new(),
            model: "claude-haiku-4-5".to_string(),
            oauth_client_id: CLAUDE_OAUTH_CLIENT_ID.to_string(),
        }
    }
}

/// How Claude rate-limit data reaches the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaudeSource {
    /// One-token request with the OAuth token, headers read from the response
    #[default]
    Oauth,
    /// External collector posts captured headers to the webhook
    Push,
}

/// Upstream base URLs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub augment: String,
    pub zai: String,
    pub openai: String,
    pub anthropic: String,
    pub anthropic_oauth: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            augment: "https://d2.api.augmentcode.com".to_string(),
            zai: "https://api.z.ai".to_string(),
            openai: "https://api.openai.com".to_string(),
            anthropic: "https://api.anthropic.com".to_string(),
            anthropic_oauth: "https://platform.claude.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Join a base URL and a path without doubling the slash
    pub fn join(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CACHE_TTL)
    }

    pub fn is_enabled(&self, id: ProviderId) -> bool {
        match id {
            ProviderId::Augment => self.augment.enabled,
            ProviderId::Zai => self.zai.enabled,
            ProviderId::OpenAi => self.openai.enabled,
            ProviderId::Claude => self.claude.enabled,
        }
    }

    pub async fn read_file(path: &Path) -> Result<Self, SettingsError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write to a sibling temp file, then rename over the target
    pub async fn write_file(&self, path: &Path) -> Result<(), SettingsError> {
        let content = toml::to_string_pretty(self)?;
        let tmp_path = path.with_extension("toml.tmp");
        let write_err = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        tokio::fs::write(&tmp_path, content).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
        Ok(())
    }
}

/// Holder of the current snapshot. Readers clone the `Arc`; writers swap it.
pub struct SettingsStore {
    current: RwLock<Arc<Settings>>,
    path: Option<PathBuf>,
    /// Held for the whole Claude refresh-token exchange
    token_refresh: Mutex<()>,
}

impl SettingsStore {
    /// Store that never touches the filesystem
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
            path: None,
            token_refresh: Mutex::new(()),
        }
    }

    /// Load the settings file; a missing file starts from defaults
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = if path.exists() {
            Settings::read_file(&path).await?
        } else {
            tracing::warn!(
                "Settings file {:?} not found, all providers start disabled",
                path
            );
            Settings::default()
        };

        Ok(Self {
            current: RwLock::new(Arc::new(settings)),
            path: Some(path),
            token_refresh: Mutex::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn snapshot(&self) -> Arc<Settings> {
        self.current.read().await.clone()
    }

    pub async fn replace(&self, settings: Settings) {
        *self.current.write().await = Arc::new(settings);
    }

    /// Serializes Claude token refreshes. Refresh tokens are single-use, so
    /// whoever waited here must re-read the snapshot before exchanging one.
    pub async fn lock_token_refresh(&self) -> MutexGuard<'_, ()> {
        self.token_refresh.lock().await
    }

    /// Swap in rotated Claude tokens and persist them.
    ///
    /// The in-memory snapshot is updated even if writing the file fails.
    pub async fn update_claude_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), SettingsError> {
        let next = {
            let mut current = self.current.write().await;
            let mut next = (**current).clone();
            next.claude.access_token = access_token.to_string();
            if let Some(refresh_token) = refresh_token.filter(|t| !t.is_empty()) {
                next.claude.refresh_token = refresh_token.to_string();
            }
            *current = Arc::new(next.clone());
            next
        };

        if let Some(path) = &self.path {
            next.write_file(path).await?;
            tracing::info!("Persisted refreshed Claude tokens to {:?}", path);
        }
        Ok(())
    }
}

/// Strict parsing for numeric overrides that hosts often store as strings
mod numeric {
    use super::*;
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Integer(i64),
        Float(f64),
        Text(String),
    }

    fn parse<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        match NumberOrText::deserialize(deserializer)? {
            NumberOrText::Integer(n) => Ok(Some(n as f64)),
            NumberOrText::Float(n) => Ok(Some(n)),
            NumberOrText::Text(s) if s.trim().is_empty() => Ok(None),
            NumberOrText::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid number {:?}", s))),
        }
    }

    pub fn positive_secs<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u64>, D::Error> {
        match parse(deserializer)? {
            None => Ok(None),
            Some(n) if n >= 1.0 && n.fract() == 0.0 => Ok(Some(n as u64)),
            Some(n) => Err(D::Error::custom(format!(
                "expected a whole number of seconds >= 1, got {}",
                n
            ))),
        }
    }

    pub fn non_negative_amount<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<f64>, D::Error> {
        match parse(deserializer)? {
            Some(n) if n < 0.0 => Err(D::Error::custom(format!(
                "expected a non-negative amount, got {}",
                n
            ))),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings_disable_everything() {
        let settings = Settings::from_toml_str("").unwrap();
        for id in ProviderId::ALL {
            assert!(!settings.is_enabled(id));
        }
        assert_eq!(settings.cache_ttl(), DEFAULT_CACHE_TTL);
        assert_eq!(settings.endpoints, Endpoints::default());
        assert_eq!(settings.claude.model, "claude-haiku-4-5");
    }

    #[test]
    fn test_numeric_overrides_accept_strings_and_numbers() {
        let settings = Settings::from_toml_str(
            r#"
            cache_ttl_secs = "120"

            [openai]
            enabled = true
            admin_key = "sk-admin"
            monthly_budget = 100
            credit_balance = " 250.50 "
            window = "rolling_30d"
            "#,
        )
        .unwrap();

        assert_eq!(settings.cache_ttl(), Duration::from_secs(120));
        assert_eq!(settings.openai.monthly_budget, Some(100.0));
        assert_eq!(settings.openai.credit_balance, Some(250.5));
        assert_eq!(settings.openai.window, CostWindow::Rolling30d);
    }

    #[test]
    fn test_empty_string_override_means_unset() {
        let settings = Settings::from_toml_str(
            r#"
            cache_ttl_secs = ""
            [openai]
            monthly_budget = ""
            "#,
        )
        .unwrap();
        assert_eq!(settings.cache_ttl_secs, None);
        assert_eq!(settings.openai.monthly_budget, None);
    }

    #[test]
    fn test_malformed_ttl_is_rejected() {
        for bad in [r#""30x""#, r#""abc""#, "0", "-5", "1.5"] {
            let content = format!("cache_ttl_secs = {}", bad);
            let err = Settings::from_toml_str(&content).unwrap_err();
            assert!(
                err.to_string().contains("cache_ttl_secs")
                    || err.to_string().contains("invalid number")
                    || err.to_string().contains("expected"),
                "unexpected error for {}: {}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_negative_budget_is_rejected() {
        let result = Settings::from_toml_str("[openai]\nmonthly_budget = \"-1\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            Endpoints::join("http://127.0.0.1:8080/", "/v1/messages"),
            "http://127.0.0.1:8080/v1/messages"
        );
    }

    #[tokio::test]
    async fn test_token_update_persists_and_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        tokio::fs::write(
            &path,
            "[claude]\nenabled = true\naccess_token = \"old\"\nrefresh_token = \"r-old\"\n",
        )
        .await
        .unwrap();

        let store = SettingsStore::load(&path).await.unwrap();
        store.update_claude_tokens("new", Some("r-new")).await.unwrap();

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.claude.access_token, "new");
        assert_eq!(snapshot.claude.refresh_token, "r-new");

        let reloaded = Settings::read_file(&path).await.unwrap();
        assert_eq!(reloaded, *snapshot);
    }

    #[tokio::test]
    async fn test_token_update_keeps_refresh_token_when_not_rotated() {
        let mut settings = Settings::default();
        settings.claude.refresh_token = "keep-me".to_string();
        let store = SettingsStore::in_memory(settings);

        store.update_claude_tokens("fresh", None).await.unwrap();
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.claude.access_token, "fresh");
        assert_eq!(snapshot.claude.refresh_token, "keep-me");
    }

    #[tokio::test]
    async fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("none.toml")).await.unwrap();
        assert_eq!(*store.snapshot().await, Settings::default());
        assert!(store.path().is_some());
    }
}
