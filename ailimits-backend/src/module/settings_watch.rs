//! Picks up edits to the settings file while the server runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

use super::aggregator::Aggregator;
use crate::settings::Settings;

/// What one poll of the settings file did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Unchanged,
    Applied,
    /// File changed but matches the live snapshot, e.g. after a token write
    Identical,
    Invalid,
}

pub struct SettingsWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl SettingsWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = modified_at(&path);
        Self {
            path,
            last_modified,
        }
    }

    /// Re-read the file if its mtime moved and apply it when it differs
    pub async fn poll(&mut self, aggregator: &Aggregator) -> WatchOutcome {
        let modified = modified_at(&self.path);
        if modified.is_none() || modified == self.last_modified {
            return WatchOutcome::Unchanged;
        }
        self.last_modified = modified;

        let settings = match Settings::read_file(&self.path).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!("Keeping previous settings: {}", e);
                return WatchOutcome::Invalid;
            }
        };

        if settings == *aggregator.settings().snapshot().await {
            return WatchOutcome::Identical;
        }

        tracing::info!("Settings file {:?} changed, reloading", self.path);
        aggregator.apply_settings(settings).await;
        WatchOutcome::Applied
    }

    pub fn spawn(mut self, aggregator: Arc<Aggregator>, interval: Duration) -> JoinHandle<()> {
        tracing::info!(
            "Watching {:?} for changes every {}s",
            self.path,
            interval.as_secs()
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.poll(&aggregator).await;
            }
        })
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SystemClock;
    use crate::settings::SettingsStore;

    async fn write_and_bump(path: &Path, content: &str, watcher: &mut SettingsWatcher) {
        tokio::fs::write(path, content).await.unwrap();
        // Coarse filesystem timestamps may not move between quick writes
        watcher.last_modified = Some(SystemTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn test_poll_applies_only_real_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        tokio::fs::write(&path, "[zai]\nenabled = true\napi_key = \"k1\"\n")
            .await
            .unwrap();

        let store = Arc::new(SettingsStore::load(&path).await.unwrap());
        let aggregator = Aggregator::new(store, Arc::new(SystemClock)).await.unwrap();
        let mut watcher = SettingsWatcher::new(&path);

        assert_eq!(watcher.poll(&aggregator).await, WatchOutcome::Unchanged);

        write_and_bump(&path, "[zai]\nenabled = true\napi_key = \"k2\"\n", &mut watcher).await;
        assert_eq!(watcher.poll(&aggregator).await, WatchOutcome::Applied);
        assert_eq!(aggregator.settings().snapshot().await.zai.api_key, "k2");

        // What the store itself writes back is not a change
        aggregator
            .settings()
            .update_claude_tokens("a", Some("r"))
            .await
            .unwrap();
        watcher.last_modified = Some(SystemTime::UNIX_EPOCH);
        assert_eq!(watcher.poll(&aggregator).await, WatchOutcome::Identical);

        write_and_bump(&path, "cache_ttl_secs = \"30x\"\n", &mut watcher).await;
        assert_eq!(watcher.poll(&aggregator).await, WatchOutcome::Invalid);
        assert_eq!(aggregator.settings().snapshot().await.zai.api_key, "k2");
    }
}
