#![allow(dead_code)]

use ailimits_backend::model::ManualClock;
use ailimits_backend::module::Aggregator;
use ailimits_backend::settings::{Endpoints, Settings, SettingsStore};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use wiremock::MockServer;

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
    ))
}

/// Every upstream pointed at the mock server, every provider disabled
pub fn settings_for(server: &MockServer) -> Settings {
    let uri = server.uri();
    Settings {
        endpoints: Endpoints {
            augment: uri.clone(),
            zai: uri.clone(),
            openai: uri.clone(),
            anthropic: uri.clone(),
            anthropic_oauth: uri,
        },
        ..Default::default()
    }
}

pub fn enable_augment(settings: &mut Settings) {
    settings.augment.enabled = true;
    settings.augment.access_token = "aug-token".to_string();
}

pub fn enable_zai(settings: &mut Settings) {
    settings.zai.enabled = true;
    settings.zai.api_key = "zai-key".to_string();
}

pub fn enable_openai(settings: &mut Settings, budget: Option<f64>) {
    settings.openai.enabled = true;
    settings.openai.admin_key = "sk-admin".to_string();
    settings.openai.monthly_budget = budget;
}

pub fn enable_claude(settings: &mut Settings, access_token: &str, refresh_token: &str) {
    settings.claude.enabled = true;
    settings.claude.access_token = access_token.to_string();
    settings.claude.refresh_token = refresh_token.to_string();
}

pub async fn aggregator(settings: Settings, clock: Arc<ManualClock>) -> Arc<Aggregator> {
    let store = Arc::new(SettingsStore::in_memory(settings));
    Arc::new(Aggregator::new(store, clock).await.unwrap())
}

pub async fn request_count(server: &MockServer, path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == path)
        .count()
}
