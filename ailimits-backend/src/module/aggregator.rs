//! Status aggregation across every provider, behind the shared TTL cache.

use ailimits_common::{PushAck, PushPayload, ProviderId, ServiceStatus, StatusKind};
use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::providers::{FetchContext, Resolver, default_resolvers};
use super::push::{self, PushInbox};
use crate::error::FetchError;
use crate::model::{Clock, TtlCache};
use crate::settings::{ClaudeSource, Settings, SettingsStore};

const USER_AGENT: &str = concat!("ailimits-backend/", env!("CARGO_PKG_VERSION"));

/// Owns the cache and resolvers; the HTTP layer only ever talks to this.
pub struct Aggregator {
    store: Arc<SettingsStore>,
    cache: TtlCache<ProviderId, ServiceStatus>,
    clock: Arc<dyn Clock>,
    client: reqwest::Client,
    inbox: PushInbox,
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl Aggregator {
    pub async fn new(store: Arc<SettingsStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(store, clock, client).await)
    }

    pub async fn with_client(
        store: Arc<SettingsStore>,
        clock: Arc<dyn Clock>,
        client: reqwest::Client,
    ) -> Self {
        let ttl = store.snapshot().await.cache_ttl();
        Self {
            store,
            cache: TtlCache::new(ttl, clock.clone()),
            clock,
            client,
            inbox: PushInbox::new(),
            resolvers: default_resolvers(),
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    pub async fn cache_ttl(&self) -> Duration {
        self.cache.ttl().await
    }

    /// One record per provider, always in [`ProviderId::ALL`] order
    pub async fn get_all_statuses(&self) -> Vec<ServiceStatus> {
        // Read before the snapshot so a concurrent apply_settings is always noticed
        let generation = self.cache.generation().await;
        let settings = self.store.snapshot().await;
        join_all(
            ProviderId::ALL
                .iter()
                .map(|&id| self.resolve(id, settings.clone(), generation)),
        )
        .await
    }

    /// Drop every cached record, then resolve everything afresh
    pub async fn refresh(&self) -> Vec<ServiceStatus> {
        info!("Manual refresh requested, clearing status cache");
        self.cache.clear().await;
        self.get_all_statuses().await
    }

    /// Install a new settings snapshot; the cache is emptied and takes the new TTL
    pub async fn apply_settings(&self, settings: Settings) {
        let ttl = settings.cache_ttl();
        self.store.replace(settings).await;
        self.cache.reset(ttl).await;
        info!("Settings applied, cache reset (ttl {}s)", ttl.as_secs());
    }

    /// Accept a webhook push; `None` when Claude is not configured for push delivery
    pub async fn ingest_push(&self, payload: PushPayload) -> Option<PushAck> {
        let settings = self.store.snapshot().await;
        if !accepts_push(&settings) {
            debug!("Ignoring Claude push, provider is not in push mode");
            return None;
        }

        let (pushed, status) = push::record_from_payload(&payload, self.clock.now());
        info!(
            "Claude push accepted: status {} captured at {}",
            pushed.record.status, payload.timestamp
        );
        self.cache
            .set_at(ProviderId::Claude, pushed.record.clone(), pushed.cache_stamp())
            .await;
        self.inbox.store(pushed).await;

        Some(PushAck { status })
    }

    async fn resolve(&self, id: ProviderId, settings: Arc<Settings>, generation: u64) -> ServiceStatus {
        if !settings.is_enabled(id) {
            return ServiceStatus::disabled(id);
        }
        if id == ProviderId::Claude && settings.claude.source == ClaudeSource::Push {
            return self.resolve_push().await;
        }

        let Some(resolver) = self.resolvers.iter().find(|r| r.id() == id) else {
            return ServiceStatus::error(id, "No resolver available");
        };
        if let Err(e) = resolver.check(&settings) {
            return failure_record(id, &e);
        }
        if let Some(entry) = self.cache.get(&id).await {
            return entry.value;
        }

        let ctx = FetchContext {
            client: &self.client,
            settings,
            store: &self.store,
            clock: self.clock.as_ref(),
        };
        match resolver.fetch(&ctx).await {
            Ok((status, data)) => {
                debug!("Fetched {} status: {}", id, status);
                self.remember(ServiceStatus::with_data(id, status, data), generation)
                    .await
            }
            Err(e) => {
                warn!("Failed to fetch {} status: {}", id, e);
                let record = failure_record(id, &e);
                if e.is_cacheable() {
                    self.remember(record, generation).await
                } else {
                    record
                }
            }
        }
    }

    async fn resolve_push(&self) -> ServiceStatus {
        let id = ProviderId::Claude;
        if let Some(entry) = self.cache.get(&id).await {
            return entry.value;
        }

        let ttl = self.cache.ttl().await;
        match self.inbox.fresh(self.clock.now(), ttl).await {
            Ok(pushed) => {
                // Keep the original headroom stamp, a re-serve must not extend it
                self.cache
                    .set_at(id, pushed.record.clone(), pushed.cache_stamp())
                    .await;
                pushed.record
            }
            Err(e) => failure_record(id, &e),
        }
    }

    /// Stamp and cache a freshly resolved record.
    ///
    /// Nothing is cached if the cache was cleared or reset after `generation`
    /// was read, since the record may come from replaced settings.
    async fn remember(&self, record: ServiceStatus, generation: u64) -> ServiceStatus {
        let now = self.clock.now();
        let record = record.cached_at(now.timestamp());
        if !self
            .cache
            .set_if_current(generation, record.id, record.clone(), now)
            .await
        {
            debug!("Settings changed during {} fetch, result not cached", record.id);
        }
        record
    }
}

fn accepts_push(settings: &Settings) -> bool {
    settings.claude.enabled && settings.claude.source == ClaudeSource::Push
}

fn failure_record(id: ProviderId, error: &FetchError) -> ServiceStatus {
    ServiceStatus::message(id, error.status_kind(), error.to_string())
}

/// Worst classification across records, ignoring disabled providers
pub fn overall_status(records: &[ServiceStatus]) -> StatusKind {
    records
        .iter()
        .map(|r| r.status)
        .fold(StatusKind::Disabled, StatusKind::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ManualClock;
    use chrono::{TimeDelta, TimeZone, Utc};
    use std::collections::HashMap;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap(),
        ))
    }

    async fn aggregator(settings: Settings, clock: Arc<ManualClock>) -> Aggregator {
        let store = Arc::new(SettingsStore::in_memory(settings));
        Aggregator::new(store, clock).await.unwrap()
    }

    fn push_settings() -> Settings {
        let mut settings = Settings::default();
        settings.claude.enabled = true;
        settings.claude.source = ClaudeSource::Push;
        settings
    }

    fn payload(utilization: &str) -> PushPayload {
        PushPayload {
            timestamp: 1_700_000_000,
            rate_limits: HashMap::from([(
                "anthropic-ratelimit-unified-5h-utilization".to_string(),
                utilization.to_string(),
            )]),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_all_disabled_yields_fixed_order() {
        let agg = aggregator(Settings::default(), clock()).await;
        let records = agg.get_all_statuses().await;

        let ids: Vec<ProviderId> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, ProviderId::ALL.to_vec());
        assert!(records.iter().all(|r| r.status == StatusKind::Disabled && !r.enabled));
        assert_eq!(overall_status(&records), StatusKind::Disabled);
    }

    #[tokio::test]
    async fn test_missing_credentials_are_not_cached() {
        let mut settings = Settings::default();
        settings.zai.enabled = true;
        let agg = aggregator(settings, clock()).await;

        let records = agg.get_all_statuses().await;
        assert_eq!(records[1].status, StatusKind::Error);
        assert_eq!(records[1].error.as_deref(), Some("API key not configured"));
        assert_eq!(records[1].cached_at, None);
        assert!(agg.cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_push_placeholder_until_first_push() {
        let agg = aggregator(push_settings(), clock()).await;

        let claude = agg.get_all_statuses().await.pop().unwrap();
        assert_eq!(claude.status, StatusKind::Warning);
        assert!(claude.data.is_none());
        assert!(agg.cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_push_survives_refresh_within_headroom() {
        let clock = clock();
        let agg = aggregator(push_settings(), clock.clone()).await;

        let ack = agg.ingest_push(payload("0.95")).await.unwrap();
        assert_eq!(ack.status, ailimits_common::PushAckStatus::Ok);

        clock.advance(TimeDelta::minutes(20));
        let claude = agg.refresh().await.pop().unwrap();
        assert_eq!(claude.status, StatusKind::Warning);
        assert!(claude.data.is_some());

        // 5 min ttl + 30 min headroom
        clock.advance(TimeDelta::minutes(15));
        let claude = agg.refresh().await.pop().unwrap();
        assert!(claude.data.is_none());
    }

    #[tokio::test]
    async fn test_push_rejected_outside_push_mode() {
        let mut settings = Settings::default();
        settings.claude.enabled = true;
        let agg = aggregator(settings, clock()).await;
        assert!(agg.ingest_push(payload("0.1")).await.is_none());
    }

    #[tokio::test]
    async fn test_apply_settings_resets_cache_and_ttl() {
        let agg = aggregator(push_settings(), clock()).await;
        agg.ingest_push(payload("0.1")).await.unwrap();
        assert!(!agg.cache.is_empty().await);

        let mut next = push_settings();
        next.cache_ttl_secs = Some(60);
        agg.apply_settings(next).await;

        assert!(agg.cache.is_empty().await);
        assert_eq!(agg.cache_ttl().await, Duration::from_secs(60));
        assert_eq!(agg.settings().snapshot().await.cache_ttl_secs, Some(60));
    }

    #[tokio::test]
    async fn test_fetch_finishing_after_apply_settings_is_not_cached() {
        let agg = aggregator(Settings::default(), clock()).await;
        let started = agg.cache.generation().await;

        agg.apply_settings(Settings::default()).await;
        let stale = ServiceStatus::error(ProviderId::Zai, "fetched with the old key");
        let record = agg.remember(stale, started).await;

        assert!(record.cached_at.is_some());
        assert!(agg.cache.get(&ProviderId::Zai).await.is_none());

        let current = agg.cache.generation().await;
        agg.remember(ServiceStatus::error(ProviderId::Zai, "fresh"), current).await;
        assert!(agg.cache.get(&ProviderId::Zai).await.is_some());
    }
}
