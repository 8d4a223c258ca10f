//! Claude rate limits delivered by an external header collector.
//!
//! The collector posts roughly every 30 minutes, longer than the cache TTL,
//! so pushed records are stamped into the future and a copy is kept here to
//! survive wholesale cache invalidation.

use ailimits_common::{
    ProviderId, PushAckStatus, PushPayload, RateLimitSource, ServiceData, ServiceStatus,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::sync::RwLock;

use super::providers::claude;
use crate::error::FetchError;

/// How far past its receipt a pushed record stays fresh, on top of the TTL
pub fn push_headroom() -> TimeDelta {
    TimeDelta::minutes(30)
}

const AWAITING_PUSH: &str = "Waiting for rate-limit data. Run the header collector and point it at POST /api/v1/claude-push.";

#[derive(Debug, Clone, PartialEq)]
pub struct PushedRecord {
    pub record: ServiceStatus,
    pub received_at: DateTime<Utc>,
}

impl PushedRecord {
    /// Cache stamp with headroom applied
    pub fn cache_stamp(&self) -> DateTime<Utc> {
        self.received_at + push_headroom()
    }

    /// Still servable after the cache lost it
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let window = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| ttl.checked_add(&push_headroom()))
            .unwrap_or(TimeDelta::MAX);
        now - self.received_at < window
    }
}

/// Last accepted push
#[derive(Default)]
pub struct PushInbox {
    last: RwLock<Option<PushedRecord>>,
}

impl PushInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store(&self, pushed: PushedRecord) {
        *self.last.write().await = Some(pushed);
    }

    pub async fn latest(&self) -> Option<PushedRecord> {
        self.last.read().await.clone()
    }

    /// The last push if still fresh, else the placeholder error
    pub async fn fresh(&self, now: DateTime<Utc>, ttl: Duration) -> Result<PushedRecord, FetchError> {
        match self.latest().await {
            Some(pushed) if pushed.is_fresh(now, ttl) => Ok(pushed),
            Some(pushed) => {
                tracing::debug!(
                    "Last Claude push from {} is too old to serve",
                    pushed.received_at
                );
                Err(FetchError::AwaitingPush(AWAITING_PUSH.to_string()))
            }
            None => Err(FetchError::AwaitingPush(AWAITING_PUSH.to_string())),
        }
    }
}

/// Turn a webhook body into the record that will be cached
pub fn record_from_payload(
    payload: &PushPayload,
    received_at: DateTime<Utc>,
) -> (PushedRecord, PushAckStatus) {
    let cached_at = received_at.timestamp();

    let (record, ack) = match payload.error.as_deref().filter(|e| !e.is_empty()) {
        Some(message) => (
            ServiceStatus::error(ProviderId::Claude, message),
            PushAckStatus::ErrorStored,
        ),
        None => {
            let captured_at = Some(payload.timestamp).filter(|ts| *ts > 0);
            let info = claude::normalize(
                payload
                    .rate_limits
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
                RateLimitSource::Push,
                captured_at.or(Some(cached_at)),
            );
            let status = claude::classify(&info);
            (
                ServiceStatus::with_data(ProviderId::Claude, status, ServiceData::Claude(info)),
                PushAckStatus::Ok,
            )
        }
    };

    (
        PushedRecord {
            record: record.cached_at(cached_at),
            received_at,
        },
        ack,
    )
}
