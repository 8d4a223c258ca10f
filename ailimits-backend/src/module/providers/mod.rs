//! One resolver per upstream provider.
//!
//! A resolver only knows how to talk to its provider and normalize the
//! answer. Caching, disabled handling and turning failures into records all
//! happen in the aggregator.

pub mod augment;
pub mod claude;
pub mod openai;
pub mod zai;

use ailimits_common::{ProviderId, ServiceData, StatusKind};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::FetchError;
use crate::model::Clock;
use crate::settings::{Settings, SettingsStore};

pub use augment::AugmentResolver;
pub use claude::ClaudeOauthResolver;
pub use openai::OpenAiResolver;
pub use zai::ZaiResolver;

/// Everything a resolver may touch during one fetch
pub struct FetchContext<'a> {
    pub client: &'a reqwest::Client,
    pub settings: Arc<Settings>,
    /// Needed to persist rotated OAuth tokens
    pub store: &'a SettingsStore,
    pub clock: &'a dyn Clock,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Credential precheck; a failure here never reaches the network and is not cached
    fn check(&self, settings: &Settings) -> Result<(), FetchError>;

    /// Call upstream and normalize the answer
    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<(StatusKind, ServiceData), FetchError>;
}

/// Resolvers for every provider that is fetched over the network
pub fn default_resolvers() -> Vec<Arc<dyn Resolver>> {
    vec![
        Arc::new(AugmentResolver),
        Arc::new(ZaiResolver),
        Arc::new(OpenAiResolver),
        Arc::new(ClaudeOauthResolver),
    ]
}

/// Body of a 2xx response as JSON; anything else becomes a classified error
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value, FetchError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(FetchError::from_response(status.as_u16(), &body));
    }
    parse_json(&body)
}

pub(crate) fn parse_json(body: &str) -> Result<Value, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))
}

pub(crate) fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Less than 10% of `total` remains
pub(crate) fn is_running_low(remaining: f64, total: f64) -> bool {
    total > 0.0 && remaining / total < 0.10
}
