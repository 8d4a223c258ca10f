//! Claude subscription rate limits.
//!
//! There is no usage endpoint for subscription accounts. Instead a one-token
//! request is sent with the OAuth token and the `anthropic-ratelimit-unified-*`
//! response headers are read back. The same header set can also arrive through
//! the push webhook, so normalization here is shared with [`crate::module::push`].

use ailimits_common::{ProviderId, RateLimitInfo, RateLimitSource, ServiceData, StatusKind};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use super::{FetchContext, Resolver, bearer, read_json};
use crate::error::FetchError;
use crate::model::Loose;
use crate::settings::{Endpoints, Settings};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";

pub const HEADER_PREFIX: &str = "anthropic-ratelimit-unified-";
const STATUS: &str = "anthropic-ratelimit-unified-status";
const REPRESENTATIVE_CLAIM: &str = "anthropic-ratelimit-unified-representative-claim";
const UTILIZATION_5H: &str = "anthropic-ratelimit-unified-5h-utilization";
const RESET_5H: &str = "anthropic-ratelimit-unified-5h-reset";
const STATUS_5H: &str = "anthropic-ratelimit-unified-5h-status";
const UTILIZATION_7D: &str = "anthropic-ratelimit-unified-7d-utilization";
const RESET_7D: &str = "anthropic-ratelimit-unified-7d-reset";
const STATUS_7D: &str = "anthropic-ratelimit-unified-7d-status";

/// Reads rate limits off a Messages API call made with the OAuth token, refreshing it once on 401/403
pub struct ClaudeOauthResolver;

#[async_trait]
impl Resolver for ClaudeOauthResolver {
    fn id(&self) -> ProviderId {
        ProviderId::Claude
    }

    fn check(&self, settings: &Settings) -> Result<(), FetchError> {
        if settings.claude.access_token.is_empty() {
            return Err(FetchError::Configuration(
                "Access token not configured. Authorize the claude CLI, then copy the tokens from ~/.claude/.credentials.json into settings.toml".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<(StatusKind, ServiceData), FetchError> {
        let token = &ctx.settings.claude.access_token;
        let info = match read_limits(ctx, token).await {
            Err(original @ FetchError::AuthExpired { .. }) => {
                match renew_token(ctx, token).await {
                    Ok(access_token) => read_limits(ctx, &access_token).await?,
                    Err(e) => {
                        tracing::warn!("Claude token refresh failed: {}", e);
                        return Err(original);
                    }
                }
            }
            other => other?,
        };

        let status = classify(&info);
        Ok((status, ServiceData::Claude(info)))
    }
}

/// One-token Messages request; the answer itself is discarded
async fn read_limits(ctx: &FetchContext<'_>, access_token: &str) -> Result<RateLimitInfo, FetchError> {
    let url = Endpoints::join(&ctx.settings.endpoints.anthropic, "/v1/messages");
    let body = json!({
        "model": ctx.settings.claude.model,
        "max_tokens": 1,
        "messages": [{ "role": "user", "content": "hi" }]
    });

    let response = ctx
        .client
        .post(&url)
        .timeout(REQUEST_TIMEOUT)
        .header("Authorization", bearer(access_token))
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("anthropic-beta", OAUTH_BETA)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    // A throttled account still reports its windows
    let usable = status.is_success()
        || (status == StatusCode::TOO_MANY_REQUESTS && has_unified_headers(&headers));
    if !usable {
        let text = response.text().await?;
        return Err(FetchError::from_response(status.as_u16(), &text));
    }

    let captured_at = ctx.clock.now().timestamp();
    Ok(normalize(
        headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        RateLimitSource::Oauth,
        Some(captured_at),
    ))
}

/// Access token to retry with after `rejected_token` got a 401/403.
///
/// Only one refresh runs at a time. A caller that waited on another refresh
/// picks up the token it stored instead of spending the rotated refresh token.
async fn renew_token(ctx: &FetchContext<'_>, rejected_token: &str) -> Result<String, FetchError> {
    let _guard = ctx.store.lock_token_refresh().await;
    let live = ctx.store.snapshot().await;
    if !live.claude.access_token.is_empty() && live.claude.access_token != rejected_token {
        tracing::debug!("Claude token was already refreshed, retrying with it");
        return Ok(live.claude.access_token.clone());
    }
    refresh_token(ctx, &live).await
}

/// Exchange the refresh token for a new access token and persist both
async fn refresh_token(ctx: &FetchContext<'_>, live: &Settings) -> Result<String, FetchError> {
    let claude = &live.claude;
    if claude.refresh_token.is_empty() {
        return Err(FetchError::Configuration(
            "Refresh token not configured".to_string(),
        ));
    }

    let url = Endpoints::join(&live.endpoints.anthropic_oauth, "/v1/oauth/token");
    let form = format!(
        "grant_type=refresh_token&client_id={}&refresh_token={}",
        urlencoding::encode(&claude.oauth_client_id),
        urlencoding::encode(&claude.refresh_token)
    );

    let response = ctx
        .client
        .post(&url)
        .timeout(REQUEST_TIMEOUT)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(form)
        .send()
        .await?;
    let raw = read_json(response).await?;

    let root = Loose::new(&raw);
    let access_token = root.get("access_token").str();
    if access_token.is_empty() {
        return Err(FetchError::Parse(
            "token response has no access_token".to_string(),
        ));
    }

    if let Err(e) = ctx
        .store
        .update_claude_tokens(access_token, root.get("refresh_token").opt_str())
        .await
    {
        // The new token is already live in memory; only the file is stale
        tracing::error!("Failed to persist refreshed Claude tokens: {}", e);
    }
    tracing::info!("Claude OAuth token refreshed");

    Ok(access_token.to_string())
}

pub fn has_unified_headers<K: AsRef<str>, V>(headers: &[(K, V)]) -> bool {
    headers.iter().any(|(name, _)| {
        name.as_ref()
            .to_ascii_lowercase()
            .starts_with(HEADER_PREFIX)
    })
}

/// Build [`RateLimitInfo`] from a header set; names are matched case-insensitively
pub fn normalize<'a>(
    headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    source: RateLimitSource,
    captured_at: Option<i64>,
) -> RateLimitInfo {
    let headers: HashMap<String, &str> = headers
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
        .collect();
    let text = |key: &str| {
        headers
            .get(key)
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    };
    let percent = |key: &str| {
        headers
            .get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .map(|fraction| fraction * 100.0)
    };
    let epoch = |key: &str| headers.get(key).and_then(|v| v.parse::<i64>().ok());

    let utilization_5h = percent(UTILIZATION_5H);
    let utilization_7d = percent(UTILIZATION_7D);

    RateLimitInfo {
        utilization_5h: utilization_5h.unwrap_or(0.0),
        reset_5h: epoch(RESET_5H),
        status_5h: text(STATUS_5H),
        utilization_7d: utilization_7d.unwrap_or(0.0),
        reset_7d: epoch(RESET_7D),
        status_7d: text(STATUS_7D),
        overall_status: text(STATUS),
        representative_claim: text(REPRESENTATIVE_CLAIM),
        source,
        captured_at,
        has_data: utilization_5h.is_some() || utilization_7d.is_some(),
    }
}

pub fn classify(info: &RateLimitInfo) -> StatusKind {
    let statuses = [&info.status_5h, &info.status_7d, &info.overall_status];
    let any_status = |wanted: &str| statuses.iter().any(|s| s.as_deref() == Some(wanted));

    if info.utilization_5h >= 100.0 || info.utilization_7d >= 100.0 || any_status("rejected") {
        StatusKind::Error
    } else if info.utilization_5h > 80.0
        || info.utilization_7d > 80.0
        || any_status("allowed_warning")
    {
        StatusKind::Warning
    } else {
        StatusKind::Ok
    }
}
