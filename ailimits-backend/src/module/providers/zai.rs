use ailimits_common::{ProviderId, QuotaInfo, ServiceData, StatusKind};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{FetchContext, Resolver, bearer, is_running_low, read_json};
use crate::error::{FetchError, envelope_message, truncate_body};
use crate::model::Loose;
use crate::settings::{Endpoints, Settings};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Z.AI subscription plan and token quota
pub struct ZaiResolver;

#[async_trait]
impl Resolver for ZaiResolver {
    fn id(&self) -> ProviderId {
        ProviderId::Zai
    }

    fn check(&self, settings: &Settings) -> Result<(), FetchError> {
        if settings.zai.api_key.is_empty() {
            return Err(FetchError::Configuration("API key not configured".to_string()));
        }
        Ok(())
    }

    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<(StatusKind, ServiceData), FetchError> {
        let mut info = QuotaInfo::default();

        // Plan details are cosmetic; the quota below is what matters
        match get_json(ctx, "/api/biz/subscription/list").await {
            Ok(subscriptions) => apply_subscription(&mut info, &subscriptions),
            Err(e) => tracing::warn!("Z.AI subscription lookup failed: {}", e),
        }

        let quota = get_json(ctx, "/api/monitor/usage/quota/limit").await?;
        if !Loose::new(&quota).get("data").get("limits").is_present() {
            return Err(FetchError::Parse(
                "quota response has no data.limits".to_string(),
            ));
        }
        apply_quota(&mut info, &quota);

        let status = classify(&info);
        Ok((status, ServiceData::Zai(info)))
    }
}

async fn get_json(ctx: &FetchContext<'_>, path: &str) -> Result<Value, FetchError> {
    let url = Endpoints::join(&ctx.settings.endpoints.zai, path);
    let response = ctx
        .client
        .get(&url)
        .timeout(REQUEST_TIMEOUT)
        .header("Authorization", bearer(&ctx.settings.zai.api_key))
        .send()
        .await?;
    let raw = read_json(response).await?;
    check_envelope(&raw)?;
    Ok(raw)
}

/// Z.AI reports some failures as HTTP 200 with `success: false` or a non-200 `code`
fn check_envelope(raw: &Value) -> Result<(), FetchError> {
    let root = Loose::new(raw);
    let code = root.get("code").opt_i64();
    let rejected = root.get("success").opt_bool() == Some(false) || code.is_some_and(|c| c != 200);
    if !rejected {
        return Ok(());
    }

    let message = truncate_body(envelope_message(raw).unwrap_or("request rejected"));
    let message = match code {
        Some(code) => format!("{} (code {})", message, code),
        None => message.to_string(),
    };
    Err(FetchError::Upstream { status: 200, message })
}

pub fn apply_subscription(info: &mut QuotaInfo, raw: &Value) {
    let first = Loose::new(raw).get("data").at(0);
    info.plan_name = first.get("productName").str().to_string();
    info.plan_status = first.get("status").str().to_string();
}

pub fn apply_quota(info: &mut QuotaInfo, raw: &Value) {
    for limit in Loose::new(raw).get("data").get("limits").items() {
        match limit.get("type").str() {
            "TOKENS_LIMIT" => {
                info.tokens_used = limit.get("currentValue").f64();
                info.tokens_total = limit.get("usage").f64();
                info.tokens_remaining = limit.get("remaining").f64();
                info.next_reset = limit.get("nextResetTime").i64();
            }
            "TIME_LIMIT" => {
                info.tool_used = limit.get("currentValue").f64();
                info.tool_total = limit.get("usage").f64();
                info.tool_remaining = limit.get("remaining").f64();
            }
            other => tracing::trace!("Ignoring Z.AI limit type {:?}", other),
        }
    }
}

pub fn classify(info: &QuotaInfo) -> StatusKind {
    if is_running_low(info.tokens_remaining, info.tokens_total) {
        StatusKind::Warning
    } else {
        StatusKind::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quota(tokens_remaining: u64) -> Value {
        json!({
            "code": 200,
            "data": {
                "limits": [
                    {
                        "type": "TOKENS_LIMIT",
                        "usage": 1000,
                        "currentValue": 1000 - tokens_remaining,
                        "remaining": tokens_remaining,
                        "nextResetTime": 1_792_000_000_000_i64
                    },
                    { "type": "TIME_LIMIT", "usage": 100, "currentValue": 12, "remaining": 88 },
                    { "type": "SOMETHING_NEW", "usage": 1 }
                ]
            }
        })
    }

    #[test]
    fn test_limits_are_selected_by_type() {
        let mut info = QuotaInfo::default();
        apply_quota(&mut info, &quota(600));

        assert_eq!(info.tokens_total, 1000.0);
        assert_eq!(info.tokens_used, 400.0);
        assert_eq!(info.tokens_remaining, 600.0);
        assert_eq!(info.next_reset, 1_792_000_000_000);
        assert_eq!(info.tool_used, 12.0);
        assert_eq!(info.tool_remaining, 88.0);
        assert_eq!(classify(&info), StatusKind::Ok);
    }

    #[test]
    fn test_low_token_share_warns() {
        let mut info = QuotaInfo::default();
        apply_quota(&mut info, &quota(50));
        assert_eq!(classify(&info), StatusKind::Warning);
    }

    #[test]
    fn test_subscription_plan_from_first_entry() {
        let mut info = QuotaInfo::default();
        apply_subscription(
            &mut info,
            &json!({ "data": [{ "productName": "GLM Coding Pro", "status": "VALID" }, { "productName": "Old" }] }),
        );
        assert_eq!(info.plan_name, "GLM Coding Pro");
        assert_eq!(info.plan_status, "VALID");

        let mut empty = QuotaInfo::default();
        apply_subscription(&mut empty, &json!({ "data": [] }));
        assert_eq!(empty.plan_name, "");
    }

    #[test]
    fn test_error_envelope_with_http_200_is_rejected() {
        let expired = json!({ "code": 1001, "msg": "Authorization Token Expired", "success": false });
        let err = check_envelope(&expired).unwrap_err();
        assert_eq!(
            err.to_string(),
            "HTTP 200: Authorization Token Expired (code 1001)"
        );

        let bare = check_envelope(&json!({ "success": false })).unwrap_err();
        assert!(matches!(bare, FetchError::Upstream { status: 200, .. }));

        assert!(check_envelope(&quota(600)).is_ok());
        assert!(check_envelope(&json!({ "success": true, "data": [] })).is_ok());
    }
}
