use ailimits_common::{CreditInfo, ProviderId, ServiceData, StatusKind};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{FetchContext, Resolver, bearer, is_running_low, read_json};
use crate::error::FetchError;
use crate::model::Loose;
use crate::settings::{Endpoints, Settings};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Augment Code credit balance via `get-credit-info`
pub struct AugmentResolver;

#[async_trait]
impl Resolver for AugmentResolver {
    fn id(&self) -> ProviderId {
        ProviderId::Augment
    }

    fn check(&self, settings: &Settings) -> Result<(), FetchError> {
        if settings.augment.access_token.is_empty() {
            return Err(FetchError::Configuration(
                "Access token not configured".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<(StatusKind, ServiceData), FetchError> {
        let url = Endpoints::join(&ctx.settings.endpoints.augment, "/get-credit-info");
        let response = ctx
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", bearer(&ctx.settings.augment.access_token))
            .header("Content-Type", "application/json")
            .body("{}")
            .send()
            .await?;

        let raw = read_json(response).await?;
        let info = normalize(&raw);
        let status = classify(&info, included_units(&raw));
        tracing::debug!(
            "Augment credits: {}/{} remaining",
            info.usage_remaining,
            info.usage_total
        );
        Ok((status, ServiceData::Augment(info)))
    }
}

fn included_units(raw: &Value) -> f64 {
    Loose::new(raw)
        .get("included_usage_units_per_billing_cycle")
        .f64()
}

pub fn normalize(raw: &Value) -> CreditInfo {
    let root = Loose::new(raw);
    let remaining = root.get("usage_units_remaining").f64();
    let mut total = root.get("usage_units_total").f64();

    // The per-cycle allowance is the meaningful denominator when present
    let included = included_units(raw);
    if included > 0.0 {
        total = included;
    }

    CreditInfo {
        plan_name: root
            .get("display_info")
            .get("plan_display_name")
            .str()
            .to_string(),
        usage_remaining: remaining,
        usage_total: total,
        usage_used: total - remaining,
        cycle_end: root
            .get("current_billing_cycle_end_date_iso")
            .str()
            .to_string(),
        is_low: root.get("is_credit_balance_low").bool(),
    }
}

pub fn classify(info: &CreditInfo, included: f64) -> StatusKind {
    if info.is_low || is_running_low(info.usage_remaining, included) {
        StatusKind::Warning
    } else {
        StatusKind::Ok
    }
}
