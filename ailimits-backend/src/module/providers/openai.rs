use ailimits_common::{CostInfo, ProviderId, ServiceData, StatusKind};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeDelta, TimeZone, Utc};
use serde_json::Value;
use std::time::Duration;

use super::{FetchContext, Resolver, bearer, read_json};
use crate::error::FetchError;
use crate::model::Loose;
use crate::settings::{CostWindow, Endpoints, OpenAiSettings, Settings};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_PAGES: usize = 12;
const WARNING_RATIO: f64 = 0.8;

/// Organization spend from the admin costs API
pub struct OpenAiResolver;

#[async_trait]
impl Resolver for OpenAiResolver {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn check(&self, settings: &Settings) -> Result<(), FetchError> {
        if settings.openai.admin_key.is_empty() {
            return Err(FetchError::Configuration(
                "Admin key not configured".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<(StatusKind, ServiceData), FetchError> {
        let now = ctx.clock.now();
        let window = BillingWindow::for_setting(ctx.settings.openai.window, now);

        let mut total_cost = 0.0;
        let mut bucket_count = 0;
        let mut page: Option<String> = None;

        for page_no in 1..=MAX_PAGES {
            let raw = fetch_page(ctx, &window, now, page.as_deref()).await?;
            let (cost, buckets) = sum_costs(&raw);
            total_cost += cost;
            bucket_count += buckets;

            let root = Loose::new(&raw);
            let next = root.get("next_page").str();
            if !root.get("has_more").bool() || next.is_empty() {
                break;
            }
            if page_no == MAX_PAGES {
                tracing::warn!(
                    "OpenAI cost report still has more pages after {}, total is partial",
                    MAX_PAGES
                );
            }
            page = Some(next.to_string());
        }

        let info = build_info(total_cost, bucket_count, &window, now, &ctx.settings.openai);
        let status = classify(&info);
        Ok((status, ServiceData::OpenAi(info)))
    }
}

async fn fetch_page(
    ctx: &FetchContext<'_>,
    window: &BillingWindow,
    now: DateTime<Utc>,
    page: Option<&str>,
) -> Result<Value, FetchError> {
    let mut url = format!(
        "{}?start_time={}&end_time={}&bucket_width=1d&limit=31",
        Endpoints::join(&ctx.settings.endpoints.openai, "/v1/organization/costs"),
        window.start.timestamp(),
        now.timestamp()
    );
    if let Some(page) = page {
        url.push_str(&format!("&page={}", urlencoding::encode(page)));
    }

    let response = ctx
        .client
        .get(&url)
        .timeout(REQUEST_TIMEOUT)
        .header("Authorization", bearer(&ctx.settings.openai.admin_key))
        .header("Content-Type", "application/json")
        .send()
        .await?;
    read_json(response).await
}

/// Time range summed into the displayed cost
#[derive(Debug, Clone, PartialEq)]
pub struct BillingWindow {
    pub start: DateTime<Utc>,
    /// `None` for windows that slide instead of resetting
    pub resets_at: Option<DateTime<Utc>>,
    pub period: String,
}

impl BillingWindow {
    pub fn for_setting(window: CostWindow, now: DateTime<Utc>) -> Self {
        match window {
            CostWindow::CalendarMonth => Self::calendar_month(now),
            CostWindow::Rolling30d => Self {
                start: now - TimeDelta::days(30),
                resets_at: None,
                period: "Last 30 days".to_string(),
            },
        }
    }

    fn calendar_month(now: DateTime<Utc>) -> Self {
        let start = month_start(now.year(), now.month());
        let (next_year, next_month) = if now.month() == 12 {
            (now.year() + 1, 1)
        } else {
            (now.year(), now.month() + 1)
        };
        Self {
            start,
            resets_at: Some(month_start(next_year, next_month)),
            period: start.format("%b %Y").to_string(),
        }
    }

    /// Whole days left until the window resets
    pub fn days_until_reset(&self, now: DateTime<Utc>) -> i64 {
        self.resets_at
            .map(|reset| (reset - now).num_days().max(0))
            .unwrap_or(0)
    }
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Sum of `data[].results[].amount.value` and the number of buckets seen
pub fn sum_costs(raw: &Value) -> (f64, usize) {
    let mut total = 0.0;
    let mut buckets = 0;
    for bucket in Loose::new(raw).get("data").items() {
        buckets += 1;
        for result in bucket.get("results").items() {
            total += result.get("amount").get("value").f64();
        }
    }
    (total, buckets)
}

pub fn build_info(
    total_cost: f64,
    bucket_count: usize,
    window: &BillingWindow,
    now: DateTime<Utc>,
    settings: &OpenAiSettings,
) -> CostInfo {
    let budget = settings.monthly_budget;
    let credit_balance = settings.credit_balance;

    CostInfo {
        total_cost,
        budget,
        credit_balance,
        remaining_credit: credit_balance.map(|balance| balance - total_cost),
        budget_used_percent: budget
            .filter(|b| *b > 0.0)
            .map(|b| total_cost / b * 100.0),
        period: window.period.clone(),
        days_until_reset: window.days_until_reset(now),
        bucket_count,
    }
}

pub fn classify(info: &CostInfo) -> StatusKind {
    match info.budget {
        Some(budget) if budget > 0.0 => {
            if info.total_cost >= budget {
                StatusKind::Error
            } else if info.total_cost / budget >= WARNING_RATIO {
                StatusKind::Warning
            } else {
                StatusKind::Ok
            }
        }
        _ => StatusKind::Ok,
    }
}
