use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Monitored AI providers, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    #[serde(rename = "augment")]
    Augment,
    #[serde(rename = "zai")]
    Zai,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "claude")]
    Claude,
}

impl ProviderId {
    /// Fixed order used for every aggregation response
    pub const ALL: [ProviderId; 4] = [
        ProviderId::Augment,
        ProviderId::Zai,
        ProviderId::OpenAi,
        ProviderId::Claude,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Augment => "augment",
            ProviderId::Zai => "zai",
            ProviderId::OpenAi => "openai",
            ProviderId::Claude => "claude",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Augment => "Augment Code",
            ProviderId::Zai => "Z.AI",
            ProviderId::OpenAi => "OpenAI",
            ProviderId::Claude => "Claude (Anthropic)",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health classification shown next to each provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Ok,
    Warning,
    Error,
    Disabled,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Ok => "ok",
            StatusKind::Warning => "warning",
            StatusKind::Error => "error",
            StatusKind::Disabled => "disabled",
        }
    }

    /// The more severe of two classifications
    pub fn max(self, other: StatusKind) -> StatusKind {
        if other.severity() > self.severity() { other } else { self }
    }

    fn severity(&self) -> u8 {
        match self {
            StatusKind::Disabled => 0,
            StatusKind::Ok => 1,
            StatusKind::Warning => 2,
            StatusKind::Error => 3,
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const DISABLED_HINT: &str = "Not configured. Enable this provider in settings.toml.";

/// Normalized status of one provider, as served to the display client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub id: ProviderId,
    pub name: String,
    pub enabled: bool,
    pub status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ServiceData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix seconds of the fetch that produced this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<i64>,
}

impl ServiceStatus {
    pub fn disabled(id: ProviderId) -> Self {
        Self {
            id,
            name: id.display_name().to_string(),
            enabled: false,
            status: StatusKind::Disabled,
            data: None,
            error: Some(DISABLED_HINT.to_string()),
            cached_at: None,
        }
    }

    pub fn error(id: ProviderId, message: impl Into<String>) -> Self {
        Self::message(id, StatusKind::Error, message)
    }

    /// Enabled provider without data, e.g. a placeholder telling the operator what to do
    pub fn message(id: ProviderId, status: StatusKind, message: impl Into<String>) -> Self {
        Self {
            id,
            name: id.display_name().to_string(),
            enabled: true,
            status,
            data: None,
            error: Some(message.into()),
            cached_at: None,
        }
    }

    pub fn with_data(id: ProviderId, status: StatusKind, data: ServiceData) -> Self {
        Self {
            id,
            name: id.display_name().to_string(),
            enabled: true,
            status,
            data: Some(data),
            error: None,
            cached_at: None,
        }
    }

    pub fn cached_at(mut self, unix_secs: i64) -> Self {
        self.cached_at = Some(unix_secs);
        self
    }
}

/// Provider-specific payload; the aggregator treats it as opaque
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceData {
    Augment(CreditInfo),
    Zai(QuotaInfo),
    OpenAi(CostInfo),
    Claude(RateLimitInfo),
}

/// Augment Code credit balance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditInfo {
    pub plan_name: String,
    pub usage_remaining: f64,
    pub usage_total: f64,
    pub usage_used: f64,
    pub cycle_end: String,
    pub is_low: bool,
}

/// Z.AI token quota and tool-call allowance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    pub plan_name: String,
    pub plan_status: String,
    pub tokens_used: f64,
    pub tokens_total: f64,
    pub tokens_remaining: f64,
    /// Epoch milliseconds as reported upstream
    pub next_reset: i64,
    pub tool_used: f64,
    pub tool_total: f64,
    pub tool_remaining: f64,
}

/// OpenAI organization spend for the current window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostInfo {
    /// Currency units (USD)
    pub total_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_credit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_used_percent: Option<f64>,
    pub period: String,
    pub days_until_reset: i64,
    pub bucket_count: usize,
}

/// Claude unified rate-limit windows; utilizations are percentages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    #[serde(rename = "utilization5h")]
    pub utilization_5h: f64,
    #[serde(rename = "reset5h", default, skip_serializing_if = "Option::is_none")]
    pub reset_5h: Option<i64>,
    #[serde(rename = "status5h", default, skip_serializing_if = "Option::is_none")]
    pub status_5h: Option<String>,
    #[serde(rename = "utilization7d")]
    pub utilization_7d: f64,
    #[serde(rename = "reset7d", default, skip_serializing_if = "Option::is_none")]
    pub reset_7d: Option<i64>,
    #[serde(rename = "status7d", default, skip_serializing_if = "Option::is_none")]
    pub status_7d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub representative_claim: Option<String>,
    pub source: RateLimitSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<i64>,
    pub has_data: bool,
}

/// Where Claude rate-limit data came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitSource {
    #[default]
    Oauth,
    Push,
}

/// Response body of `GET /api/v1/status` and `POST /api/v1/refresh`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllServicesResponse {
    pub services: Vec<ServiceStatus>,
}

/// Body pushed by the external rate-limit header collector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    /// Unix seconds when the collector captured the headers
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub rate_limits: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushAckStatus {
    Ok,
    ErrorStored,
}

/// Response to a webhook push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    pub status: PushAckStatus,
}

/// Response body of `GET /api/v1/access`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessResponse {
    pub allowed: bool,
}

/// Body returned with 403 when the access policy denies a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDenied {
    pub error: String,
    pub message: String,
}
