//! HTTP surface: status, refresh, access check and the Claude push webhook.

use ailimits_common::{AccessDenied, AccessResponse, AllServicesResponse, PushPayload};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::module::Aggregator;
use crate::module::aggregator::overall_status;
use crate::settings::SettingsStore;

const DENIED_MESSAGE: &str = "You don't have permission to view AI usage limits";

/// Decides whether an authenticated user may use the API.
///
/// Group or team membership checks live behind this trait.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// `Err` carries the message shown to the denied user
    async fn check(&self, user_id: &str) -> Result<(), String>;
}

/// `access.allowed_user_ids` from the live settings; an empty list allows everyone
pub struct AllowListPolicy {
    store: Arc<SettingsStore>,
}

impl AllowListPolicy {
    pub fn new(store: Arc<SettingsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AccessPolicy for AllowListPolicy {
    async fn check(&self, user_id: &str) -> Result<(), String> {
        let settings = self.store.snapshot().await;
        let allowed = &settings.access.allowed_user_ids;
        if allowed.is_empty() || allowed.iter().any(|id| id.trim() == user_id) {
            Ok(())
        } else {
            Err(DENIED_MESSAGE.to_string())
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub aggregator: Arc<Aggregator>,
    pub policy: Arc<dyn AccessPolicy>,
    /// Header the fronting proxy puts the user id in
    pub identity_header: String,
}

impl ApiState {
    /// State with the settings allow-list as access policy
    pub fn new(aggregator: Arc<Aggregator>, identity_header: impl Into<String>) -> Self {
        let policy = Arc::new(AllowListPolicy::new(aggregator.settings().clone()));
        Self {
            aggregator,
            policy,
            identity_header: identity_header.into(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/refresh", post(refresh))
        .route("/api/v1/claude-push", post(claude_push))
        .route("/api/v1/access", get(access))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_identity,
        ))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_identity(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let user_id = request
        .headers()
        .get(state.identity_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let Some(user_id) = user_id else {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    };

    if let Err(message) = state.policy.check(&user_id).await {
        tracing::warn!("Access denied for user {}", user_id);
        let body = AccessDenied {
            error: "access_denied".to_string(),
            message,
        };
        return (StatusCode::FORBIDDEN, Json(body)).into_response();
    }

    next.run(request).await
}

async fn get_status(State(state): State<ApiState>) -> Json<AllServicesResponse> {
    let services = state.aggregator.get_all_statuses().await;
    tracing::debug!("Serving status, overall {}", overall_status(&services));
    Json(AllServicesResponse { services })
}

async fn refresh(State(state): State<ApiState>) -> Json<AllServicesResponse> {
    let services = state.aggregator.refresh().await;
    Json(AllServicesResponse { services })
}

async fn claude_push(State(state): State<ApiState>, body: String) -> Response {
    let payload: PushPayload = match serde_json::from_str(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("Rejected Claude push: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
        }
    };

    match state.aggregator.ingest_push(payload).await {
        Some(ack) => Json(ack).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            "Claude is not configured for push delivery",
        )
            .into_response(),
    }
}

async fn access() -> Json<AccessResponse> {
    Json(AccessResponse { allowed: true })
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
