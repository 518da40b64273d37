use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use supportline_agent::capability::JsonRpcTransport;

#[derive(Clone)]
pub struct HealthState {
    transport: Arc<JsonRpcTransport>,
}

impl HealthState {
    pub fn new(transport: Arc<JsonRpcTransport>) -> Self {
        Self { transport }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub capability_provider: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let capability_provider = provider_check(&state.transport).await;
    let healthy = capability_provider.status == "ready";

    let payload = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        capability_provider,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn provider_check(transport: &JsonRpcTransport) -> HealthCheck {
    match transport.list_tools().await {
        Ok(tools) => HealthCheck {
            status: "ready",
            detail: format!("capability provider advertises {} tools", tools.len()),
        },
        Err(failure) => HealthCheck {
            status: "degraded",
            detail: format!(
                "capability provider check failed ({}): {}",
                failure.kind.as_str(),
                failure.message
            ),
        },
    }
}
