use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::health::CheckResult;
use crate::metrics::metrics_handler;
use crate::state::AppState;

pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Builds the router with the health check mounted at `health_path`.
pub fn build_app(state: AppState, health_path: &str) -> Router {
    let health_path = normalize_path(health_path);

    Router::new()
        .route(&health_path, get(health))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        DEFAULT_HEALTH_PATH.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: String,
    checks: Vec<CheckResult>,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let check = state.health.last().await;
    let (code, status) = if check.healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    let body = HealthBody {
        status,
        version: state.version.clone(),
        checks: vec![check],
    };
    (code, Json(body))
}

#[cfg(test)]
mod tests {
    use super::normalize_path;

    #[test]
    fn health_path_is_normalized() {
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("status"), "/status");
        assert_eq!(normalize_path("  "), "/health");
    }
}
