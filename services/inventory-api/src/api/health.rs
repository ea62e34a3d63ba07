//! Health check endpoints.
//!
//! Used by load balancers and orchestration systems to decide whether the
//! service may receive traffic.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

const SERVICE_NAME: &str = "fleetsync";

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: String,

    pub service: String,

    pub version: String,

    /// ISO 8601.
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<DependencyHealth>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct DependencyHealth {
    pub database: DependencyStatus,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct DependencyStatus {
    /// "ok" or "unavailable".
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

fn response(status: &str, dependencies: Option<DependencyHealth>) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        dependencies,
    }
}

/// Liveness with a body. Does not check dependencies.
async fn healthz() -> impl IntoResponse {
    Json(response("ok", None))
}

/// Readiness: 503 while the database is unreachable.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let db_result = state.db().health_check().await;
    let db_ok = db_result.is_ok();

    if let Err(e) = &db_result {
        tracing::warn!(error = %e, "Readiness check failed");
    }

    let dependencies = DependencyHealth {
        database: DependencyStatus {
            status: if db_ok { "ok" } else { "unavailable" }.to_string(),
            message: db_result.err().map(|e| e.to_string()),
        },
    };

    let body = Json(response(if db_ok { "ok" } else { "degraded" }, Some(dependencies)));
    if db_ok {
        (StatusCode::OK, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body)
    }
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::SyncConfig;
    use crate::db::{Database, DbConfig};

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: HealthResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.service, "fleetsync");
        assert!(body.dependencies.is_none());
    }

    #[tokio::test]
    async fn test_livez_returns_ok() {
        let response = livez().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_reports_unreachable_database() {
        let config = DbConfig {
            database_url: "postgres://nobody@127.0.0.1:1/none".to_string(),
            acquire_timeout: Duration::from_millis(200),
            min_connections: 0,
            ..Default::default()
        };
        let db = Database::connect_lazy(&config).unwrap();
        let app = routes().with_state(AppState::new(db, SyncConfig::default(), "test"));

        let response = app
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: HealthResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.status, "degraded");
        assert_eq!(body.dependencies.unwrap().database.status, "unavailable");
    }
}
