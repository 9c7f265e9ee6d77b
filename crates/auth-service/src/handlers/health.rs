//! Health check handlers.
//!
//! - `/health`: liveness, returns OK while the process is running
//! - `/ready`: readiness, checks the database

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness probe. Checks no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe. 200 when the database answers, 503 otherwise.
///
/// The error message is generic; the cause is logged.
#[tracing::instrument(skip_all, name = "auth.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let identity_provider = if state.config.issuer_url.is_some() {
        "configured"
    } else {
        "disabled"
    };

    if let Err(e) = sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        tracing::warn!(target: "auth.health", error = %e, "Readiness check failed: database error");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                database: Some("unhealthy"),
                identity_provider: Some(identity_provider),
                error: Some("Service dependencies unavailable".to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            database: Some("healthy"),
            identity_provider: Some(identity_provider),
            error: None,
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }

    #[test]
    fn test_readiness_response_omits_empty_fields() {
        let json = serde_json::to_string(&ReadinessResponse {
            status: "ready",
            database: Some("healthy"),
            identity_provider: Some("disabled"),
            error: None,
        })
        .unwrap();

        assert!(json.contains("\"status\":\"ready\""));
        assert!(json.contains("\"identity_provider\":\"disabled\""));
        assert!(!json.contains("\"error\""));
    }
}
