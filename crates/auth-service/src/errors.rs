//! Auth service error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic to avoid
//! leaking internal details. Actual errors are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Auth service error type.
///
/// Maps to HTTP status codes:
/// - MissingCredential: 400 Bad Request
/// - InvalidCredential: 401 Unauthorized (with `WWW-Authenticate`)
/// - Forbidden: 403 Forbidden (with `missing_scopes`)
/// - UpstreamUnavailable: 503 Service Unavailable
/// - NotImplemented: 501 Not Implemented
/// - IdpConfiguration, Database, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No credential presented")]
    MissingCredential,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Missing required scopes: {}", missing.join(" "))]
    Forbidden { missing: Vec<String> },

    #[error("Identity provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Identity provider misconfigured: {0}")]
    IdpConfiguration(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error")]
    Internal,
}

/// Message returned for every 401, regardless of which stage rejected.
pub const INVALID_CREDENTIAL_MESSAGE: &str = "The access token is invalid or expired";

impl AuthError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::MissingCredential => 400,
            AuthError::InvalidCredential(_) => 401,
            AuthError::Forbidden { .. } => 403,
            AuthError::UpstreamUnavailable(_) => 503,
            AuthError::NotImplemented(_) => 501,
            AuthError::IdpConfiguration(_) | AuthError::Database(_) | AuthError::Internal => 500,
        }
    }

    /// Short, bounded label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::InvalidCredential(_) => "invalid_credential",
            AuthError::Forbidden { .. } => "forbidden",
            AuthError::UpstreamUnavailable(_) => "upstream_unavailable",
            AuthError::IdpConfiguration(_) => "idp_configuration",
            AuthError::NotImplemented(_) => "not_implemented",
            AuthError::Database(_) => "database",
            AuthError::Internal => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_scopes: Option<Vec<String>>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message, missing_scopes) = match &self {
            AuthError::MissingCredential => (
                StatusCode::BAD_REQUEST,
                "MISSING_CREDENTIAL",
                "A bearer token is required".to_string(),
                None,
            ),
            AuthError::InvalidCredential(reason) => {
                tracing::debug!(target: "auth.errors", reason = %reason, "Credential rejected");
                (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_CREDENTIAL",
                    INVALID_CREDENTIAL_MESSAGE.to_string(),
                    None,
                )
            }
            AuthError::Forbidden { missing } => (
                StatusCode::FORBIDDEN,
                "INSUFFICIENT_SCOPE",
                format!("Requires scopes: {}", missing.join(" ")),
                Some(missing.clone()),
            ),
            AuthError::UpstreamUnavailable(reason) => {
                tracing::warn!(target: "auth.availability", reason = %reason, "Identity provider unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UPSTREAM_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                    None,
                )
            }
            AuthError::IdpConfiguration(err) => {
                tracing::error!(target: "auth.idp", error = %err, "Identity provider misconfigured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "IDP_CONFIGURATION",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            AuthError::NotImplemented(what) => (
                StatusCode::NOT_IMPLEMENTED,
                "NOT_IMPLEMENTED",
                format!("Not implemented: {}", what),
                None,
            ),
            AuthError::Database(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "auth.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                    None,
                )
            }
            AuthError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                missing_scopes,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"gatekeeper\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Database(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display() {
        assert_eq!(
            AuthError::MissingCredential.to_string(),
            "No credential presented"
        );
        assert_eq!(
            AuthError::InvalidCredential("expired".to_string()).to_string(),
            "Invalid credential: expired"
        );
        assert_eq!(
            AuthError::Forbidden {
                missing: vec!["org:write".to_string(), "project:write".to_string()]
            }
            .to_string(),
            "Missing required scopes: org:write project:write"
        );
        assert_eq!(AuthError::Internal.to_string(), "Internal server error");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::MissingCredential.status_code(), 400);
        assert_eq!(
            AuthError::InvalidCredential("x".to_string()).status_code(),
            401
        );
        assert_eq!(AuthError::Forbidden { missing: vec![] }.status_code(), 403);
        assert_eq!(
            AuthError::UpstreamUnavailable("x".to_string()).status_code(),
            503
        );
        assert_eq!(AuthError::NotImplemented("x".to_string()).status_code(), 501);
        assert_eq!(
            AuthError::IdpConfiguration("x".to_string()).status_code(),
            500
        );
        assert_eq!(AuthError::Database("x".to_string()).status_code(), 500);
        assert_eq!(AuthError::Internal.status_code(), 500);
    }

    #[tokio::test]
    async fn test_missing_credential_is_distinct_from_invalid() {
        let missing = AuthError::MissingCredential.into_response();
        let invalid = AuthError::InvalidCredential("bad".to_string()).into_response();

        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert!(missing.headers().get("WWW-Authenticate").is_none());
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);

        let body = read_body_json(missing.into_body()).await;
        assert_eq!(body["error"]["code"], "MISSING_CREDENTIAL");
    }

    #[tokio::test]
    async fn test_invalid_credential_is_generic_with_www_authenticate() {
        let response =
            AuthError::InvalidCredential("introspection: token inactive".to_string())
                .into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let header = response
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(header.contains("Bearer realm=\"gatekeeper\""));
        assert!(header.contains("error=\"invalid_token\""));

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INVALID_CREDENTIAL");
        assert_eq!(body["error"]["message"], INVALID_CREDENTIAL_MESSAGE);
        assert!(body["error"].get("missing_scopes").is_none());
    }

    #[tokio::test]
    async fn test_forbidden_lists_missing_scopes() {
        let response = AuthError::Forbidden {
            missing: vec!["project:write".to_string()],
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INSUFFICIENT_SCOPE");
        assert_eq!(
            body["error"]["missing_scopes"],
            serde_json::json!(["project:write"])
        );
    }

    #[tokio::test]
    async fn test_database_error_is_generic() {
        let response =
            AuthError::Database("relation user_profiles does not exist".to_string())
                .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "DATABASE_ERROR");
        assert_eq!(
            body["error"]["message"],
            "An internal database error occurred"
        );
    }

    #[tokio::test]
    async fn test_upstream_unavailable_is_503() {
        let response = AuthError::UpstreamUnavailable("timeout".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["message"], "Service temporarily unavailable");
    }

    #[test]
    fn test_from_sqlx_error() {
        let err: AuthError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AuthError::Database(_)));
    }
}
