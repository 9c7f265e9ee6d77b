//! HTTP middleware.
//!
//! - `auth` - credential authentication and per-route scope gates
//! - `http_metrics` - request metrics for every response

pub mod auth;
pub mod http_metrics;

pub use auth::{require_auth, require_scopes, AuthState, AuthUserExt, RequiredScopes};
pub use http_metrics::http_metrics_middleware;
