//! Response bodies shared across handlers.

use serde::Serialize;

/// Readiness probe response (`/ready`).
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready".
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'static str>,

    /// "configured" when an issuer is set, "disabled" otherwise. The IdP is
    /// not probed; an unreachable IdP degrades authentication, not readiness.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<&'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
