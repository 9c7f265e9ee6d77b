//! Identity provider client.
//!
//! Two calls against the IdP issuer:
//!
//! - `POST {issuer}/oauth/v2/introspect` (RFC 7662), authenticated with a
//!   JWT-profile client assertion signed by the service-account key.
//! - `GET {issuer}/oidc/v1/userinfo`, authenticated with the caller's own
//!   bearer token.
//!
//! # Security
//!
//! - The service-account key is loaded once, on first use. A load failure is
//!   memoized and returned on every later call without touching the disk.
//! - Raw tokens and signed assertions never appear in logs.
//! - Every request is bounded by the client timeout.

use crate::auth::claims::{IntrospectionResult, UserInfo};
use crate::observability::metrics;
use common::secret::{ExposeSecret, SecretString};
use common::service_account::{ServiceAccountError, ServiceAccountKey, CLIENT_ASSERTION_TYPE};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

// =============================================================================
// Constants
// =============================================================================

pub const INTROSPECTION_PATH: &str = "/oauth/v2/introspect";

pub const USERINFO_PATH: &str = "/oidc/v1/userinfo";

/// Upper bound on the TCP connect phase, independent of the request timeout.
const IDP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Error Types
// =============================================================================

/// IdP call failures.
///
/// `Clone` so a single outcome can be shared between coalesced callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdpError {
    /// Connection, TLS or timeout failure.
    #[error("Identity provider request failed: {0}")]
    Transport(String),

    /// 5xx or 429 from the IdP.
    #[error("Identity provider error: {0}")]
    Upstream(String),

    /// The IdP rejected the caller's token (userinfo 401/403).
    #[error("Identity provider rejected the token")]
    Unauthorized,

    /// Service-account key missing or unusable, or client authentication
    /// rejected by the IdP.
    #[error("Identity provider credentials unavailable: {0}")]
    Credential(String),

    /// Unexpected status or undecodable body.
    #[error("Invalid identity provider response: {0}")]
    InvalidResponse(String),
}

impl IdpError {
    /// Failures that mean the IdP itself is down or overloaded.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, IdpError::Transport(_) | IdpError::Upstream(_))
    }
}

impl From<ServiceAccountError> for IdpError {
    fn from(err: ServiceAccountError) -> Self {
        IdpError::Credential(err.to_string())
    }
}

// =============================================================================
// Trait
// =============================================================================

#[async_trait::async_trait]
pub trait IdpClient: Send + Sync {
    /// Introspect an opaque or JWT access token.
    async fn introspect(&self, token: &SecretString) -> Result<IntrospectionResult, IdpError>;

    /// Fetch userinfo using the token as the caller's bearer credential.
    async fn userinfo(&self, token: &SecretString) -> Result<UserInfo, IdpError>;
}

// =============================================================================
// HTTP Client
// =============================================================================

type LoadedKey = Result<Arc<ServiceAccountKey>, ServiceAccountError>;

pub struct HttpIdpClient {
    issuer_url: String,
    key_path: Option<String>,
    key: OnceCell<LoadedKey>,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for HttpIdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdpClient")
            .field("issuer_url", &self.issuer_url)
            .field("key_path", &self.key_path)
            .field("key_loaded", &self.key.initialized())
            .finish_non_exhaustive()
    }
}

impl HttpIdpClient {
    /// Create a client that loads its service-account key from `key_path`
    /// on first introspection.
    pub fn new(issuer_url: String, key_path: Option<String>, timeout: Duration) -> Self {
        Self {
            issuer_url: issuer_url.trim_end_matches('/').to_string(),
            key_path,
            key: OnceCell::new(),
            http_client: build_http_client(timeout),
        }
    }

    /// Create a client with an already-loaded key.
    pub fn with_key(issuer_url: String, key: ServiceAccountKey, timeout: Duration) -> Self {
        Self {
            issuer_url: issuer_url.trim_end_matches('/').to_string(),
            key_path: None,
            key: OnceCell::new_with(Some(Ok(Arc::new(key)))),
            http_client: build_http_client(timeout),
        }
    }

    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    async fn service_account_key(&self) -> Result<Arc<ServiceAccountKey>, IdpError> {
        let loaded = self
            .key
            .get_or_init(|| async {
                let result = load_key(self.key_path.as_deref()).await;
                match &result {
                    Ok(key) => tracing::info!(
                        target: "auth.idp",
                        key_id = %key.key_id(),
                        "Service account key loaded"
                    ),
                    Err(e) => tracing::error!(
                        target: "auth.idp",
                        error = %e,
                        "Service account key unavailable; introspection disabled"
                    ),
                }
                result
            })
            .await;

        loaded.clone().map_err(IdpError::from)
    }
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(IDP_CONNECT_TIMEOUT.min(timeout))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(target: "auth.idp", error = %e, "Failed to build HTTP client with custom config, using defaults");
            reqwest::Client::new()
        })
}

async fn load_key(path: Option<&str>) -> LoadedKey {
    let path = path.ok_or(ServiceAccountError::MissingField(
        "path (AUTH_SERVICE_ACCOUNT_KEY_PATH is not set)",
    ))?;
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ServiceAccountError::Io(format!("{path}: {e}")))?;
    ServiceAccountKey::from_json(&contents).map(Arc::new)
}

fn transport_error(endpoint: &'static str, e: &reqwest::Error) -> IdpError {
    let kind = if e.is_timeout() { "timeout" } else { "connect" };
    tracing::warn!(target: "auth.idp", endpoint, kind, error = %e, "IdP request failed");
    IdpError::Transport(format!("{endpoint} {kind}: {e}"))
}

#[async_trait::async_trait]
impl IdpClient for HttpIdpClient {
    #[instrument(skip_all, name = "auth.idp.introspect")]
    async fn introspect(&self, token: &SecretString) -> Result<IntrospectionResult, IdpError> {
        let key = self.service_account_key().await?;
        let assertion = key.assertion(&self.issuer_url, chrono::Utc::now().timestamp())?;

        let url = format!("{}{}", self.issuer_url, INTROSPECTION_PATH);
        let form_body = [
            ("token", token.expose_secret()),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.expose_secret()),
        ];

        let start = Instant::now();
        let response = self
            .http_client
            .post(&url)
            .form(&form_body)
            .send()
            .await
            .map_err(|e| {
                metrics::record_idp_request("introspect", "transport_error", start.elapsed());
                transport_error("introspect", &e)
            })?;

        let status = response.status();
        let result = if status.is_success() {
            response
                .json::<IntrospectionResult>()
                .await
                .map_err(|e| IdpError::InvalidResponse(format!("introspection body: {e}")))
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            tracing::error!(
                target: "auth.idp",
                status = %status,
                "IdP rejected service-account client authentication"
            );
            Err(IdpError::Credential(format!(
                "introspection client authentication rejected: {status}"
            )))
        } else if status.is_server_error() || status.as_u16() == 429 {
            tracing::warn!(target: "auth.idp", status = %status, "IdP introspection server error");
            Err(IdpError::Upstream(format!("introspection status {status}")))
        } else {
            tracing::warn!(target: "auth.idp", status = %status, "Unexpected introspection status");
            Err(IdpError::InvalidResponse(format!(
                "introspection status {status}"
            )))
        };

        metrics::record_idp_request("introspect", outcome_label(&result), start.elapsed());
        result
    }

    #[instrument(skip_all, name = "auth.idp.userinfo")]
    async fn userinfo(&self, token: &SecretString) -> Result<UserInfo, IdpError> {
        let url = format!("{}{}", self.issuer_url, USERINFO_PATH);

        let start = Instant::now();
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                metrics::record_idp_request("userinfo", "transport_error", start.elapsed());
                transport_error("userinfo", &e)
            })?;

        let status = response.status();
        let result = if status.is_success() {
            response
                .json::<UserInfo>()
                .await
                .map_err(|e| IdpError::InvalidResponse(format!("userinfo body: {e}")))
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            tracing::debug!(target: "auth.idp", status = %status, "Userinfo rejected token");
            Err(IdpError::Unauthorized)
        } else if status.is_server_error() || status.as_u16() == 429 {
            tracing::warn!(target: "auth.idp", status = %status, "IdP userinfo server error");
            Err(IdpError::Upstream(format!("userinfo status {status}")))
        } else {
            tracing::warn!(target: "auth.idp", status = %status, "Unexpected userinfo status");
            Err(IdpError::InvalidResponse(format!("userinfo status {status}")))
        };

        metrics::record_idp_request("userinfo", outcome_label(&result), start.elapsed());
        result
    }
}

fn outcome_label<T>(result: &Result<T, IdpError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(IdpError::Transport(_)) => "transport_error",
        Err(IdpError::Upstream(_)) => "upstream_error",
        Err(IdpError::Unauthorized) => "unauthorized",
        Err(IdpError::Credential(_)) => "credential_error",
        Err(IdpError::InvalidResponse(_)) => "invalid_response",
    }
}

// =============================================================================
// Mock
// =============================================================================

/// In-memory IdP for pipeline tests.
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock IdP keyed by raw token.
    ///
    /// Unknown tokens introspect as inactive and fail userinfo with
    /// `Unauthorized`.
    #[derive(Default)]
    pub struct MockIdpClient {
        introspections: Mutex<HashMap<String, Result<IntrospectionResult, IdpError>>>,
        userinfos: Mutex<HashMap<String, Result<UserInfo, IdpError>>>,
        introspection_error: Mutex<Option<IdpError>>,
        userinfo_error: Mutex<Option<IdpError>>,
        delay: Option<Duration>,
        introspect_calls: AtomicUsize,
        userinfo_calls: AtomicUsize,
    }

    impl MockIdpClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// Delay every call, to widen the window for concurrent callers.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Register an active token.
        pub fn with_active_token(self, token: &str, subject: &str, scope: &str, exp: i64) -> Self {
            let mut result = IntrospectionResult::inactive();
            result.active = true;
            result.sub = Some(subject.to_string());
            result.scope = Some(scope.to_string());
            result.exp = Some(exp);
            self.set_introspection(token, Ok(result));
            self
        }

        pub fn with_userinfo(self, token: &str, subject: &str, email: Option<&str>) -> Self {
            self.userinfos.lock().insert(
                token.to_string(),
                Ok(UserInfo {
                    sub: subject.to_string(),
                    email: email.map(str::to_string),
                    name: None,
                    preferred_username: None,
                }),
            );
            self
        }

        pub fn set_introspection(&self, token: &str, result: Result<IntrospectionResult, IdpError>) {
            self.introspections.lock().insert(token.to_string(), result);
        }

        /// Make every introspection fail with `err`, or clear it with `None`.
        pub fn set_introspection_error(&self, err: Option<IdpError>) {
            *self.introspection_error.lock() = err;
        }

        /// Make every userinfo call fail with `err`, or clear it with `None`.
        pub fn set_userinfo_error(&self, err: Option<IdpError>) {
            *self.userinfo_error.lock() = err;
        }

        pub fn introspect_calls(&self) -> usize {
            self.introspect_calls.load(Ordering::SeqCst)
        }

        pub fn userinfo_calls(&self) -> usize {
            self.userinfo_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl IdpClient for MockIdpClient {
        async fn introspect(
            &self,
            token: &SecretString,
        ) -> Result<IntrospectionResult, IdpError> {
            self.introspect_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if let Some(err) = self.introspection_error.lock().clone() {
                return Err(err);
            }

            self.introspections
                .lock()
                .get(token.expose_secret())
                .cloned()
                .unwrap_or_else(|| Ok(IntrospectionResult::inactive()))
        }

        async fn userinfo(&self, token: &SecretString) -> Result<UserInfo, IdpError> {
            self.userinfo_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if let Some(err) = self.userinfo_error.lock().clone() {
                return Err(err);
            }

            self.userinfos
                .lock()
                .get(token.expose_secret())
                .cloned()
                .unwrap_or(Err(IdpError::Unauthorized))
        }
    }

}

// =============================================================================
// Tests
// =============================================================================
