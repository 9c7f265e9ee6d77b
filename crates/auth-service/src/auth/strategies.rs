//! Authentication stages.
//!
//! Each stage inspects the raw credential and either accepts it, declines it
//! (`NoMatch`, the next stage runs), or rejects it outright. A stage error is
//! not a rejection: the pipeline logs it and moves on.

use crate::auth::circuit_breaker::CircuitBreaker;
use crate::auth::claims::{
    ApiTokenBinding, CredentialSource, IntrospectionResult, TokenClaims, VerifiedCredential,
};
use crate::auth::coalescer::SingleFlight;
use crate::auth::dev_tokens;
use crate::auth::idp_client::{IdpClient, IdpError};
use crate::auth::token_hash::{api_token_hash, introspection_cache_key};
use crate::errors::AuthError;
use crate::observability::{hash_for_correlation, metrics};
use crate::repositories::api_tokens::ApiTokenStore;
use crate::repositories::introspection_cache::IntrospectionCache;
use common::scope::ScopeSet;
use common::secret::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::instrument;

/// Fixed principal for the standalone service key.
pub const STANDALONE_SUBJECT: &str = "standalone-service";

/// Result of a single stage.
#[derive(Debug)]
pub enum StageOutcome {
    /// The credential is valid; stop here.
    Authenticated(VerifiedCredential),
    /// Not this stage's kind of credential; try the next one.
    NoMatch,
    /// The credential is definitively invalid; stop with 401.
    Rejected(String),
}

#[async_trait::async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Stable stage name, used as a metric label.
    fn name(&self) -> &'static str;

    async fn attempt(&self, token: &SecretString) -> Result<StageOutcome, AuthError>;
}

// =============================================================================
// Standalone key
// =============================================================================

pub struct StandaloneKeyStrategy {
    key: SecretString,
}

impl StandaloneKeyStrategy {
    pub fn new(key: SecretString) -> Self {
        Self { key }
    }
}

#[async_trait::async_trait]
impl AuthStrategy for StandaloneKeyStrategy {
    fn name(&self) -> &'static str {
        "standalone"
    }

    async fn attempt(&self, token: &SecretString) -> Result<StageOutcome, AuthError> {
        let expected = self.key.expose_secret().as_bytes();
        let presented = token.expose_secret().as_bytes();

        // ct_eq on slices of different length returns false without
        // comparing contents.
        if !bool::from(expected.ct_eq(presented)) {
            return Ok(StageOutcome::NoMatch);
        }

        let claims = TokenClaims {
            subject: STANDALONE_SUBJECT.to_string(),
            email: None,
            scopes: ScopeSet::all(),
            expires_at: None,
        };
        Ok(StageOutcome::Authenticated(VerifiedCredential::new(
            claims,
            CredentialSource::Standalone,
        )))
    }
}

// =============================================================================
// Development tokens
// =============================================================================

pub struct DevTokenStrategy;

#[async_trait::async_trait]
impl AuthStrategy for DevTokenStrategy {
    fn name(&self) -> &'static str {
        "dev_token"
    }

    async fn attempt(&self, token: &SecretString) -> Result<StageOutcome, AuthError> {
        let Some(identity) = dev_tokens::resolve(token.expose_secret()) else {
            return Ok(StageOutcome::NoMatch);
        };

        tracing::debug!(
            target: "auth.pipeline",
            subject = %hash_for_correlation(&identity.subject),
            "Accepted development token"
        );

        let claims = TokenClaims {
            subject: identity.subject,
            email: Some(identity.email),
            scopes: identity.scopes,
            expires_at: None,
        };
        Ok(StageOutcome::Authenticated(VerifiedCredential::new(
            claims,
            CredentialSource::DevToken,
        )))
    }
}

// =============================================================================
// API tokens
// =============================================================================

pub struct ApiTokenStrategy {
    prefix: String,
    store: Arc<dyn ApiTokenStore>,
}

impl ApiTokenStrategy {
    pub fn new(prefix: impl Into<String>, store: Arc<dyn ApiTokenStore>) -> Self {
        Self {
            prefix: prefix.into(),
            store,
        }
    }
}

#[async_trait::async_trait]
impl AuthStrategy for ApiTokenStrategy {
    fn name(&self) -> &'static str {
        "api_token"
    }

    #[instrument(skip_all, name = "auth.stage.api_token")]
    async fn attempt(&self, token: &SecretString) -> Result<StageOutcome, AuthError> {
        let raw = token.expose_secret();
        if !raw.starts_with(&self.prefix) {
            return Ok(StageOutcome::NoMatch);
        }

        let Some(record) = self.store.find_active(&api_token_hash(raw)).await? else {
            return Ok(StageOutcome::Rejected(
                "API token unknown or revoked".to_string(),
            ));
        };

        let claims = TokenClaims {
            subject: record.external_subject,
            email: record.email,
            scopes: record.scopes.into_iter().collect(),
            expires_at: None,
        };
        let binding = ApiTokenBinding {
            token_id: record.id,
            project_id: record.project_id,
        };
        Ok(StageOutcome::Authenticated(
            VerifiedCredential::new(claims, CredentialSource::ApiToken).with_api_token(binding),
        ))
    }
}

// =============================================================================
// Cached introspection
// =============================================================================

pub struct CachedIntrospectionStrategy {
    cache: Arc<dyn IntrospectionCache>,
}

impl CachedIntrospectionStrategy {
    pub fn new(cache: Arc<dyn IntrospectionCache>) -> Self {
        Self { cache }
    }
}

#[async_trait::async_trait]
impl AuthStrategy for CachedIntrospectionStrategy {
    fn name(&self) -> &'static str {
        "cache"
    }

    #[instrument(skip_all, name = "auth.stage.cache")]
    async fn attempt(&self, token: &SecretString) -> Result<StageOutcome, AuthError> {
        let key = introspection_cache_key(token.expose_secret());

        let cached = match self.cache.get(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                metrics::record_cache_lookup("error");
                return Err(e);
            }
        };

        let Some(result) = cached else {
            metrics::record_cache_lookup("miss");
            return Ok(StageOutcome::NoMatch);
        };

        if !result.active {
            metrics::record_cache_lookup("negative_hit");
            return Ok(StageOutcome::Rejected("token inactive (cached)".to_string()));
        }

        // The row's expiry is computed from the database clock; the token's
        // own exp is authoritative.
        if result.is_expired_at(chrono::Utc::now().timestamp_millis()) {
            metrics::record_cache_lookup("expired_hit");
            return Ok(StageOutcome::Rejected("token expired (cached)".to_string()));
        }

        metrics::record_cache_lookup("hit");
        Ok(match result.claims() {
            Some(claims) => StageOutcome::Authenticated(
                VerifiedCredential::new(claims, CredentialSource::Cache)
                    .with_display_name(result.display_name()),
            ),
            None => StageOutcome::Rejected("cached introspection has no subject".to_string()),
        })
    }
}

// =============================================================================
// Remote introspection
// =============================================================================

/// How long to cache `result`, or `None` if it must not be cached.
///
/// Inactive results use the negative TTL. Active results are cached for the
/// configured TTL, capped at the token's remaining lifetime in milliseconds;
/// a token that has already expired is not cached.
pub fn cache_ttl(
    result: &IntrospectionResult,
    now_ms: i64,
    ttl: Duration,
    negative_ttl: Duration,
) -> Option<Duration> {
    if !result.active {
        return Some(negative_ttl);
    }
    match result.remaining_lifetime_ms(now_ms) {
        Some(remaining) => u64::try_from(remaining)
            .ok()
            .filter(|ms| *ms > 0)
            .map(|ms| ttl.min(Duration::from_millis(ms))),
        None => Some(ttl),
    }
}

type SharedIntrospection = Result<IntrospectionResult, IdpError>;

pub struct RemoteIntrospectionStrategy {
    idp: Arc<dyn IdpClient>,
    cache: Arc<dyn IntrospectionCache>,
    breaker: Arc<CircuitBreaker>,
    flights: SingleFlight<SharedIntrospection>,
    ttl: Duration,
    negative_ttl: Duration,
}

impl RemoteIntrospectionStrategy {
    pub fn new(
        idp: Arc<dyn IdpClient>,
        cache: Arc<dyn IntrospectionCache>,
        breaker: Arc<CircuitBreaker>,
        ttl: Duration,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            idp,
            cache,
            breaker,
            flights: SingleFlight::new(),
            ttl,
            negative_ttl,
        }
    }

    /// The unit of work shared by coalesced callers: introspect, then write
    /// the result back so later requests hit the cache.
    async fn introspect_and_cache(&self, token: &SecretString, key: &str) -> SharedIntrospection {
        match self.idp.introspect(token).await {
            Ok(result) => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                if let Some(ttl) = cache_ttl(&result, now_ms, self.ttl, self.negative_ttl) {
                    if let Err(e) = self.cache.put(key, &result, ttl).await {
                        tracing::warn!(
                            target: "auth.pipeline",
                            token = %hash_for_correlation(key),
                            error = %e,
                            "Failed to cache introspection result"
                        );
                    }
                }
                Ok(result)
            }
            Err(e) => {
                if e.is_unavailable() {
                    self.breaker.trip();
                }
                Err(e)
            }
        }
    }
}

#[async_trait::async_trait]
impl AuthStrategy for RemoteIntrospectionStrategy {
    fn name(&self) -> &'static str {
        "introspection"
    }

    #[instrument(skip_all, name = "auth.stage.introspection")]
    async fn attempt(&self, token: &SecretString) -> Result<StageOutcome, AuthError> {
        if !self.breaker.allow() {
            tracing::debug!(
                target: "auth.pipeline",
                "Circuit breaker open, skipping introspection"
            );
            return Ok(StageOutcome::NoMatch);
        }

        let key = introspection_cache_key(token.expose_secret());
        let shared = self
            .flights
            .run(&key, || self.introspect_and_cache(token, &key))
            .await;

        match shared {
            Ok(result) if !result.active => {
                Ok(StageOutcome::Rejected("token inactive".to_string()))
            }
            Ok(result) => {
                if result.is_expired_at(chrono::Utc::now().timestamp_millis()) {
                    return Ok(StageOutcome::Rejected("token expired".to_string()));
                }
                Ok(match result.claims() {
                    Some(claims) => StageOutcome::Authenticated(
                        VerifiedCredential::new(claims, CredentialSource::Introspection)
                            .with_display_name(result.display_name()),
                    ),
                    None => StageOutcome::Rejected("introspection has no subject".to_string()),
                })
            }
            Err(IdpError::Unauthorized) => Ok(StageOutcome::Rejected(
                "identity provider rejected the token".to_string(),
            )),
            Err(IdpError::Credential(msg)) => Err(AuthError::IdpConfiguration(msg)),
            Err(e) => Err(AuthError::UpstreamUnavailable(e.to_string())),
        }
    }
}

// =============================================================================
// Userinfo fallback
// =============================================================================

/// Accepts any token the IdP's userinfo endpoint accepts.
///
/// Userinfo carries no scope claim, so the bearer is granted the full
/// catalog. This is broader than the token may warrant.
///
/// Shares the introspection stage's breaker: an unavailable IdP trips it, and
/// while it is open this stage is skipped too.
pub struct UserinfoStrategy {
    idp: Arc<dyn IdpClient>,
    breaker: Arc<CircuitBreaker>,
}

impl UserinfoStrategy {
    pub fn new(idp: Arc<dyn IdpClient>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { idp, breaker }
    }
}

#[async_trait::async_trait]
impl AuthStrategy for UserinfoStrategy {
    fn name(&self) -> &'static str {
        "userinfo"
    }

    #[instrument(skip_all, name = "auth.stage.userinfo")]
    async fn attempt(&self, token: &SecretString) -> Result<StageOutcome, AuthError> {
        if !self.breaker.allow() {
            tracing::debug!(
                target: "auth.pipeline",
                "Circuit breaker open, skipping userinfo"
            );
            return Ok(StageOutcome::NoMatch);
        }

        match self.idp.userinfo(token).await {
            Ok(info) if !info.sub.trim().is_empty() => {
                tracing::info!(
                    target: "auth.pipeline",
                    subject = %hash_for_correlation(&info.sub),
                    "Authenticated via userinfo fallback; granting full scope catalog"
                );
                let display_name = info.display_name();
                let claims = TokenClaims {
                    subject: info.sub,
                    email: info.email,
                    scopes: ScopeSet::all(),
                    expires_at: None,
                };
                Ok(StageOutcome::Authenticated(
                    VerifiedCredential::new(claims, CredentialSource::Userinfo)
                        .with_display_name(display_name),
                ))
            }
            Ok(_) => Ok(StageOutcome::Rejected("userinfo has no subject".to_string())),
            Err(IdpError::Unauthorized) => Ok(StageOutcome::Rejected(
                "userinfo rejected the token".to_string(),
            )),
            Err(IdpError::Credential(msg)) => Err(AuthError::IdpConfiguration(msg)),
            Err(e) => {
                if e.is_unavailable() {
                    self.breaker.trip();
                }
                Err(AuthError::UpstreamUnavailable(e.to_string()))
            }
        }
    }
}

// =============================================================================
// Local signature verification
// =============================================================================

/// Placeholder for offline JWT verification against the issuer's JWKS.
pub struct LocalJwtStrategy;

#[async_trait::async_trait]
impl AuthStrategy for LocalJwtStrategy {
    fn name(&self) -> &'static str {
        "local_jwt"
    }

    async fn attempt(&self, _token: &SecretString) -> Result<StageOutcome, AuthError> {
        Err(AuthError::NotImplemented(
            "local JWT signature verification".to_string(),
        ))
    }
}
