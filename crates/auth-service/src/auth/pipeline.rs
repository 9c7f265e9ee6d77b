//! Ordered authentication pipeline.
//!
//! Stages run strictly in sequence until one accepts or rejects the
//! credential:
//!
//! 1. Standalone service key (standalone mode only)
//! 2. Development tokens (outside production)
//! 3. Local API tokens
//! 4. Cached introspection
//! 5. Remote introspection (breaker-gated, coalesced per token)
//! 6. Userinfo fallback
//! 7. Local signature verification (not implemented, always errors)
//!
//! A stage error is logged and the next stage runs. When every stage has
//! declined or failed, the caller gets a generic `InvalidCredential`; the
//! underlying reason stays in the logs.

use crate::auth::circuit_breaker::CircuitBreaker;
use crate::auth::claims::{AuthUser, VerifiedCredential};
use crate::auth::idp_client::IdpClient;
use crate::auth::strategies::{
    ApiTokenStrategy, AuthStrategy, CachedIntrospectionStrategy, DevTokenStrategy,
    LocalJwtStrategy, RemoteIntrospectionStrategy, StageOutcome, StandaloneKeyStrategy,
    UserinfoStrategy,
};
use crate::config::Config;
use crate::errors::AuthError;
use crate::observability::{hash_for_correlation, metrics};
use crate::repositories::api_tokens::ApiTokenStore;
use crate::repositories::introspection_cache::IntrospectionCache;
use crate::services::user_profiles::ProfileResolver;
use common::secret::SecretString;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Collaborators the pipeline is assembled from.
pub struct PipelineDeps {
    pub api_tokens: Arc<dyn ApiTokenStore>,
    pub cache: Arc<dyn IntrospectionCache>,
    /// `None` disables every stage that talks to the IdP.
    pub idp: Option<Arc<dyn IdpClient>>,
    pub profiles: Arc<dyn ProfileResolver>,
}

pub struct AuthPipeline {
    stages: Vec<Arc<dyn AuthStrategy>>,
    profiles: Arc<dyn ProfileResolver>,
}

impl AuthPipeline {
    pub fn new(stages: Vec<Arc<dyn AuthStrategy>>, profiles: Arc<dyn ProfileResolver>) -> Self {
        Self { stages, profiles }
    }

    /// Assemble the stages enabled by `config`.
    pub fn from_config(config: &Config, deps: PipelineDeps) -> Self {
        let mut stages: Vec<Arc<dyn AuthStrategy>> = Vec::new();

        if config.standalone_mode {
            if let Some(key) = &config.standalone_api_key {
                stages.push(Arc::new(StandaloneKeyStrategy::new(key.clone())));
            }
        }

        if config.dev_tokens_enabled() {
            tracing::warn!(
                target: "auth.pipeline",
                app_env = %config.app_env,
                "Development tokens are enabled"
            );
            stages.push(Arc::new(DevTokenStrategy));
        }

        stages.push(Arc::new(ApiTokenStrategy::new(
            config.api_token_prefix.clone(),
            deps.api_tokens,
        )));

        if let Some(idp) = deps.idp {
            // One breaker for both IdP stages.
            let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker_cooldown()));
            if config.introspection_enabled {
                stages.push(Arc::new(CachedIntrospectionStrategy::new(
                    deps.cache.clone(),
                )));
                stages.push(Arc::new(RemoteIntrospectionStrategy::new(
                    idp.clone(),
                    deps.cache,
                    breaker.clone(),
                    config.introspection_cache_ttl(),
                    config.negative_cache_ttl(),
                )));
            }
            if config.userinfo_fallback_enabled {
                stages.push(Arc::new(UserinfoStrategy::new(idp, breaker)));
            }
        }

        stages.push(Arc::new(LocalJwtStrategy));

        let pipeline = Self::new(stages, deps.profiles);
        tracing::info!(
            target: "auth.pipeline",
            stages = ?pipeline.stage_names(),
            "Authentication pipeline assembled"
        );
        pipeline
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Authenticate a credential and resolve the caller's profile.
    ///
    /// # Errors
    ///
    /// - `MissingCredential` when `token` is `None`
    /// - `InvalidCredential` when a stage rejects it or no stage accepts it
    /// - `Database` when profile resolution fails
    #[instrument(skip_all, name = "auth.pipeline.authenticate")]
    pub async fn authenticate(&self, token: Option<&SecretString>) -> Result<AuthUser, AuthError> {
        let start = Instant::now();

        let Some(token) = token else {
            metrics::record_authentication("missing_credential", "none", start.elapsed());
            return Err(AuthError::MissingCredential);
        };

        let mut last_error: Option<AuthError> = None;

        for stage in &self.stages {
            let name = stage.name();
            match stage.attempt(token).await {
                Ok(StageOutcome::Authenticated(credential)) => {
                    metrics::record_stage(name, "authenticated");
                    return self.finish(credential, start).await;
                }
                Ok(StageOutcome::NoMatch) => {
                    metrics::record_stage(name, "no_match");
                }
                Ok(StageOutcome::Rejected(reason)) => {
                    metrics::record_stage(name, "rejected");
                    tracing::debug!(
                        target: "auth.pipeline",
                        stage = name,
                        reason = %reason,
                        "Credential rejected"
                    );
                    metrics::record_authentication("invalid_credential", "none", start.elapsed());
                    return Err(AuthError::InvalidCredential(reason));
                }
                Err(e) => {
                    metrics::record_stage(name, "error");
                    match &e {
                        AuthError::NotImplemented(_) => {
                            tracing::debug!(target: "auth.pipeline", stage = name, error = %e, "Stage unavailable");
                        }
                        _ => {
                            tracing::warn!(target: "auth.pipeline", stage = name, error = %e, "Stage failed");
                            last_error = Some(e);
                        }
                    }
                }
            }
        }

        let reason = last_error.map_or_else(
            || "no stage accepted the credential".to_string(),
            |e| e.to_string(),
        );
        tracing::debug!(
            target: "auth.pipeline",
            reason = %reason,
            "Authentication failed"
        );
        metrics::record_authentication("invalid_credential", "none", start.elapsed());
        Err(AuthError::InvalidCredential(reason))
    }

    async fn finish(
        &self,
        credential: VerifiedCredential,
        start: Instant,
    ) -> Result<AuthUser, AuthError> {
        let source = credential.source.as_str();

        let profile = match self
            .profiles
            .ensure_profile(&credential.claims.subject, Some(&credential.profile))
            .await
        {
            Ok(profile) => profile,
            Err(e) => {
                tracing::error!(
                    target: "auth.pipeline",
                    subject = %hash_for_correlation(&credential.claims.subject),
                    error = %e,
                    "Profile resolution failed"
                );
                metrics::record_authentication("error", source, start.elapsed());
                return Err(e);
            }
        };

        tracing::debug!(
            target: "auth.pipeline",
            source,
            user_id = %profile.id,
            "Authenticated"
        );
        metrics::record_authentication("authenticated", source, start.elapsed());

        let VerifiedCredential {
            claims, api_token, ..
        } = credential;
        Ok(AuthUser {
            id: profile.id,
            external_subject: claims.subject,
            email: profile.email.or(claims.email),
            scopes: claims.scopes,
            project_id: None,
            org_id: None,
            api_token_project_id: api_token.and_then(|b| b.project_id),
            api_token_id: api_token.map(|b| b.token_id),
        })
    }
}
