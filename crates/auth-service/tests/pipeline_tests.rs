//! Pipeline behaviour under concurrency, cache expiry and IdP failure.
//!
//! Uses in-memory collaborators so time can be paused.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use auth_service::auth::idp_client::mock::MockIdpClient;
use auth_service::auth::idp_client::{IdpClient, IdpError};
use auth_service::auth::pipeline::{AuthPipeline, PipelineDeps};
use auth_service::auth::token_hash::introspection_cache_key;
use auth_service::config::Config;
use auth_service::errors::AuthError;
use auth_service::repositories::api_tokens::mock::MockApiTokenStore;
use auth_service::repositories::introspection_cache::mock::MemoryIntrospectionCache;
use auth_service::services::user_profiles::mock::MockProfileResolver;
use chrono::Utc;
use common::secret::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    pipeline: AuthPipeline,
    idp: Arc<MockIdpClient>,
    cache: Arc<MemoryIntrospectionCache>,
    profiles: Arc<MockProfileResolver>,
}

fn harness(idp: MockIdpClient, extra: &[(&str, &str)]) -> Harness {
    let mut vars = HashMap::from([
        ("DATABASE_URL".to_string(), "postgresql://test/test".to_string()),
        ("APP_ENV".to_string(), "production".to_string()),
        ("AUTH_ISSUER_URL".to_string(), "http://idp.test".to_string()),
        ("AUTH_USERINFO_FALLBACK_ENABLED".to_string(), "false".to_string()),
    ]);
    for (k, v) in extra {
        vars.insert((*k).to_string(), (*v).to_string());
    }
    let config = Config::from_vars(&vars).unwrap();

    let idp = Arc::new(idp);
    let cache = Arc::new(MemoryIntrospectionCache::new());
    let profiles = Arc::new(MockProfileResolver::new());

    let pipeline = AuthPipeline::from_config(
        &config,
        PipelineDeps {
            api_tokens: Arc::new(MockApiTokenStore::new()),
            cache: cache.clone(),
            idp: Some(idp.clone() as Arc<dyn IdpClient>),
            profiles: profiles.clone(),
        },
    );

    Harness {
        pipeline,
        idp,
        cache,
        profiles,
    }
}

fn secret(token: &str) -> SecretString {
    SecretString::from(token.to_string())
}

#[tokio::test]
async fn test_concurrent_callers_share_one_introspection() {
    let exp = Utc::now().timestamp() + 3600;
    let h = Arc::new(harness(
        MockIdpClient::new()
            .with_delay(Duration::from_millis(100))
            .with_active_token("shared-token", "user-1", "project:read", exp),
        &[],
    ));

    let callers = (0..8).map(|_| {
        let h = h.clone();
        tokio::spawn(async move { h.pipeline.authenticate(Some(&secret("shared-token"))).await })
    });
    let results = futures::future::join_all(callers).await;

    let ids: Vec<_> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap().id)
        .collect();
    let first = ids.first().copied().unwrap();
    assert!(ids.iter().all(|id| *id == first));
    assert_eq!(h.idp.introspect_calls(), 1);
    assert_eq!(h.profiles.profile_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_cache_entry_is_reintrospected() {
    let exp = Utc::now().timestamp() + 3600;
    let h = harness(
        MockIdpClient::new().with_active_token("tok", "user-2", "project:read", exp),
        &[],
    );

    let mut stale = auth_service::auth::claims::IntrospectionResult::inactive();
    stale.active = true;
    stale.sub = Some("user-2".to_string());
    stale.exp = Some(exp);
    h.cache.insert_with_expiry(
        &introspection_cache_key("tok"),
        stale,
        tokio::time::Instant::now() + Duration::from_secs(1),
    );

    h.pipeline.authenticate(Some(&secret("tok"))).await.unwrap();
    assert_eq!(h.idp.introspect_calls(), 0, "live entry served from cache");

    tokio::time::advance(Duration::from_secs(2)).await;

    h.pipeline.authenticate(Some(&secret("tok"))).await.unwrap();
    assert_eq!(h.idp.introspect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_limits_idp_calls_during_outage() {
    let idp = MockIdpClient::new();
    idp.set_introspection_error(Some(IdpError::Upstream("503".to_string())));
    let h = harness(idp, &[("IDP_CIRCUIT_BREAKER_COOLDOWN_SECONDS", "30")]);

    for i in 0..10 {
        let err = h
            .pipeline
            .authenticate(Some(&secret(&format!("token-{i}"))))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }
    assert_eq!(h.idp.introspect_calls(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;

    let _ = h.pipeline.authenticate(Some(&secret("token-after"))).await;
    assert_eq!(h.idp.introspect_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_recovered_idp_after_cooldown_authenticates() {
    let exp = Utc::now().timestamp() + 3600;
    let idp = MockIdpClient::new().with_active_token("tok", "user-3", "org:read", exp);
    idp.set_introspection_error(Some(IdpError::Transport("timeout".to_string())));
    let h = harness(idp, &[("IDP_CIRCUIT_BREAKER_COOLDOWN_SECONDS", "5")]);

    assert!(h.pipeline.authenticate(Some(&secret("tok"))).await.is_err());

    h.idp.set_introspection_error(None);
    assert!(h.pipeline.authenticate(Some(&secret("tok"))).await.is_err());
    assert_eq!(h.idp.introspect_calls(), 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    let user = h.pipeline.authenticate(Some(&secret("tok"))).await.unwrap();
    assert!(user.scopes.contains("org:read"));
}

#[tokio::test(start_paused = true)]
async fn test_cache_ttl_bounded_by_token_expiry() {
    let exp = Utc::now().timestamp() + 60;
    let h = harness(
        MockIdpClient::new().with_active_token("short-lived", "user-4", "project:read", exp),
        &[("INTROSPECTION_CACHE_TTL_SECONDS", "300")],
    );

    h.pipeline
        .authenticate(Some(&secret("short-lived")))
        .await
        .unwrap();

    let ttl = h.cache.ttl_of(&introspection_cache_key("short-lived")).unwrap();
    assert!(ttl <= Duration::from_secs(60), "ttl {ttl:?} exceeds token lifetime");
    assert!(ttl > Duration::from_secs(50));
}

#[tokio::test(start_paused = true)]
async fn test_inactive_token_is_negatively_cached() {
    let h = harness(
        MockIdpClient::new(),
        &[("INTROSPECTION_NEGATIVE_CACHE_TTL_SECONDS", "60")],
    );

    for _ in 0..3 {
        let err = h
            .pipeline
            .authenticate(Some(&secret("revoked")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }
    assert_eq!(h.idp.introspect_calls(), 1);

    let ttl = h.cache.ttl_of(&introspection_cache_key("revoked")).unwrap();
    assert!(ttl <= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_userinfo_outage_opens_breaker_for_introspection() {
    let idp = MockIdpClient::new();
    idp.set_introspection_error(Some(IdpError::InvalidResponse("garbled".to_string())));
    idp.set_userinfo_error(Some(IdpError::Transport("connection reset".to_string())));
    let h = harness(idp, &[("AUTH_USERINFO_FALLBACK_ENABLED", "true")]);

    for i in 0..5 {
        let err = h
            .pipeline
            .authenticate(Some(&secret(&format!("token-{i}"))))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    assert_eq!(h.idp.introspect_calls(), 1);
    assert_eq!(h.idp.userinfo_calls(), 1);
}

#[tokio::test]
async fn test_cached_entry_not_served_past_token_exp() {
    let h = harness(MockIdpClient::new(), &[]);

    // Live row holding a token whose exp has passed.
    let mut expired = auth_service::auth::claims::IntrospectionResult::inactive();
    expired.active = true;
    expired.sub = Some("user-5".to_string());
    expired.exp = Some(Utc::now().timestamp() - 1);
    h.cache.insert_with_expiry(
        &introspection_cache_key("stale"),
        expired,
        tokio::time::Instant::now() + Duration::from_secs(300),
    );

    let err = h
        .pipeline
        .authenticate(Some(&secret("stale")))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredential(_)));
    assert_eq!(h.idp.introspect_calls(), 0);
}
