//! End-to-end authentication tests against a spawned server.
//!
//! Covers development tokens, local API tokens, IdP introspection through an
//! injected mock, and the error bodies for each failure class.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use auth_service::auth::idp_client::mock::MockIdpClient;
use auth_service::auth::idp_client::{IdpClient, IdpError};
use auth_test_utils::{create_test_api_token, create_test_profile, TestAuthServer};
use chrono::Utc;
use common::scope::{ORG_WRITE, PROJECT_READ, PROJECT_WRITE};
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;

const ISSUER_VARS: &[(&str, &str)] = &[
    ("APP_ENV", "production"),
    ("AUTH_ISSUER_URL", "http://idp.test"),
    ("AUTH_USERINFO_FALLBACK_ENABLED", "false"),
];

async fn get_me(server: &TestAuthServer, token: Option<&str>) -> reqwest::Response {
    let mut request = reqwest::Client::new().get(format!("{}/api/v1/me", server.url()));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    request.send().await.unwrap()
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_missing_credential_returns_400(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn(pool).await?;

    let response = get_me(&server, None).await;
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "MISSING_CREDENTIAL");
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_invalid_credential_returns_401(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn(pool).await?;

    let response = get_me(&server, Some("not-a-real-token")).await;
    assert_eq!(response.status(), 401);
    assert!(response.headers().contains_key("www-authenticate"));

    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "INVALID_CREDENTIAL");
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_dev_token_provisions_profile(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn(pool.clone()).await?;

    let first: Value = get_me(&server, Some("e2e-all")).await.json().await?;
    let second: Value = get_me(&server, Some("e2e-all")).await.json().await?;

    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["email"], "e2e-test-user@test.local");
    assert!(first.get("external_subject").is_none());
    assert!(first["scopes"]
        .as_array()
        .unwrap()
        .contains(&Value::from(ORG_WRITE)));

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM user_profiles WHERE external_subject = 'e2e-test-user'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(rows, 1);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_dev_tokens_rejected_in_production(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn_with(pool, &[("APP_ENV", "production")], None).await?;

    let response = get_me(&server, Some("e2e-all")).await;
    assert_eq!(response.status(), 401);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_context_headers_are_echoed(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn(pool).await?;

    let body: Value = reqwest::Client::new()
        .get(format!("{}/api/v1/me", server.url()))
        .bearer_auth("e2e-read-only")
        .header("X-Project-ID", "proj-42")
        .header("X-Org-ID", "org-7")
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["project_id"], "proj-42");
    assert_eq!(body["org_id"], "org-7");
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_scope_check_reports_missing_scopes(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn(pool).await?;
    let client = reqwest::Client::new();

    let granted = client
        .get(format!("{}/api/v1/me/scopes", server.url()))
        .query(&[("required", PROJECT_READ)])
        .bearer_auth("e2e-read-only")
        .send()
        .await?;
    assert_eq!(granted.status(), 200);

    let denied = client
        .get(format!("{}/api/v1/me/scopes", server.url()))
        .query(&[("required", format!("{PROJECT_READ} {PROJECT_WRITE}"))])
        .bearer_auth("e2e-read-only")
        .send()
        .await?;
    assert_eq!(denied.status(), 403);

    let body: Value = denied.json().await?;
    assert_eq!(body["error"]["code"], "INSUFFICIENT_SCOPE");
    assert_eq!(body["error"]["missing_scopes"], serde_json::json!([PROJECT_WRITE]));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_api_token_authenticates_owner(pool: PgPool) -> Result<(), anyhow::Error> {
    let user_id = create_test_profile(&pool, "token-owner", Some("owner@example.com")).await?;
    let project_id = sqlx::types::Uuid::new_v4();
    let token_id = create_test_api_token(
        &pool,
        user_id,
        "gk_integration_token",
        &[PROJECT_READ],
        Some(project_id),
    )
    .await?;

    let server = TestAuthServer::spawn_with(pool, &[("APP_ENV", "production")], None).await?;

    let response = get_me(&server, Some("gk_integration_token")).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await?;
    assert_eq!(body["id"], user_id.to_string());
    assert_eq!(body["email"], "owner@example.com");
    assert_eq!(body["scopes"], serde_json::json!([PROJECT_READ]));
    assert_eq!(body["api_token_id"], token_id.to_string());
    assert_eq!(body["api_token_project_id"], project_id.to_string());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_unknown_api_token_is_rejected(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn_with(pool, &[("APP_ENV", "production")], None).await?;

    let response = get_me(&server, Some("gk_never_issued")).await;
    assert_eq!(response.status(), 401);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_introspected_token_is_cached(pool: PgPool) -> Result<(), anyhow::Error> {
    let exp = Utc::now().timestamp() + 3600;
    let idp = Arc::new(MockIdpClient::new().with_active_token(
        "opaque-access-token",
        "idp-subject-1",
        "project:read org:read",
        exp,
    ));
    let server = TestAuthServer::spawn_with(
        pool.clone(),
        ISSUER_VARS,
        Some(idp.clone() as Arc<dyn IdpClient>),
    )
    .await?;

    let first = get_me(&server, Some("opaque-access-token")).await;
    assert_eq!(first.status(), 200);
    let second = get_me(&server, Some("opaque-access-token")).await;
    assert_eq!(second.status(), 200);

    assert_eq!(idp.introspect_calls(), 1);

    let cached: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM introspection_cache")
        .fetch_one(&pool)
        .await?;
    assert_eq!(cached, 1);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_idp_outage_surfaces_as_401_not_5xx(pool: PgPool) -> Result<(), anyhow::Error> {
    let idp = Arc::new(MockIdpClient::new());
    idp.set_introspection_error(Some(IdpError::Transport("connection refused".to_string())));
    let server = TestAuthServer::spawn_with(pool, ISSUER_VARS, Some(idp.clone() as Arc<dyn IdpClient>))
        .await?;

    let response = get_me(&server, Some("opaque-access-token")).await;
    assert_eq!(response.status(), 401);

    // Breaker is open: the next request never reaches the IdP.
    let response = get_me(&server, Some("another-token")).await;
    assert_eq!(response.status(), 401);
    assert_eq!(idp.introspect_calls(), 1);
    Ok(())
}
