//! Database fixtures for profiles and API tokens.

use auth_service::auth::token_hash::api_token_hash;
use auth_service::repositories::api_tokens::create_api_token;
use sqlx::PgPool;

/// Insert an active profile and return its ID.
pub async fn create_test_profile(
    pool: &PgPool,
    subject: &str,
    email: Option<&str>,
) -> Result<sqlx::types::Uuid, anyhow::Error> {
    let id: sqlx::types::Uuid =
        sqlx::query_scalar("INSERT INTO user_profiles (external_subject) VALUES ($1) RETURNING id")
            .bind(subject)
            .fetch_one(pool)
            .await?;

    if let Some(email) = email {
        sqlx::query("INSERT INTO user_emails (user_id, email, is_primary) VALUES ($1, $2, TRUE)")
            .bind(id)
            .bind(email)
            .execute(pool)
            .await?;
    }

    Ok(id)
}

/// Store `raw_token` as an API token for `user_id` and return the token ID.
pub async fn create_test_api_token(
    pool: &PgPool,
    user_id: sqlx::types::Uuid,
    raw_token: &str,
    scopes: &[&str],
    project_id: Option<sqlx::types::Uuid>,
) -> Result<sqlx::types::Uuid, anyhow::Error> {
    let scopes: Vec<String> = scopes.iter().map(|s| (*s).to_string()).collect();
    let id = create_api_token(
        pool,
        user_id,
        "test token",
        &api_token_hash(raw_token),
        &scopes,
        project_id,
    )
    .await?;
    Ok(id)
}
