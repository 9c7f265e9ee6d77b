//! API token lookups.
//!
//! API tokens are issued locally and stored as hex(SHA-256(raw token)). A
//! lookup joins the owning profile so that tokens of soft-deleted users stop
//! working without being revoked individually.

use crate::errors::AuthError;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Active API token with its owner (maps to `api_tokens` joined with
/// `user_profiles`).
#[derive(Clone, sqlx::FromRow)]
pub struct ApiTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub external_subject: String,
    pub email: Option<String>,
    pub project_id: Option<Uuid>,
    pub scopes: Vec<String>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for ApiTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTokenRecord")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("external_subject", &"[REDACTED]")
            .field("project_id", &self.project_id)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
pub trait ApiTokenStore: Send + Sync {
    /// Non-revoked token with this hash, owned by a non-deleted profile.
    async fn find_active(&self, token_hash: &str) -> Result<Option<ApiTokenRecord>, AuthError>;
}

#[derive(Clone)]
pub struct PgApiTokenStore {
    pool: PgPool,
}

impl PgApiTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ApiTokenStore for PgApiTokenStore {
    #[instrument(skip_all, name = "auth.repo.api_token_lookup")]
    async fn find_active(&self, token_hash: &str) -> Result<Option<ApiTokenRecord>, AuthError> {
        let start = Instant::now();

        let record = sqlx::query_as::<_, ApiTokenRecord>(
            r#"
            SELECT
                t.id, t.user_id, p.external_subject,
                (
                    SELECT e.email FROM user_emails e
                    WHERE e.user_id = p.id
                    ORDER BY e.is_primary DESC, e.created_at ASC
                    LIMIT 1
                ) AS email,
                t.project_id, t.scopes, t.revoked_at
            FROM api_tokens t
            JOIN user_profiles p ON p.id = t.user_id
            WHERE t.token_hash = $1
              AND t.revoked_at IS NULL
              AND p.deleted_at IS NULL
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("api_token_lookup", "error", start.elapsed());
            AuthError::Database(format!("Failed to look up API token: {}", e))
        })?;

        metrics::record_db_query("api_token_lookup", "success", start.elapsed());
        Ok(record)
    }
}

/// Store a new API token for `user_id`. Returns the token ID.
pub async fn create_api_token(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
    token_hash: &str,
    scopes: &[String],
    project_id: Option<Uuid>,
) -> Result<Uuid, AuthError> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO api_tokens (user_id, name, token_hash, scopes, project_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(name)
    .bind(token_hash)
    .bind(scopes)
    .bind(project_id)
    .fetch_one(pool)
    .await
    .map_err(|e| AuthError::Database(format!("Failed to create API token: {}", e)))?;

    Ok(id)
}

/// In-memory token store for tests.
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MockApiTokenStore {
        tokens: Mutex<HashMap<String, ApiTokenRecord>>,
    }

    impl MockApiTokenStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register an active token under its hash.
        pub fn insert(&self, token_hash: &str, record: ApiTokenRecord) {
            self.tokens.lock().insert(token_hash.to_string(), record);
        }
    }

    #[async_trait::async_trait]
    impl ApiTokenStore for MockApiTokenStore {
        async fn find_active(
            &self,
            token_hash: &str,
        ) -> Result<Option<ApiTokenRecord>, AuthError> {
            Ok(self
                .tokens
                .lock()
                .get(token_hash)
                .filter(|r| r.revoked_at.is_none())
                .cloned())
        }
    }
}
