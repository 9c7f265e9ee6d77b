//! Introspection cache backed by the shared `introspection_cache` table.
//!
//! Rows are keyed by hex(SHA-512(raw token)) and upserted last-writer-wins.
//! Reads filter `expires_at > NOW()` in SQL, so an expired row is a miss even
//! before the purge task removes it. Expiry is computed from the database
//! clock on write and compared against the database clock on read, so
//! instances with skewed clocks agree on liveness.

use crate::auth::claims::IntrospectionResult;
use crate::errors::AuthError;
use crate::observability::metrics;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tracing::instrument;

#[async_trait::async_trait]
pub trait IntrospectionCache: Send + Sync {
    /// Live cached result for `token_hash`, if any.
    async fn get(&self, token_hash: &str) -> Result<Option<IntrospectionResult>, AuthError>;

    /// Store `result` for `ttl`, replacing any existing row.
    async fn put(
        &self,
        token_hash: &str,
        result: &IntrospectionResult,
        ttl: Duration,
    ) -> Result<(), AuthError>;
}

/// Postgres-backed cache shared by every service instance.
#[derive(Clone)]
pub struct PgIntrospectionCache {
    pool: PgPool,
}

impl PgIntrospectionCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IntrospectionCache for PgIntrospectionCache {
    #[instrument(skip_all, name = "auth.repo.cache_get")]
    async fn get(&self, token_hash: &str) -> Result<Option<IntrospectionResult>, AuthError> {
        let start = Instant::now();

        let row = sqlx::query_scalar::<_, Json<IntrospectionResult>>(
            r#"
            SELECT introspection_data
            FROM introspection_cache
            WHERE token_hash = $1 AND expires_at > NOW()
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("cache_get", "error", start.elapsed());
            AuthError::Database(format!("Failed to read introspection cache: {}", e))
        })?;

        metrics::record_db_query("cache_get", "success", start.elapsed());
        Ok(row.map(|Json(result)| result))
    }

    #[instrument(skip_all, name = "auth.repo.cache_put", fields(ttl_secs = ttl.as_secs()))]
    async fn put(
        &self,
        token_hash: &str,
        result: &IntrospectionResult,
        ttl: Duration,
    ) -> Result<(), AuthError> {
        let start = Instant::now();

        sqlx::query(
            r#"
            INSERT INTO introspection_cache (token_hash, introspection_data, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (token_hash) DO UPDATE
            SET introspection_data = EXCLUDED.introspection_data,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(token_hash)
        .bind(Json(result))
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("cache_put", "error", start.elapsed());
            AuthError::Database(format!("Failed to write introspection cache: {}", e))
        })?;

        metrics::record_db_query("cache_put", "success", start.elapsed());
        Ok(())
    }
}

/// Delete rows whose expiry has passed. Returns the number removed.
#[instrument(skip_all, name = "auth.repo.cache_purge")]
pub async fn purge_expired(pool: &PgPool) -> Result<u64, AuthError> {
    let start = Instant::now();

    let result = sqlx::query(
        r#"
        DELETE FROM introspection_cache
        WHERE expires_at <= NOW()
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        metrics::record_db_query("cache_purge", "error", start.elapsed());
        AuthError::Database(format!("Failed to purge introspection cache: {}", e))
    })?;

    metrics::record_db_query("cache_purge", "success", start.elapsed());
    Ok(result.rows_affected())
}

/// In-memory cache with the same liveness rules, for tests.
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct MemoryIntrospectionCache {
        entries: Mutex<HashMap<String, (IntrospectionResult, tokio::time::Instant)>>,
        puts: AtomicUsize,
        fail: bool,
    }

    impl MemoryIntrospectionCache {
        pub fn new() -> Self {
            Self::default()
        }

        /// A cache whose every call fails with a database error.
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        /// Insert an entry that expires at an arbitrary instant, including
        /// one already in the past.
        pub fn insert_with_expiry(
            &self,
            token_hash: &str,
            result: IntrospectionResult,
            expires_at: tokio::time::Instant,
        ) {
            self.entries
                .lock()
                .insert(token_hash.to_string(), (result, expires_at));
        }

        /// Remaining TTL of an entry, ignoring liveness.
        pub fn ttl_of(&self, token_hash: &str) -> Option<Duration> {
            self.entries
                .lock()
                .get(token_hash)
                .map(|(_, at)| at.saturating_duration_since(tokio::time::Instant::now()))
        }

        pub fn put_count(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl IntrospectionCache for MemoryIntrospectionCache {
        async fn get(&self, token_hash: &str) -> Result<Option<IntrospectionResult>, AuthError> {
            if self.fail {
                return Err(AuthError::Database("mock cache failure".to_string()));
            }
            let now = tokio::time::Instant::now();
            Ok(self
                .entries
                .lock()
                .get(token_hash)
                .filter(|(_, expires_at)| *expires_at > now)
                .map(|(result, _)| result.clone()))
        }

        async fn put(
            &self,
            token_hash: &str,
            result: &IntrospectionResult,
            ttl: Duration,
        ) -> Result<(), AuthError> {
            if self.fail {
                return Err(AuthError::Database("mock cache failure".to_string()));
            }
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.insert_with_expiry(token_hash, result.clone(), tokio::time::Instant::now() + ttl);
            Ok(())
        }
    }
}
