//! User profile repository.
//!
//! Profiles are keyed by the IdP subject. At most one non-deleted row exists
//! per subject (partial unique index `user_profiles_active_subject_unique`);
//! soft-deleted rows are kept and may be reactivated.

use crate::errors::AuthError;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Instant;
use uuid::Uuid;

/// Postgres unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// User profile (maps to `user_profiles`).
#[derive(Clone, sqlx::FromRow)]
pub struct UserProfile {
    pub id: Uuid,
    pub external_subject: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,

    /// Primary email, filled in by the resolver.
    #[sqlx(skip)]
    pub email: Option<String>,
}

impl std::fmt::Debug for UserProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserProfile")
            .field("id", &self.id)
            .field("external_subject", &"[REDACTED]")
            .field("display_name", &self.display_name)
            .field("deleted_at", &self.deleted_at)
            .finish_non_exhaustive()
    }
}

fn db_error(operation: &'static str, start: Instant, e: sqlx::Error) -> AuthError {
    metrics::record_db_query(operation, "error", start.elapsed());
    AuthError::Database(format!("Failed to {}: {}", operation.replace('_', " "), e))
}

/// Active profile for `subject`.
pub async fn find_active_by_subject(
    pool: &PgPool,
    subject: &str,
) -> Result<Option<UserProfile>, AuthError> {
    let start = Instant::now();

    let profile = sqlx::query_as::<_, UserProfile>(
        r#"
        SELECT id, external_subject, display_name, created_at, updated_at, deleted_at, deleted_by
        FROM user_profiles
        WHERE external_subject = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(subject)
    .fetch_optional(pool)
    .await
    .map_err(|e| db_error("find_profile", start, e))?;

    metrics::record_db_query("find_profile", "success", start.elapsed());
    Ok(profile)
}

/// Reactivate the most recently deleted profile for `subject`.
///
/// The row is locked and un-deleted in one statement. Returns `None` when
/// there is nothing to reactivate, or when another request created an active
/// profile for the subject first.
pub async fn reactivate_by_subject(
    pool: &PgPool,
    subject: &str,
) -> Result<Option<UserProfile>, AuthError> {
    let start = Instant::now();

    let result = sqlx::query_as::<_, UserProfile>(
        r#"
        UPDATE user_profiles
        SET deleted_at = NULL, deleted_by = NULL, updated_at = NOW()
        WHERE id = (
            SELECT id FROM user_profiles
            WHERE external_subject = $1 AND deleted_at IS NOT NULL
            ORDER BY deleted_at DESC
            LIMIT 1
            FOR UPDATE
        )
        AND NOT EXISTS (
            SELECT 1 FROM user_profiles
            WHERE external_subject = $1 AND deleted_at IS NULL
        )
        RETURNING id, external_subject, display_name, created_at, updated_at, deleted_at, deleted_by
        "#,
    )
    .bind(subject)
    .fetch_optional(pool)
    .await;

    match result {
        Ok(profile) => {
            metrics::record_db_query("reactivate_profile", "success", start.elapsed());
            Ok(profile)
        }
        Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            metrics::record_db_query("reactivate_profile", "conflict", start.elapsed());
            Ok(None)
        }
        Err(e) => Err(db_error("reactivate_profile", start, e)),
    }
}

/// Create an active profile for `subject`, or return the one a concurrent
/// request just created. An empty display name on the existing row is
/// filled in.
pub async fn insert_or_get(
    pool: &PgPool,
    subject: &str,
    display_name: Option<&str>,
) -> Result<UserProfile, AuthError> {
    let start = Instant::now();

    let profile = sqlx::query_as::<_, UserProfile>(
        r#"
        INSERT INTO user_profiles (external_subject, display_name)
        VALUES ($1, $2)
        ON CONFLICT (external_subject) WHERE deleted_at IS NULL
        DO UPDATE SET display_name = COALESCE(NULLIF(user_profiles.display_name, ''), EXCLUDED.display_name)
        RETURNING id, external_subject, display_name, created_at, updated_at, deleted_at, deleted_by
        "#,
    )
    .bind(subject)
    .bind(display_name)
    .fetch_one(pool)
    .await
    .map_err(|e| db_error("insert_profile", start, e))?;

    metrics::record_db_query("insert_profile", "success", start.elapsed());
    Ok(profile)
}

/// Set the display name only if the profile has none.
pub async fn fill_display_name(
    pool: &PgPool,
    id: Uuid,
    display_name: &str,
) -> Result<bool, AuthError> {
    let start = Instant::now();

    let result = sqlx::query(
        r#"
        UPDATE user_profiles
        SET display_name = $2, updated_at = NOW()
        WHERE id = $1 AND (display_name IS NULL OR display_name = '')
        "#,
    )
    .bind(id)
    .bind(display_name)
    .execute(pool)
    .await
    .map_err(|e| db_error("fill_display_name", start, e))?;

    metrics::record_db_query("fill_display_name", "success", start.elapsed());
    Ok(result.rows_affected() == 1)
}

/// Record `email` for the user unless it is already present. Existing rows,
/// including their verification state, are never modified. The first email a
/// user gets becomes primary.
pub async fn add_email_if_absent(pool: &PgPool, user_id: Uuid, email: &str) -> Result<(), AuthError> {
    let start = Instant::now();

    sqlx::query(
        r#"
        INSERT INTO user_emails (user_id, email, is_primary)
        VALUES ($1, $2, NOT EXISTS (SELECT 1 FROM user_emails WHERE user_id = $1))
        ON CONFLICT (user_id, email) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(email)
    .execute(pool)
    .await
    .map_err(|e| db_error("sync_email", start, e))?;

    metrics::record_db_query("sync_email", "success", start.elapsed());
    Ok(())
}

/// Primary email for the user, falling back to the oldest.
pub async fn primary_email(pool: &PgPool, user_id: Uuid) -> Result<Option<String>, AuthError> {
    let start = Instant::now();

    let email = sqlx::query_scalar::<_, String>(
        r#"
        SELECT email FROM user_emails
        WHERE user_id = $1
        ORDER BY is_primary DESC, created_at ASC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| db_error("primary_email", start, e))?;

    metrics::record_db_query("primary_email", "success", start.elapsed());
    Ok(email)
}

/// Soft-delete a profile.
pub async fn soft_delete(pool: &PgPool, id: Uuid, deleted_by: Option<Uuid>) -> Result<bool, AuthError> {
    let start = Instant::now();

    let result = sqlx::query(
        r#"
        UPDATE user_profiles
        SET deleted_at = NOW(), deleted_by = $2, updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .bind(deleted_by)
    .execute(pool)
    .await
    .map_err(|e| db_error("delete_profile", start, e))?;

    metrics::record_db_query("delete_profile", "success", start.elapsed());
    Ok(result.rows_affected() == 1)
}
