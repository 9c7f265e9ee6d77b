//! Introspection cache purge task.
//!
//! Expired rows are already invisible to reads; this only reclaims space.
//! Exits when the cancellation token is triggered.

use crate::repositories::introspection_cache::purge_expired;
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

#[instrument(skip_all, name = "auth.task.cache_purge")]
pub async fn start_cache_purge(pool: PgPool, interval: Duration, cancel_token: CancellationToken) {
    info!(
        target: "auth.task.cache_purge",
        interval_secs = interval.as_secs(),
        "Starting introspection cache purge task"
    );

    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; skip it so startup does no work.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match purge_expired(&pool).await {
                    Ok(0) => {}
                    Ok(count) => info!(
                        target: "auth.task.cache_purge",
                        purged = count,
                        "Purged expired introspection cache rows"
                    ),
                    Err(e) => tracing::warn!(
                        target: "auth.task.cache_purge",
                        error = %e,
                        "Introspection cache purge failed"
                    ),
                }
            }
            () = cancel_token.cancelled() => {
                info!(target: "auth.task.cache_purge", "Cache purge task shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::claims::IntrospectionResult;
    use crate::repositories::introspection_cache::{IntrospectionCache, PgIntrospectionCache};

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_purges_and_stops_on_cancel(pool: PgPool) {
        let cache = PgIntrospectionCache::new(pool.clone());
        cache
            .put("dead", &IntrospectionResult::inactive(), Duration::from_secs(60))
            .await
            .unwrap();
        sqlx::query("UPDATE introspection_cache SET expires_at = NOW() - INTERVAL '1 second'")
            .execute(&pool)
            .await
            .unwrap();

        let token = CancellationToken::new();
        let handle = tokio::spawn(start_cache_purge(
            pool.clone(),
            Duration::from_millis(20),
            token.clone(),
        ));

        let mut remaining = 1_i64;
        for _ in 0..100 {
            remaining = sqlx::query_scalar("SELECT COUNT(*) FROM introspection_cache")
                .fetch_one(&pool)
                .await
                .unwrap();
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remaining, 0);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task exits after cancel")
            .unwrap();
    }
}
