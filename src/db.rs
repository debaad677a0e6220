use std::{future::Future, time::Duration};

use anyhow::{Context, Result, anyhow};
use diesel::Connection;
use diesel_async::{
    AsyncPgConnection,
    async_connection_wrapper::AsyncConnectionWrapper,
    pooled_connection::{AsyncDieselConnectionManager, bb8::Pool},
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};

use crate::app_error::AppError;

pub type DbPool = Pool<AsyncPgConnection>;

pub async fn create_pool(url: &str, max_connections: u32) -> Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);
    Pool::builder()
        .max_size(max_connections)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)
        .await
        .context("Failed to build the DB connection pool")
}

/// Applies every pending embedded migration and returns how many ran.
pub async fn run_migrations_blocking(migrations: EmbeddedMigrations, url: &str) -> Result<usize> {
    let url = url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)
            .context("Failed to connect for migrations")?;
        let applied = conn
            .run_pending_migrations(migrations)
            .map_err(|err| anyhow!("Failed to run migrations: {err}"))?;
        Ok(applied.len())
    })
    .await
    .context("Migration task panicked")?
}

/// Bounds a unit of work. A transaction that outlives `budget` is dropped,
/// which rolls it back, and the caller gets a retryable [`AppError::Timeout`].
pub async fn with_deadline<T, F>(budget: Duration, work: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(budget, work).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(budget_ms = budget.as_millis() as u64, "Transaction deadline exceeded");
            Err(AppError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_passes_through_results() {
        let out = with_deadline(Duration::from_secs(1), async { Ok::<_, AppError>(7) }).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test]
    async fn deadline_turns_slow_work_into_timeout() {
        let out = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, AppError>(())
        })
        .await;
        assert!(matches!(out, Err(AppError::Timeout)));
    }
}
