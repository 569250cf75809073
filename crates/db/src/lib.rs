pub mod entity;
pub mod following;
pub mod handle;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod record;
pub mod run;
pub mod schema;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tidemark_common::error::{TidemarkError, TidemarkResult};

pub use handle::StoreHandle;

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> TidemarkResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(map_sqlx_error)
}

/// Split sqlx failures into "the store is gone" and "this statement failed".
pub(crate) fn map_sqlx_error(e: sqlx::Error) -> TidemarkError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => TidemarkError::StoreUnavailable(e.to_string()),
        other => TidemarkError::Database(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pool_fails_with_invalid_url() {
        let result = create_pool("postgres://invalid:5432/nonexistent").await;
        assert!(result.is_err());
    }

    #[test]
    fn pool_timeout_is_unavailable() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_store_unavailable());
        assert!(!map_sqlx_error(sqlx::Error::RowNotFound).is_store_unavailable());
    }
}
