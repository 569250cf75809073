use async_trait::async_trait;
use sqlx::PgPool;

use crate::map_sqlx_error;
use crate::record::models::{InsertOutcome, Record};
use crate::record::repositories::RecordStore;
use crate::schema::{self, UniqueIndex};
use tidemark_common::error::TidemarkResult;

#[derive(Clone)]
pub struct PgRecordRepository {
    pool: PgPool,
}

impl PgRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordRepository {
    async fn find_max_id(&self, author_id: &str) -> TidemarkResult<Option<i64>> {
        sqlx::query_scalar::<_, Option<i64>>(
            "select max(record_id) from records where author_id = $1",
        )
        .bind(author_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn insert_if_absent(&self, record: &Record) -> TidemarkResult<InsertOutcome> {
        let result = sqlx::query(
            "insert into records (record_id, author_id, created_at_remote, payload)
             values ($1, $2, $3, $4)
             on conflict (record_id) do nothing",
        )
        .bind(record.id)
        .bind(&record.author_id)
        .bind(record.created_at)
        .bind(&record.payload)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(InsertOutcome::Inserted),
            Ok(_) => Ok(InsertOutcome::AlreadyExists),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(InsertOutcome::AlreadyExists)
            }
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn count_for(&self, author_id: &str) -> TidemarkResult<u64> {
        let count: i64 = sqlx::query_scalar("select count(*) from records where author_id = $1")
            .bind(author_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn count_all(&self) -> TidemarkResult<u64> {
        let count: i64 = sqlx::query_scalar("select count(*) from records")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn create_unique_index(&self, index: UniqueIndex) -> TidemarkResult<()> {
        schema::create_unique_index(&self.pool, index).await
    }

    async fn rebuild_indexes(&self) -> TidemarkResult<()> {
        for statement in ["reindex table records", "analyze records"] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        Ok(())
    }
}
