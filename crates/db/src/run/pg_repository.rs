use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::map_sqlx_error;
use crate::run::models::{HarvestRun, RunCounts, RunStatus};
use crate::run::repositories::RunRepository;
use tidemark_common::error::{TidemarkError, TidemarkResult};

const RETURNING: &str = "returning id, status, started_at, finished_at, ok_count, unchanged_count,
    empty_count, private_count, not_found_count, aborted_count, records_inserted, error_message";

#[derive(Clone)]
pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> TidemarkResult<HarvestRun> {
        let status: String = row.get("status");
        Ok(HarvestRun {
            id: row.get("id"),
            status: status.parse().map_err(TidemarkError::Database)?,
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            counts: RunCounts {
                ok: row.get("ok_count"),
                unchanged: row.get("unchanged_count"),
                empty: row.get("empty_count"),
                private: row.get("private_count"),
                not_found: row.get("not_found_count"),
                aborted: row.get("aborted_count"),
                records_inserted: row.get("records_inserted"),
            },
            error_message: row.get("error_message"),
        })
    }

    async fn finish(
        &self,
        id: Uuid,
        status: RunStatus,
        counts: &RunCounts,
    ) -> TidemarkResult<HarvestRun> {
        let sql = format!(
            "update harvest_runs
             set status = $1, finished_at = $2, ok_count = $3, unchanged_count = $4,
                 empty_count = $5, private_count = $6, not_found_count = $7,
                 aborted_count = $8, records_inserted = $9
             where id = $10
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(counts.ok)
            .bind(counts.unchanged)
            .bind(counts.empty)
            .bind(counts.private)
            .bind(counts.not_found)
            .bind(counts.aborted)
            .bind(counts.records_inserted)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Self::map_row(row)
    }
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn start(&self) -> TidemarkResult<HarvestRun> {
        let abandoned = sqlx::query(
            "update harvest_runs set status = 'abandoned', finished_at = $1
             where status = 'running'",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if abandoned.rows_affected() > 0 {
            tracing::warn!(
                count = abandoned.rows_affected(),
                "previous run(s) never finished, marked abandoned"
            );
        }

        let sql = format!(
            "insert into harvest_runs (id, status, started_at)
             values ($1, 'running', $2)
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Self::map_row(row)
    }

    async fn mark_completed(&self, id: Uuid, counts: &RunCounts) -> TidemarkResult<HarvestRun> {
        self.finish(id, RunStatus::Completed, counts).await
    }

    async fn mark_interrupted(&self, id: Uuid, counts: &RunCounts) -> TidemarkResult<HarvestRun> {
        self.finish(id, RunStatus::Interrupted, counts).await
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> TidemarkResult<HarvestRun> {
        let sql = format!(
            "update harvest_runs
             set status = 'failed', finished_at = $1, error_message = $2
             where id = $3
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(error_message)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Self::map_row(row)
    }

    async fn latest(&self) -> TidemarkResult<Option<HarvestRun>> {
        let row = sqlx::query(
            "select id, status, started_at, finished_at, ok_count, unchanged_count,
                    empty_count, private_count, not_found_count, aborted_count,
                    records_inserted, error_message
             from harvest_runs order by started_at desc limit 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(Self::map_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use crate::schema::ensure_schema;

    async fn test_repo() -> Option<PgRunRepository> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");
        ensure_schema(&pool).await.ok()?;
        Some(PgRunRepository::new(pool))
    }

    #[tokio::test]
    async fn start_opens_running_row() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let run = repo.start().await.expect("start");
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());
    }

    #[tokio::test]
    async fn runs_get_distinct_ids() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let first = repo.start().await.expect("first");
        let second = repo.start().await.expect("second");
        assert_ne!(first.id, second.id);


        let completed = repo
            .mark_completed(second.id, &RunCounts::default())
            .await
            .expect("complete");
        assert_eq!(completed.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn mark_interrupted_keeps_counts() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let run = repo.start().await.expect("start");
        let counts = RunCounts {
            ok: 2,
            aborted: 1,
            records_inserted: 40,
            ..RunCounts::default()
        };
        let done = repo.mark_interrupted(run.id, &counts).await.expect("interrupt");
        assert_eq!(done.status, RunStatus::Interrupted);
        assert_eq!(done.counts, counts);
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn mark_failed_sets_error() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let run = repo.start().await.expect("start");
        let failed = repo
            .mark_failed(run.id, "bearer token rejected")
            .await
            .expect("mark failed");
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("bearer token rejected"));
    }
}
