use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::entity::models::{EntityStatus, TrackedEntity};
use crate::entity::repositories::EntityRepository;
use crate::map_sqlx_error;
use tidemark_common::error::{TidemarkError, TidemarkResult};

#[derive(Clone)]
pub struct PgEntityRepository {
    pool: PgPool,
}

impl PgEntityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> TidemarkResult<TrackedEntity> {
        let status: String = row.get("status");
        Ok(TrackedEntity {
            handle: row.get("handle"),
            external_id: row.get("external_id"),
            display_name: row.get("display_name"),
            status: status.parse().map_err(TidemarkError::Database)?,
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl EntityRepository for PgEntityRepository {
    async fn register(&self, handle: &str) -> TidemarkResult<TrackedEntity> {
        let row = sqlx::query(
            "insert into tracked_entities (handle)
             values ($1)
             on conflict (handle) do update set handle = excluded.handle
             returning handle, external_id, display_name, status, updated_at",
        )
        .bind(handle)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Self::map_row(row)
    }

    async fn get(&self, handle: &str) -> TidemarkResult<Option<TrackedEntity>> {
        let row = sqlx::query(
            "select handle, external_id, display_name, status, updated_at
             from tracked_entities where handle = $1",
        )
        .bind(handle)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(Self::map_row).transpose()
    }

    async fn mark_resolved(
        &self,
        handle: &str,
        external_id: &str,
        display_name: Option<&str>,
    ) -> TidemarkResult<TrackedEntity> {
        let row = sqlx::query(
            "update tracked_entities
             set external_id = $1,
                 display_name = coalesce($2, display_name),
                 status = case when status in ('unresolved', 'not_found') then 'active' else status end,
                 updated_at = now()
             where handle = $3
             returning handle, external_id, display_name, status, updated_at",
        )
        .bind(external_id)
        .bind(display_name)
        .bind(handle)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(r) => Self::map_row(r),
            None => Err(TidemarkError::NotFound(format!("entity {handle}"))),
        }
    }

    async fn set_status(&self, handle: &str, status: EntityStatus) -> TidemarkResult<()> {
        let done = sqlx::query(
            "update tracked_entities set status = $1, updated_at = now() where handle = $2",
        )
        .bind(status.as_str())
        .bind(handle)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if done.rows_affected() == 0 {
            return Err(TidemarkError::NotFound(format!("entity {handle}")));
        }
        Ok(())
    }
}
