//! Table bootstrap and index management shared by the Postgres repositories.

use sqlx::PgPool;
use tidemark_common::error::TidemarkResult;

use crate::map_sqlx_error;

/// Unique indexes the store relies on for idempotent inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniqueIndex {
    /// One stored copy per record id.
    RecordId,
    /// One row per (follower, followed) pair; two entities may follow the
    /// same account.
    FollowingPair,
}

impl UniqueIndex {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RecordId => "records_record_id_uidx",
            Self::FollowingPair => "followings_pair_uidx",
        }
    }

    pub(crate) fn create_sql(&self) -> &'static str {
        match self {
            Self::RecordId => {
                "create unique index if not exists records_record_id_uidx
                 on records(record_id)"
            }
            Self::FollowingPair => {
                "create unique index if not exists followings_pair_uidx
                 on followings(follower_id, followed_id)"
            }
        }
    }
}

const TABLES: &[&str] = &[
    "create table if not exists records (
       record_id bigint not null,
       author_id text not null,
       created_at_remote timestamptz,
       payload jsonb not null,
       harvested_at timestamptz not null default now()
     )",
    "create index if not exists records_author_idx on records(author_id, record_id desc)",
    "create table if not exists tracked_entities (
       handle text primary key,
       external_id text,
       display_name text,
       status text not null default 'unresolved',
       created_at timestamptz not null default now(),
       updated_at timestamptz not null default now()
     )",
    "create table if not exists followings (
       follower_id text not null,
       followed_id text not null,
       username text,
       display_name text,
       payload jsonb not null,
       harvested_at timestamptz not null default now()
     )",
    "create table if not exists harvest_runs (
       id uuid primary key,
       status text not null,
       started_at timestamptz not null,
       finished_at timestamptz,
       ok_count bigint not null default 0,
       unchanged_count bigint not null default 0,
       empty_count bigint not null default 0,
       private_count bigint not null default 0,
       not_found_count bigint not null default 0,
       aborted_count bigint not null default 0,
       records_inserted bigint not null default 0,
       error_message text
     )",
];

/// Create every table and unique index if missing. Idempotent.
pub async fn ensure_schema(pool: &PgPool) -> TidemarkResult<()> {
    for statement in TABLES {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(map_sqlx_error)?;
    }
    for index in [UniqueIndex::RecordId, UniqueIndex::FollowingPair] {
        create_unique_index(pool, index).await?;
    }
    tracing::debug!("schema ensured");
    Ok(())
}

pub(crate) async fn create_unique_index(pool: &PgPool, index: UniqueIndex) -> TidemarkResult<()> {
    sqlx::query(index.create_sql())
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_sql_names_match() {
        for index in [UniqueIndex::RecordId, UniqueIndex::FollowingPair] {
            assert!(index.create_sql().contains(index.name()));
            assert!(index.create_sql().starts_with("create unique index if not exists"));
        }
    }
}
