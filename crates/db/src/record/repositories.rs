use async_trait::async_trait;

use crate::record::models::{InsertOutcome, Record};
use crate::schema::UniqueIndex;
use tidemark_common::error::TidemarkResult;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Highest stored record id for an author, `None` if nothing is stored.
    async fn find_max_id(&self, author_id: &str) -> TidemarkResult<Option<i64>>;

    /// Insert unless a record with the same id exists. First write wins.
    async fn insert_if_absent(&self, record: &Record) -> TidemarkResult<InsertOutcome>;

    async fn count_for(&self, author_id: &str) -> TidemarkResult<u64>;

    async fn count_all(&self) -> TidemarkResult<u64>;

    async fn create_unique_index(&self, index: UniqueIndex) -> TidemarkResult<()>;

    /// Rebuild record indexes to keep insert latency flat over long runs.
    async fn rebuild_indexes(&self) -> TidemarkResult<()>;
}
