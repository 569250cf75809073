use async_trait::async_trait;
use uuid::Uuid;

use crate::run::models::{HarvestRun, RunCounts};
use tidemark_common::error::TidemarkResult;

#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Open a new `running` row. Rows still `running` from an earlier
    /// process are marked `abandoned` first.
    async fn start(&self) -> TidemarkResult<HarvestRun>;

    async fn mark_completed(&self, id: Uuid, counts: &RunCounts) -> TidemarkResult<HarvestRun>;

    async fn mark_interrupted(&self, id: Uuid, counts: &RunCounts) -> TidemarkResult<HarvestRun>;

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> TidemarkResult<HarvestRun>;

    /// Most recently started run, if any.
    async fn latest(&self) -> TidemarkResult<Option<HarvestRun>>;
}
