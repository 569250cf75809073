use async_trait::async_trait;

use crate::entity::models::{EntityStatus, TrackedEntity};
use tidemark_common::error::TidemarkResult;

#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Insert the handle as `unresolved` if unseen. Returns the stored entity.
    async fn register(&self, handle: &str) -> TidemarkResult<TrackedEntity>;

    async fn get(&self, handle: &str) -> TidemarkResult<Option<TrackedEntity>>;

    /// Record the remote id and display name. Entities that were
    /// `unresolved` or `not_found` become `active`; other statuses are kept.
    async fn mark_resolved(
        &self,
        handle: &str,
        external_id: &str,
        display_name: Option<&str>,
    ) -> TidemarkResult<TrackedEntity>;

    async fn set_status(&self, handle: &str, status: EntityStatus) -> TidemarkResult<()>;
}
