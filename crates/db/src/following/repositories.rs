use async_trait::async_trait;

use crate::following::models::Following;
use crate::record::models::InsertOutcome;
use tidemark_common::error::TidemarkResult;

#[async_trait]
pub trait FollowingStore: Send + Sync {
    /// Insert unless the (follower, followed) pair is already stored.
    async fn insert_if_absent(&self, following: &Following) -> TidemarkResult<InsertOutcome>;

    async fn count_for(&self, follower_id: &str) -> TidemarkResult<u64>;
}
