use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tidemark_common::error::TidemarkResult;
use tidemark_db::record::repositories::RecordStore;

/// Resume point for one entity's walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowWaterMark {
    /// Nothing stored yet: fetch the deepest history the API offers.
    BeginningOfTime,
    /// Only fetch items with an id above this one.
    After(i64),
}

impl LowWaterMark {
    pub fn is_first_contact(&self) -> bool {
        matches!(self, Self::BeginningOfTime)
    }
}

impl fmt::Display for LowWaterMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeginningOfTime => f.write_str("beginning-of-time"),
            Self::After(id) => write!(f, "{id}"),
        }
    }
}

#[async_trait]
pub trait CursorSource: Send + Sync {
    async fn resolve(&self, owner_id: &str) -> TidemarkResult<LowWaterMark>;
}

/// Reads the low-water mark from stored records. Never cached: every walk
/// asks the store again.
#[derive(Clone)]
pub struct CursorResolver {
    store: Arc<dyn RecordStore>,
}

impl CursorResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CursorSource for CursorResolver {
    async fn resolve(&self, owner_id: &str) -> TidemarkResult<LowWaterMark> {
        Ok(match self.store.find_max_id(owner_id).await? {
            Some(id) => LowWaterMark::After(id),
            None => LowWaterMark::BeginningOfTime,
        })
    }
}

/// Always walks from the start; for listings without an id filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullDepth;

#[async_trait]
impl CursorSource for FullDepth {
    async fn resolve(&self, _owner_id: &str) -> TidemarkResult<LowWaterMark> {
        Ok(LowWaterMark::BeginningOfTime)
    }
}
