use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One harvested item. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Remote id; both the dedup key and the ordering key.
    pub id: i64,
    pub author_id: String,
    pub created_at: Option<DateTime<Utc>>,
    /// The API object exactly as delivered.
    pub payload: serde_json::Value,
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A copy with the same key is already stored; the new payload was dropped.
    AlreadyExists,
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted)
    }
}
