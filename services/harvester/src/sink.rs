use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tidemark_common::error::{TidemarkError, TidemarkResult};
use tidemark_db::following::models::Following;
use tidemark_db::following::repositories::FollowingStore;
use tidemark_db::record::models::{InsertOutcome, Record};
use tidemark_db::record::repositories::RecordStore;

use crate::api::models::{ApiPost, ApiUser};

/// Store-facing end of a walk. Re-delivered items come back as
/// `AlreadyExists`; only real store failures are errors.
#[async_trait]
pub trait PageSink: Send + Sync {
    type Item: Send + Sync;

    async fn insert(&self, owner_id: &str, item: &Self::Item) -> TidemarkResult<InsertOutcome>;

    async fn count_for(&self, owner_id: &str) -> TidemarkResult<u64>;

    /// Periodic upkeep between entities.
    async fn maintain(&self) -> TidemarkResult<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct RecordSink {
    store: Arc<dyn RecordStore>,
}

impl RecordSink {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

/// Convert a wire post into a stored record, keeping the payload verbatim.
pub fn post_to_record(owner_id: &str, post: &ApiPost) -> TidemarkResult<Record> {
    let id = post
        .id
        .parse::<i64>()
        .map_err(|_| TidemarkError::Validation(format!("post id {:?} is not numeric", post.id)))?;

    let created_at = post
        .created_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let payload =
        serde_json::to_value(post).map_err(|e| TidemarkError::Internal(e.to_string()))?;

    Ok(Record {
        id,
        author_id: post
            .author_id
            .clone()
            .unwrap_or_else(|| owner_id.to_string()),
        created_at,
        payload,
    })
}

#[async_trait]
impl PageSink for RecordSink {
    type Item = ApiPost;

    async fn insert(&self, owner_id: &str, item: &ApiPost) -> TidemarkResult<InsertOutcome> {
        let record = post_to_record(owner_id, item)?;
        self.store.insert_if_absent(&record).await
    }

    async fn count_for(&self, owner_id: &str) -> TidemarkResult<u64> {
        self.store.count_for(owner_id).await
    }

    async fn maintain(&self) -> TidemarkResult<()> {
        self.store.rebuild_indexes().await
    }
}

#[derive(Clone)]
pub struct FollowingSink {
    store: Arc<dyn FollowingStore>,
}

impl FollowingSink {
    pub fn new(store: Arc<dyn FollowingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PageSink for FollowingSink {
    type Item = ApiUser;

    async fn insert(&self, owner_id: &str, item: &ApiUser) -> TidemarkResult<InsertOutcome> {
        let payload =
            serde_json::to_value(item).map_err(|e| TidemarkError::Internal(e.to_string()))?;
        let following = Following {
            follower_id: owner_id.to_string(),
            followed_id: item.id.clone(),
            username: item.username.clone(),
            display_name: item.name.clone(),
            payload,
        };
        self.store.insert_if_absent(&following).await
    }

    async fn count_for(&self, owner_id: &str) -> TidemarkResult<u64> {
        self.store.count_for(owner_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidemark_db::memory::MemoryStore;

    fn post(id: &str) -> ApiPost {
        serde_json::from_value(json!({
            "id": id,
            "author_id": "42",
            "created_at": "2021-03-04T10:11:12.000Z",
            "text": "original text"
        }))
        .unwrap()
    }

    #[test]
    fn record_keeps_payload_and_parses_fields() {
        let record = post_to_record("42", &post("1001")).unwrap();
        assert_eq!(record.id, 1001);
        assert_eq!(record.author_id, "42");
        assert_eq!(
            record.created_at.unwrap().to_rfc3339(),
            "2021-03-04T10:11:12+00:00"
        );
        assert_eq!(record.payload["created_at"], "2021-03-04T10:11:12.000Z");
        assert_eq!(record.payload["text"], "original text");
    }

    #[test]
    fn missing_author_falls_back_to_owner() {
        let bare: ApiPost = serde_json::from_value(json!({"id": "7"})).unwrap();
        let record = post_to_record("99", &bare).unwrap();
        assert_eq!(record.author_id, "99");
        assert!(record.created_at.is_none());
    }

    #[test]
    fn non_numeric_id_is_validation_error() {
        let err = post_to_record("42", &post("abc")).unwrap_err();
        assert!(matches!(err, TidemarkError::Validation(_)));
    }

    #[tokio::test]
    async fn inserting_twice_keeps_one_copy() {
        let store = Arc::new(MemoryStore::new());
        let sink = RecordSink::new(store.clone());

        let first = sink.insert("42", &post("5")).await.unwrap();
        let mut replay = post("5");
        replay.rest.insert("text".into(), json!("changed"));
        let second = sink.insert("42", &replay).await.unwrap();

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::AlreadyExists);
        assert_eq!(sink.count_for("42").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn store_outage_propagates() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let err = RecordSink::new(store)
            .insert("42", &post("5"))
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn record_sink_maintenance_rebuilds_indexes() {
        let store = Arc::new(MemoryStore::new());
        RecordSink::new(store.clone()).maintain().await.unwrap();
        assert_eq!(store.rebuild_count(), 1);
    }

    #[tokio::test]
    async fn following_sink_tags_follower() {
        let store = Arc::new(MemoryStore::new());
        let sink = FollowingSink::new(store.clone());
        let user: ApiUser =
            serde_json::from_value(json!({"id": "8", "username": "eight", "name": "Eight"}))
                .unwrap();

        assert!(sink.insert("42", &user).await.unwrap().is_inserted());
        assert!(!sink.insert("42", &user).await.unwrap().is_inserted());
        assert!(sink.insert("43", &user).await.unwrap().is_inserted());
        assert_eq!(sink.count_for("42").await.unwrap(), 1);
    }
}
