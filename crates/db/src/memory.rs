//! In-process store backing the harvester's tests.
//!
//! Implements every repository trait over plain collections behind a mutex.
//! An outage can be simulated with [`MemoryStore::set_unavailable`]: every
//! call then fails with `StoreUnavailable`, as a dropped connection would.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::entity::models::{EntityStatus, TrackedEntity};
use crate::entity::repositories::EntityRepository;
use crate::following::models::Following;
use crate::following::repositories::FollowingStore;
use crate::record::models::{InsertOutcome, Record};
use crate::record::repositories::RecordStore;
use crate::run::models::{HarvestRun, RunCounts, RunStatus};
use crate::run::repositories::RunRepository;
use crate::schema::UniqueIndex;
use tidemark_common::error::{TidemarkError, TidemarkResult};

#[derive(Default)]
struct State {
    records: BTreeMap<i64, Record>,
    entities: Vec<TrackedEntity>,
    followings: Vec<Following>,
    following_keys: HashSet<(String, String)>,
    runs: Vec<HarvestRun>,
    indexes: HashSet<UniqueIndex>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    rebuilds: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the connection was lost.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of completed `rebuild_indexes` calls.
    #[must_use]
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }

    /// Stored record ids for an author, ascending.
    pub fn record_ids_for(&self, author_id: &str) -> Vec<i64> {
        self.state
            .lock()
            .map(|s| {
                s.records
                    .values()
                    .filter(|r| r.author_id == author_id)
                    .map(|r| r.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_index(&self, index: UniqueIndex) -> bool {
        self.state
            .lock()
            .map(|s| s.indexes.contains(&index))
            .unwrap_or(false)
    }

    fn lock(&self) -> TidemarkResult<MutexGuard<'_, State>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TidemarkError::StoreUnavailable(
                "memory store marked unavailable".into(),
            ));
        }
        self.state
            .lock()
            .map_err(|_| TidemarkError::Internal("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_max_id(&self, author_id: &str) -> TidemarkResult<Option<i64>> {
        let state = self.lock()?;
        Ok(state
            .records
            .values()
            .filter(|r| r.author_id == author_id)
            .map(|r| r.id)
            .max())
    }

    async fn insert_if_absent(&self, record: &Record) -> TidemarkResult<InsertOutcome> {
        let mut state = self.lock()?;
        if state.records.contains_key(&record.id) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        state.records.insert(record.id, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn count_for(&self, author_id: &str) -> TidemarkResult<u64> {
        let state = self.lock()?;
        Ok(state
            .records
            .values()
            .filter(|r| r.author_id == author_id)
            .count() as u64)
    }

    async fn count_all(&self) -> TidemarkResult<u64> {
        Ok(self.lock()?.records.len() as u64)
    }

    async fn create_unique_index(&self, index: UniqueIndex) -> TidemarkResult<()> {
        self.lock()?.indexes.insert(index);
        Ok(())
    }

    async fn rebuild_indexes(&self) -> TidemarkResult<()> {
        let _state = self.lock()?;
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl EntityRepository for MemoryStore {
    async fn register(&self, handle: &str) -> TidemarkResult<TrackedEntity> {
        let mut state = self.lock()?;
        if let Some(existing) = state.entities.iter().find(|e| e.handle == handle) {
            return Ok(existing.clone());
        }
        let entity = TrackedEntity::new(handle);
        state.entities.push(entity.clone());
        Ok(entity)
    }

    async fn get(&self, handle: &str) -> TidemarkResult<Option<TrackedEntity>> {
        let state = self.lock()?;
        Ok(state.entities.iter().find(|e| e.handle == handle).cloned())
    }

    async fn mark_resolved(
        &self,
        handle: &str,
        external_id: &str,
        display_name: Option<&str>,
    ) -> TidemarkResult<TrackedEntity> {
        let mut state = self.lock()?;
        let entity = state
            .entities
            .iter_mut()
            .find(|e| e.handle == handle)
            .ok_or_else(|| TidemarkError::NotFound(format!("entity {handle}")))?;

        entity.external_id = Some(external_id.to_string());
        if let Some(name) = display_name {
            entity.display_name = Some(name.to_string());
        }
        if matches!(
            entity.status,
            EntityStatus::Unresolved | EntityStatus::NotFound
        ) {
            entity.status = EntityStatus::Active;
        }
        entity.updated_at = Utc::now();
        Ok(entity.clone())
    }

    async fn set_status(&self, handle: &str, status: EntityStatus) -> TidemarkResult<()> {
        let mut state = self.lock()?;
        let entity = state
            .entities
            .iter_mut()
            .find(|e| e.handle == handle)
            .ok_or_else(|| TidemarkError::NotFound(format!("entity {handle}")))?;
        entity.status = status;
        entity.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl FollowingStore for MemoryStore {
    async fn insert_if_absent(&self, following: &Following) -> TidemarkResult<InsertOutcome> {
        let mut state = self.lock()?;
        let key = (following.follower_id.clone(), following.followed_id.clone());
        if !state.following_keys.insert(key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        state.followings.push(following.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn count_for(&self, follower_id: &str) -> TidemarkResult<u64> {
        let state = self.lock()?;
        Ok(state
            .followings
            .iter()
            .filter(|f| f.follower_id == follower_id)
            .count() as u64)
    }
}

#[async_trait]
impl RunRepository for MemoryStore {
    async fn start(&self) -> TidemarkResult<HarvestRun> {
        let mut state = self.lock()?;
        let now = Utc::now();
        for run in state
            .runs
            .iter_mut()
            .filter(|r| r.status == RunStatus::Running)
        {
            run.status = RunStatus::Abandoned;
            run.finished_at = Some(now);
        }
        let run = HarvestRun {
            id: Uuid::new_v4(),
            status: RunStatus::Running,
            started_at: now,
            finished_at: None,
            counts: RunCounts::default(),
            error_message: None,
        };
        state.runs.push(run.clone());
        Ok(run)
    }

    async fn mark_completed(&self, id: Uuid, counts: &RunCounts) -> TidemarkResult<HarvestRun> {
        self.finish(id, |run| {
            run.status = RunStatus::Completed;
            run.counts = *counts;
        })
    }

    async fn mark_interrupted(&self, id: Uuid, counts: &RunCounts) -> TidemarkResult<HarvestRun> {
        self.finish(id, |run| {
            run.status = RunStatus::Interrupted;
            run.counts = *counts;
        })
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> TidemarkResult<HarvestRun> {
        self.finish(id, |run| {
            run.status = RunStatus::Failed;
            run.error_message = Some(error_message.to_string());
        })
    }

    async fn latest(&self) -> TidemarkResult<Option<HarvestRun>> {
        Ok(self.lock()?.runs.last().cloned())
    }
}

impl MemoryStore {
    fn finish(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut HarvestRun),
    ) -> TidemarkResult<HarvestRun> {
        let mut state = self.lock()?;
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| TidemarkError::NotFound(format!("harvest run {id}")))?;
        apply(run);
        run.finished_at = Some(Utc::now());
        Ok(run.clone())
    }
}
