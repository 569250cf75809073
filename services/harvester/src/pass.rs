//! One full harvest: resolve identities, walk timelines, optionally walk
//! relationship lists, then record the outcome.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tidemark_common::error::TidemarkResult;
use tidemark_config::AppConfig;
use tidemark_db::entity::models::{EntityStatus, TrackedEntity};
use tidemark_db::run::models::RunStatus;
use tidemark_db::schema::UniqueIndex;
use tidemark_db::StoreHandle;
use tokio_util::sync::CancellationToken;

use crate::api::client::ApiClient;
use crate::api::endpoints::{FollowingEndpoint, TimelineEndpoint};
use crate::cursor::{CursorResolver, FullDepth};
use crate::error::HarvestError;
use crate::identity::{load_entity_list, EntityList, IdentityResolver};
use crate::orchestrator::{Orchestrator, Summary};
use crate::sink::{FollowingSink, RecordSink};
use crate::status::write_entity_list;

/// What the scheduler repeats.
#[async_trait]
pub trait HarvestCycle: Send + Sync {
    async fn run(&self, cancel: &CancellationToken) -> Result<Summary, HarvestError>;

    async fn record_count(&self) -> TidemarkResult<u64>;
}

#[derive(Debug, Clone)]
pub struct PassOptions {
    pub entity_list: PathBuf,
    pub refresh_entities: bool,
    pub harvest_following: bool,
    pub maintenance_every: usize,
    pub empty_list: PathBuf,
    pub private_list: PathBuf,
    pub not_found_list: PathBuf,
    pub duplicates_list: PathBuf,
}

impl PassOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            entity_list: config.entity_list.clone(),
            refresh_entities: config.schedule.refresh_entities,
            harvest_following: config.schedule.harvest_following,
            maintenance_every: config.schedule.maintenance_every,
            empty_list: config.artifact_path("empty"),
            private_list: config.artifact_path("private"),
            not_found_list: config.artifact_path("not_found"),
            duplicates_list: config.artifact_path("duplicates"),
        }
    }
}

pub struct HarvestPass {
    client: ApiClient,
    store: StoreHandle,
    options: PassOptions,
}

impl HarvestPass {
    pub fn new(client: ApiClient, store: StoreHandle, options: PassOptions) -> Self {
        Self {
            client,
            store,
            options,
        }
    }

    async fn harvest(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(Summary, EntityList), HarvestError> {
        let list = load_entity_list(&self.options.entity_list).await?;
        let entities = IdentityResolver::new(self.client.clone(), self.store.entities.clone())
            .resolve(&list, self.options.refresh_entities, cancel)
            .await?;

        let api = self.client.config();
        let timeline = Orchestrator::new(
            self.client.clone(),
            TimelineEndpoint::new(api.timeline_page_size),
            RecordSink::new(self.store.records.clone()),
            CursorResolver::new(self.store.records.clone()),
            self.options.maintenance_every,
        );
        let mut summary = timeline.run(&entities, cancel).await?;
        self.apply_statuses(&entities, &summary).await?;

        if self.options.harvest_following && !summary.interrupted {
            let walkable: Vec<TrackedEntity> = entities
                .iter()
                .filter(|e| !summary.private.contains(&e.handle))
                .cloned()
                .collect();
            let following = Orchestrator::new(
                self.client.clone(),
                FollowingEndpoint::new(api.following_page_size),
                FollowingSink::new(self.store.followings.clone()),
                FullDepth,
                self.options.maintenance_every,
            );
            let following_summary = following.run(&walkable, cancel).await?;
            summary.interrupted |= following_summary.interrupted;
        }

        summary.not_found.extend(list.invalid.iter().cloned());
        Ok((summary, list))
    }

    /// Persist each walked entity's new status. Entities skipped as
    /// not-found keep theirs, so unresolved names are looked up again.
    async fn apply_statuses(
        &self,
        entities: &[TrackedEntity],
        summary: &Summary,
    ) -> Result<(), HarvestError> {
        let current: HashMap<&str, &TrackedEntity> =
            entities.iter().map(|e| (e.handle.as_str(), e)).collect();

        let updates = [
            (&summary.ok, EntityStatus::Active),
            (&summary.unchanged, EntityStatus::Active),
            (&summary.empty, EntityStatus::Empty),
            (&summary.private, EntityStatus::Private),
            (&summary.not_found, EntityStatus::NotFound),
        ];

        for (handles, status) in updates {
            for handle in handles {
                let Some(entity) = current.get(handle.as_str()) else {
                    continue;
                };
                if entity.external_id.is_none() || entity.status == status {
                    continue;
                }
                self.store.entities.set_status(handle, status).await?;
            }
        }
        Ok(())
    }

    async fn write_artifacts(&self, summary: &Summary, list: &EntityList) {
        let artifacts = [
            (&self.options.empty_list, &summary.empty),
            (&self.options.private_list, &summary.private),
            (&self.options.not_found_list, &summary.not_found),
            (&self.options.duplicates_list, &list.duplicates),
        ];
        for (path, names) in artifacts {
            if let Err(e) = write_entity_list(path, names).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to write artifact");
            }
        }
    }
}

#[async_trait]
impl HarvestCycle for HarvestPass {
    async fn run(&self, cancel: &CancellationToken) -> Result<Summary, HarvestError> {
        self.store
            .records
            .create_unique_index(UniqueIndex::RecordId)
            .await?;
        if self.options.harvest_following {
            self.store
                .records
                .create_unique_index(UniqueIndex::FollowingPair)
                .await?;
        }

        if let Some(previous) = self.store.runs.latest().await? {
            match previous.status {
                RunStatus::Completed => tracing::info!(
                    run_id = %previous.id,
                    started_at = %previous.started_at,
                    "previous run completed"
                ),
                status => tracing::warn!(
                    run_id = %previous.id,
                    started_at = %previous.started_at,
                    %status,
                    "previous run did not complete"
                ),
            }
        }

        let run = self.store.runs.start().await?;
        tracing::info!(run_id = %run.id, "harvest run started");

        match self.harvest(cancel).await {
            Ok((summary, list)) => {
                let counts = summary.counts();
                let recorded = if summary.interrupted {
                    self.store.runs.mark_interrupted(run.id, &counts).await
                } else {
                    self.store.runs.mark_completed(run.id, &counts).await
                };
                if let Err(e) = recorded {
                    tracing::warn!(run_id = %run.id, error = %e, "failed to record run outcome");
                }
                if summary.interrupted {
                    tracing::info!("run interrupted, keeping previous entity artifacts");
                } else {
                    self.write_artifacts(&summary, &list).await;
                }
                tracing::info!(
                    run_id = %run.id,
                    interrupted = summary.interrupted,
                    inserted = summary.inserted,
                    "harvest run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(mark_err) = self.store.runs.mark_failed(run.id, &e.to_string()).await {
                    tracing::warn!(run_id = %run.id, error = %mark_err, "failed to record run failure");
                }
                Err(e)
            }
        }
    }

    async fn record_count(&self) -> TidemarkResult<u64> {
        self.store.records.count_all().await
    }
}
