//! Turns the operator's entity list into resolved tracked entities.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tidemark_db::entity::models::{EntityStatus, TrackedEntity};
use tidemark_db::entity::repositories::EntityRepository;
use tokio_util::sync::CancellationToken;

use crate::api::client::{ApiClient, ClientError, Fetched};
use crate::api::endpoints::user_lookup;
use crate::api::models::ApiUser;
use crate::error::HarvestError;

const MAX_NAME_LEN: usize = 15;

/// Parsed entity list: unique valid names in file order plus the rejects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityList {
    pub names: Vec<String>,
    pub duplicates: Vec<String>,
    pub invalid: Vec<String>,
}

pub fn is_valid_name(name: &str) -> bool {
    (1..=MAX_NAME_LEN).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// One name per line; blank lines and a leading `@` are ignored.
/// Duplicates compare case-insensitively, as the remote system does.
pub fn parse_entity_list(text: &str) -> EntityList {
    let mut list = EntityList::default();
    let mut seen = HashSet::new();

    for line in text.lines() {
        let name = line.trim();
        let name = name.strip_prefix('@').unwrap_or(name);
        if name.is_empty() {
            continue;
        }
        if !is_valid_name(name) {
            list.invalid.push(name.to_string());
            continue;
        }
        if !seen.insert(name.to_ascii_lowercase()) {
            list.duplicates.push(name.to_string());
            continue;
        }
        list.names.push(name.to_string());
    }

    list
}

pub async fn load_entity_list(path: &Path) -> Result<EntityList, HarvestError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        HarvestError::Config(format!("cannot read entity list {}: {e}", path.display()))
    })?;
    let list = parse_entity_list(&text);
    if !list.invalid.is_empty() {
        tracing::warn!(invalid = ?list.invalid, "entity list contains invalid names");
    }
    if !list.duplicates.is_empty() {
        tracing::warn!(duplicates = ?list.duplicates, "entity list contains duplicates");
    }
    Ok(list)
}

/// Registers listed names and looks up the ones without a remote id.
pub struct IdentityResolver {
    client: ApiClient,
    entities: Arc<dyn EntityRepository>,
    batch_size: usize,
}

impl IdentityResolver {
    pub fn new(client: ApiClient, entities: Arc<dyn EntityRepository>) -> Self {
        let batch_size = client.config().lookup_batch_size.max(1) as usize;
        Self {
            client,
            entities,
            batch_size,
        }
    }

    /// Resolve every name in `list`, returning the stored entities in list
    /// order. With `refresh`, names already resolved are looked up again.
    ///
    /// Lookup batches that fail transiently leave their names unresolved for
    /// the next run; rejected credentials fail the whole call.
    pub async fn resolve(
        &self,
        list: &EntityList,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<TrackedEntity>, HarvestError> {
        let mut pending = Vec::new();
        for name in &list.names {
            let entity = self.entities.register(name).await?;
            let known = entity.external_id.is_some() || entity.status == EntityStatus::NotFound;
            if refresh || !known {
                pending.push(entity.handle);
            }
        }

        tracing::info!(
            listed = list.names.len(),
            to_look_up = pending.len(),
            refresh,
            "resolving entities"
        );

        for batch in pending.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                break;
            }
            self.resolve_batch(batch, cancel).await?;
        }

        let mut resolved = Vec::with_capacity(list.names.len());
        for name in &list.names {
            if let Some(entity) = self.entities.get(name).await? {
                resolved.push(entity);
            }
        }
        Ok(resolved)
    }

    /// Look up one batch. Any name absent from the returned data is marked
    /// not-found, whatever problems the response lists alongside it.
    async fn resolve_batch(
        &self,
        batch: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        let request = user_lookup(batch);
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(batch = batch.len(), "lookup interrupted");
                return Ok(());
            }
            result = self.client.fetch::<ApiUser>(&request) => result,
        };

        let users: Vec<ApiUser> = match fetched {
            Ok(Fetched::Page(page)) => page.items,
            Ok(Fetched::Empty)
            | Err(ClientError::NotFound(_))
            | Err(ClientError::Private(_))
            | Err(ClientError::Problem(_)) => Vec::new(),
            Err(ClientError::AuthFailure(body)) => return Err(HarvestError::AuthFailure(body)),
            Err(e) => {
                tracing::warn!(batch = batch.len(), error = %e, "lookup failed, retrying next run");
                return Ok(());
            }
        };

        for name in batch {
            let found = users.iter().find(|u| {
                u.username
                    .as_deref()
                    .is_some_and(|username| username.eq_ignore_ascii_case(name))
            });
            match found {
                Some(user) => {
                    self.entities
                        .mark_resolved(name, &user.id, user.name.as_deref())
                        .await?;
                }
                None => {
                    tracing::info!(entity = %name, "no such account");
                    self.entities.set_status(name, EntityStatus::NotFound).await?;
                }
            }
        }
        Ok(())
    }
}
