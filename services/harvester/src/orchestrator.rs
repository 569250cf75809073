use tidemark_db::entity::models::{EntityStatus, TrackedEntity};
use tidemark_db::run::models::RunCounts;
use tokio_util::sync::CancellationToken;

use crate::api::client::ApiClient;
use crate::api::endpoints::Endpoint;
use crate::cursor::CursorSource;
use crate::error::HarvestError;
use crate::sink::PageSink;
use crate::walker::{AbortReason, WalkOutcome, WalkTally, Walker};

/// How one entity ended up after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityClass {
    /// Walk drained and delivered at least one item.
    Ok,
    /// Known entity; the walk found nothing newer than the low-water mark.
    Unchanged,
    /// First contact and still nothing to harvest.
    Empty,
    Private,
    NotFound,
    Aborted(AbortReason),
}

/// End-of-run report, built up by the orchestrator and returned by value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub ok: Vec<String>,
    pub unchanged: Vec<String>,
    pub empty: Vec<String>,
    pub private: Vec<String>,
    pub not_found: Vec<String>,
    pub aborted: Vec<(String, AbortReason)>,
    pub fetched: u64,
    pub inserted: u64,
    pub duplicates: u64,
    /// The run stopped early on an operator interrupt.
    pub interrupted: bool,
}

impl Summary {
    fn record(&mut self, handle: &str, class: EntityClass) {
        let handle = handle.to_string();
        match class {
            EntityClass::Ok => self.ok.push(handle),
            EntityClass::Unchanged => self.unchanged.push(handle),
            EntityClass::Empty => self.empty.push(handle),
            EntityClass::Private => self.private.push(handle),
            EntityClass::NotFound => self.not_found.push(handle),
            EntityClass::Aborted(reason) => self.aborted.push((handle, reason)),
        }
    }

    fn add_tally(&mut self, tally: WalkTally) {
        self.fetched += tally.fetched;
        self.inserted += tally.inserted;
        self.duplicates += tally.duplicates;
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts {
            ok: self.ok.len() as i64,
            unchanged: self.unchanged.len() as i64,
            empty: self.empty.len() as i64,
            private: self.private.len() as i64,
            not_found: self.not_found.len() as i64,
            aborted: self.aborted.len() as i64,
            records_inserted: self.inserted as i64,
        }
    }

    pub fn log(&self, what: &str) {
        tracing::info!(
            what,
            ok = self.ok.len(),
            unchanged = self.unchanged.len(),
            empty = self.empty.len(),
            private = self.private.len(),
            not_found = self.not_found.len(),
            aborted = self.aborted.len(),
            fetched = self.fetched,
            inserted = self.inserted,
            duplicates = self.duplicates,
            interrupted = self.interrupted,
            "harvest summary"
        );
        for (handle, reason) in &self.aborted {
            tracing::warn!(what, entity = %handle, %reason, "entity aborted");
        }
    }
}

/// Walks every tracked entity in list order, one at a time.
pub struct Orchestrator<E, S, C> {
    client: ApiClient,
    endpoint: E,
    sink: S,
    cursor: C,
    maintenance_every: usize,
}

impl<E, S, C> Orchestrator<E, S, C>
where
    E: Endpoint,
    S: PageSink<Item = E::Item>,
    C: CursorSource,
{
    pub fn new(client: ApiClient, endpoint: E, sink: S, cursor: C, maintenance_every: usize) -> Self {
        Self {
            client,
            endpoint,
            sink,
            cursor,
            maintenance_every,
        }
    }

    /// Harvest `entities`. Entity-local failures are recorded in the summary;
    /// rejected credentials or an unreachable store end the run with an error.
    pub async fn run(
        &self,
        entities: &[TrackedEntity],
        cancel: &CancellationToken,
    ) -> Result<Summary, HarvestError> {
        let mut summary = Summary::default();
        let walker = Walker::new(&self.client, &self.endpoint, &self.sink);
        let mut since_maintenance = 0usize;

        tracing::info!(
            endpoint = self.endpoint.name(),
            entities = entities.len(),
            "starting harvest"
        );

        for entity in entities {
            if cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            let owner_id = match (&entity.external_id, entity.status) {
                (_, EntityStatus::NotFound) | (None, _) => {
                    tracing::debug!(entity = entity.label(), "not resolved, skipping");
                    summary.record(&entity.handle, EntityClass::NotFound);
                    continue;
                }
                (Some(id), _) => id.as_str(),
            };

            let low_water_mark = match self.cursor.resolve(owner_id).await {
                Ok(lwm) => lwm,
                Err(e) if e.is_store_unavailable() => {
                    return Err(HarvestError::StoreUnavailable(e.to_string()))
                }
                Err(e) => {
                    tracing::warn!(entity = entity.label(), error = %e, "cursor lookup failed");
                    summary.record(
                        &entity.handle,
                        EntityClass::Aborted(AbortReason::Store {
                            unavailable: false,
                            message: e.to_string(),
                        }),
                    );
                    continue;
                }
            };

            tracing::debug!(
                endpoint = self.endpoint.name(),
                entity = entity.label(),
                low_water_mark = %low_water_mark,
                "walking"
            );

            let outcome = walker.walk(owner_id, low_water_mark, cancel).await;
            summary.add_tally(outcome.tally());

            let class = match outcome {
                WalkOutcome::Drained(tally) if tally.fetched > 0 => EntityClass::Ok,
                WalkOutcome::Drained(_) if low_water_mark.is_first_contact() => EntityClass::Empty,
                WalkOutcome::Drained(_) => EntityClass::Unchanged,
                WalkOutcome::Aborted { reason, .. } => match reason {
                    AbortReason::AuthFailure(body) => return Err(HarvestError::AuthFailure(body)),
                    AbortReason::Store {
                        unavailable: true,
                        message,
                    } => return Err(HarvestError::StoreUnavailable(message)),
                    AbortReason::Interrupted => {
                        summary.interrupted = true;
                        summary.record(&entity.handle, EntityClass::Aborted(AbortReason::Interrupted));
                        break;
                    }
                    AbortReason::Private => EntityClass::Private,
                    AbortReason::NotFound => EntityClass::NotFound,
                    other => EntityClass::Aborted(other),
                },
            };

            match self.sink.count_for(owner_id).await {
                Ok(count) => tracing::info!(
                    endpoint = self.endpoint.name(),
                    entity = entity.label(),
                    class = ?class,
                    stored = count,
                    "entity done"
                ),
                Err(e) => tracing::warn!(entity = entity.label(), error = %e, "count failed"),
            }
            summary.record(&entity.handle, class);

            since_maintenance += 1;
            if self.maintenance_every > 0 && since_maintenance >= self.maintenance_every {
                self.maintain().await;
                since_maintenance = 0;
            }
        }

        if since_maintenance > 0 {
            self.maintain().await;
        }

        summary.log(self.endpoint.name());
        Ok(summary)
    }

    async fn maintain(&self) {
        match self.sink.maintain().await {
            Ok(()) => tracing::debug!(endpoint = self.endpoint.name(), "store maintenance done"),
            Err(e) => tracing::warn!(error = %e, "store maintenance failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use tidemark_db::memory::MemoryStore;
    use tidemark_db::record::models::Record;
    use tidemark_db::record::repositories::RecordStore;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api::client::test_config;
    use crate::api::endpoints::{FollowingEndpoint, TimelineEndpoint};
    use crate::cursor::{CursorResolver, FullDepth};
    use crate::sink::{FollowingSink, RecordSink};

    fn posts(author: &str, ids: &[i64]) -> serde_json::Value {
        let data: Vec<_> = ids
            .iter()
            .map(|id| json!({"id": id.to_string(), "author_id": author, "text": "x"}))
            .collect();
        json!({"data": data, "meta": {"result_count": ids.len()}})
    }

    fn empty() -> serde_json::Value {
        json!({"meta": {"result_count": 0}})
    }

    fn orchestrator(
        server: &MockServer,
        store: &Arc<MemoryStore>,
        maintenance_every: usize,
    ) -> Orchestrator<TimelineEndpoint, RecordSink, CursorResolver> {
        Orchestrator::new(
            ApiClient::new(test_config(&server.uri())).unwrap(),
            TimelineEndpoint::new(500),
            RecordSink::new(store.clone()),
            CursorResolver::new(store.clone()),
            maintenance_every,
        )
    }

    async fn mount(server: &MockServer, owner: &str, body: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(query_param("query", format!("(from:{owner})")))
            .respond_with(body)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn malformed_entity_does_not_stop_the_rest() {
        let server = MockServer::start().await;
        mount(&server, "1", ResponseTemplate::new(200).set_body_json(posts("1", &[10, 11]))).await;
        mount(&server, "2", ResponseTemplate::new(200).set_body_string("garbage")).await;
        mount(&server, "3", ResponseTemplate::new(200).set_body_json(empty())).await;

        let store = Arc::new(MemoryStore::new());
        let entities = vec![
            TrackedEntity::resolved("one", "1"),
            TrackedEntity::resolved("two", "2"),
            TrackedEntity::resolved("three", "3"),
        ];

        let summary = orchestrator(&server, &store, 100)
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.ok, vec!["one"]);
        assert_eq!(summary.empty, vec!["three"]);
        assert_eq!(summary.aborted.len(), 1);
        assert_eq!(summary.aborted[0].0, "two");
        assert!(matches!(summary.aborted[0].1, AbortReason::Malformed(_)));
        assert_eq!(summary.inserted, 2);
        assert!(!summary.interrupted);
    }

    #[tokio::test]
    async fn known_entity_without_new_posts_is_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("since_id", "999"))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty()))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store
            .insert_if_absent(&Record {
                id: 999,
                author_id: "2".into(),
                created_at: None,
                payload: json!({"id": "999"}),
            })
            .await
            .unwrap();

        let summary = orchestrator(&server, &store, 100)
            .run(&[TrackedEntity::resolved("e2", "2")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.unchanged, vec!["e2"]);
        assert!(summary.empty.is_empty());
        assert_eq!(summary.inserted, 0);
    }

    #[tokio::test]
    async fn private_and_unresolved_entities_are_classified() {
        let server = MockServer::start().await;
        mount(
            &server,
            "5",
            ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{
                    "title": "Authorization Error",
                    "type": "https://api.twitter.com/2/problems/not-authorized-for-resource"
                }]
            })),
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        let mut gone = TrackedEntity::new("gone");
        gone.status = EntityStatus::NotFound;
        let entities = vec![
            TrackedEntity::resolved("locked", "5"),
            TrackedEntity::new("pending"),
            gone,
        ];

        let summary = orchestrator(&server, &store, 100)
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.private, vec!["locked"]);
        assert_eq!(summary.not_found, vec!["pending", "gone"]);
    }

    #[tokio::test]
    async fn auth_failure_halts_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let entities = vec![
            TrackedEntity::resolved("a", "1"),
            TrackedEntity::resolved("b", "2"),
        ];

        let err = orchestrator(&server, &store, 100)
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::AuthFailure(_)));
    }

    #[tokio::test]
    async fn unreachable_store_halts_the_run() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);

        let err = orchestrator(&server, &store, 100)
            .run(&[TrackedEntity::resolved("a", "1")], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn interrupt_stops_before_next_entity() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = orchestrator(&server, &store, 100)
            .run(&[TrackedEntity::resolved("a", "1")], &cancel)
            .await
            .unwrap();
        assert!(summary.interrupted);
        assert!(summary.ok.is_empty());
    }

    #[tokio::test]
    async fn maintenance_runs_periodically_and_at_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty()))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let entities: Vec<_> = (1..=5)
            .map(|i| TrackedEntity::resolved(&format!("e{i}"), &i.to_string()))
            .collect();

        orchestrator(&server, &store, 2)
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();

        // after e2, after e4, and once more for e5
        assert_eq!(store.rebuild_count(), 3);
    }

    #[tokio::test]
    async fn following_walk_reuses_the_walker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock::matchers::path("/2/users/1/following"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "8", "username": "eight"}, {"id": "9", "username": "nine"}],
                "meta": {"result_count": 2}
            })))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(
            ApiClient::new(test_config(&server.uri())).unwrap(),
            FollowingEndpoint::new(1000),
            FollowingSink::new(store.clone()),
            FullDepth,
            100,
        );

        let summary = orchestrator
            .run(&[TrackedEntity::resolved("a", "1")], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.ok, vec!["a"]);
        assert_eq!(summary.inserted, 2);
    }

    #[test]
    fn counts_follow_summary_lists() {
        let mut summary = Summary::default();
        summary.record("a", EntityClass::Ok);
        summary.record("b", EntityClass::Empty);
        summary.record("c", EntityClass::Aborted(AbortReason::RateLimited));
        summary.inserted = 7;

        let counts = summary.counts();
        assert_eq!(counts.ok, 1);
        assert_eq!(counts.empty, 1);
        assert_eq!(counts.aborted, 1);
        assert_eq!(counts.records_inserted, 7);
    }
}
