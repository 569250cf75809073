//! Drives one entity's page sequence from first request to exhaustion.

use std::fmt;

use tidemark_common::error::TidemarkError;
use tidemark_db::record::models::InsertOutcome;
use tokio_util::sync::CancellationToken;

use crate::api::client::{ApiClient, ClientError, Fetched};
use crate::api::endpoints::{Endpoint, Position};
use crate::cursor::LowWaterMark;
use crate::sink::PageSink;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkTally {
    pub pages: u32,
    pub fetched: u64,
    pub inserted: u64,
    pub duplicates: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    AuthFailure(String),
    RateLimited,
    ServerUnavailable,
    Private,
    NotFound,
    Malformed(String),
    Store { unavailable: bool, message: String },
    Interrupted,
}

impl AbortReason {
    /// Reasons that end the whole run rather than this entity.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthFailure(_) | Self::Store { unavailable: true, .. }
        )
    }

    fn from_store(e: TidemarkError) -> Self {
        match e {
            TidemarkError::Validation(msg) => Self::Malformed(msg),
            other => Self::Store {
                unavailable: other.is_store_unavailable(),
                message: other.to_string(),
            },
        }
    }
}

impl From<ClientError> for AbortReason {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::AuthFailure(body) => Self::AuthFailure(body),
            ClientError::RateLimited { .. } => Self::RateLimited,
            ClientError::ServerUnavailable { .. } => Self::ServerUnavailable,
            ClientError::Private(_) => Self::Private,
            ClientError::NotFound(_) => Self::NotFound,
            ClientError::Malformed(msg) | ClientError::Problem(msg) => Self::Malformed(msg),
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthFailure(_) => f.write_str("auth failure"),
            Self::RateLimited => f.write_str("rate limited"),
            Self::ServerUnavailable => f.write_str("server unavailable"),
            Self::Private => f.write_str("private"),
            Self::NotFound => f.write_str("not found"),
            Self::Malformed(msg) => write!(f, "malformed response: {msg}"),
            Self::Store { message, .. } => write!(f, "store error: {message}"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkOutcome {
    Drained(WalkTally),
    Aborted { reason: AbortReason, tally: WalkTally },
}

impl WalkOutcome {
    pub fn tally(&self) -> WalkTally {
        match self {
            Self::Drained(tally) | Self::Aborted { tally, .. } => *tally,
        }
    }
}

pub struct Walker<'a, E, S> {
    client: &'a ApiClient,
    endpoint: &'a E,
    sink: &'a S,
}

impl<'a, E, S> Walker<'a, E, S>
where
    E: Endpoint,
    S: PageSink<Item = E::Item>,
{
    pub fn new(client: &'a ApiClient, endpoint: &'a E, sink: &'a S) -> Self {
        Self {
            client,
            endpoint,
            sink,
        }
    }

    /// Walk `owner_id`'s listing newer than `low_water_mark`.
    ///
    /// The mark is applied to the first request only; later requests carry
    /// the continuation token instead. An interrupt abandons any request in
    /// flight.
    pub async fn walk(
        &self,
        owner_id: &str,
        low_water_mark: LowWaterMark,
        cancel: &CancellationToken,
    ) -> WalkOutcome {
        let mut tally = WalkTally::default();
        let mut token: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return aborted(AbortReason::Interrupted, tally);
            }

            let position = match token.as_deref() {
                Some(t) => Position::After(t),
                None => Position::Start(low_water_mark),
            };
            let request = self.endpoint.request(owner_id, position);

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return aborted(AbortReason::Interrupted, tally),
                result = self.client.fetch::<E::Item>(&request) => result,
            };

            let page = match fetched {
                Ok(Fetched::Page(page)) => page,
                Ok(Fetched::Empty) => return WalkOutcome::Drained(tally),
                Err(e) => {
                    tracing::warn!(
                        endpoint = self.endpoint.name(),
                        owner = owner_id,
                        error = %e,
                        "walk aborted"
                    );
                    return aborted(e.into(), tally);
                }
            };

            tally.pages += 1;
            for item in &page.items {
                tally.fetched += 1;
                match self.sink.insert(owner_id, item).await {
                    Ok(InsertOutcome::Inserted) => tally.inserted += 1,
                    Ok(InsertOutcome::AlreadyExists) => tally.duplicates += 1,
                    Err(e) => {
                        tracing::warn!(
                            endpoint = self.endpoint.name(),
                            owner = owner_id,
                            error = %e,
                            "sink failed, aborting walk"
                        );
                        return aborted(AbortReason::from_store(e), tally);
                    }
                }
            }

            if !page.problems.is_empty() {
                tracing::debug!(
                    owner = owner_id,
                    problems = ?page.problems,
                    "page carried partial errors"
                );
            }
            tracing::debug!(
                endpoint = self.endpoint.name(),
                owner = owner_id,
                page = tally.pages,
                items = page.items.len(),
                result_count = page.result_count,
                more = page.next_token.is_some(),
                "page stored"
            );

            match page.next_token {
                Some(next) => token = Some(next),
                None => return WalkOutcome::Drained(tally),
            }
        }
    }
}

fn aborted(reason: AbortReason, tally: WalkTally) -> WalkOutcome {
    WalkOutcome::Aborted { reason, tally }
}
