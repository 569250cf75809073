use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tidemark_config::ScheduleConfig;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::HarvestError;
use crate::lifecycle::daemon::DaemonManager;
use crate::lifecycle::process::ProcessTable;
use crate::pass::HarvestCycle;
use crate::status::StatusFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub repeat: bool,
    pub interval: Duration,
}

impl ScheduleOptions {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            repeat: config.repeat,
            interval: Duration::from_secs(config.interval_hours.saturating_mul(3600)),
        }
    }
}

/// Owns the daemon for the life of the process and repeats harvest cycles.
pub struct Scheduler<P> {
    daemon: DaemonManager<P>,
    status: StatusFile,
    options: ScheduleOptions,
}

impl<P: ProcessTable> Scheduler<P> {
    pub fn new(daemon: DaemonManager<P>, status: StatusFile, options: ScheduleOptions) -> Self {
        Self {
            daemon,
            status,
            options,
        }
    }

    /// Start the daemon, build the cycle with `build`, and run it once or on
    /// the interval. `trigger` starts the next run early; `cancel` stops
    /// after the current entity. The daemon is stopped on every exit path
    /// except a startup conflict, where it belongs to someone else.
    pub async fn run<C, F, Fut>(
        &self,
        build: F,
        cancel: CancellationToken,
        trigger: Arc<Notify>,
    ) -> Result<(), HarvestError>
    where
        C: HarvestCycle,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, HarvestError>>,
    {
        self.daemon.ensure_running().await?;

        let result = self.run_cycles(build, &cancel, &trigger).await;
        if let Err(e) = &result {
            if let Err(io) = self.status.failed(Utc::now(), &e.to_string()).await {
                tracing::warn!(error = %io, "failed to write status file");
            }
        }

        if let Err(e) = self.daemon.stop().await {
            tracing::warn!(error = %e, "daemon may still be running");
        }
        result
    }

    async fn run_cycles<C, F, Fut>(
        &self,
        build: F,
        cancel: &CancellationToken,
        trigger: &Notify,
    ) -> Result<(), HarvestError>
    where
        C: HarvestCycle,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, HarvestError>>,
    {
        let cycle = build().await?;

        loop {
            let started = Utc::now();
            let records = cycle.record_count().await.unwrap_or_default();
            self.write_status(self.status.running(started, records).await);

            let summary = cycle.run(cancel).await?;

            if summary.interrupted || cancel.is_cancelled() {
                tracing::warn!("harvest interrupted");
                self.write_status(self.status.interrupted(Utc::now()).await);
                return Ok(());
            }

            let finished = Utc::now();
            let next = if self.options.repeat {
                chrono::Duration::from_std(self.options.interval)
                    .ok()
                    .map(|d| finished + d)
            } else {
                None
            };
            let records = cycle.record_count().await.unwrap_or_default();
            self.write_status(self.status.idle(finished, next, records).await);

            if !self.options.repeat {
                return Ok(());
            }

            tracing::info!(
                interval_secs = self.options.interval.as_secs(),
                "harvest complete, sleeping until next run"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.options.interval) => {}
                _ = trigger.notified() => tracing::info!("run triggered externally"),
                _ = cancel.cancelled() => {
                    tracing::info!("stop requested while idle");
                    self.write_status(self.status.idle(finished, None, records).await);
                    return Ok(());
                }
            }
        }
    }

    fn write_status(&self, result: std::io::Result<()>) {
        if let Err(e) = result {
            tracing::warn!(
                path = %self.status.path().display(),
                error = %e,
                "failed to write status file"
            );
        }
    }
}
