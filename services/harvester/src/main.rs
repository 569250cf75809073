mod api;
mod cursor;
mod error;
mod identity;
mod lifecycle;
mod orchestrator;
mod pass;
mod retry;
mod scheduler;
mod sink;
mod status;
mod walker;

use std::process::ExitCode;
use std::sync::Arc;

use tidemark_config::{init_tracing, AppConfig};
use tidemark_db::StoreHandle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::api::client::{ApiClient, ApiClientConfig};
use crate::error::HarvestError;
use crate::lifecycle::daemon::DaemonManager;
use crate::lifecycle::process::SystemProcessTable;
use crate::pass::{HarvestPass, PassOptions};
use crate::retry::{retry, RetryPolicy};
use crate::scheduler::{ScheduleOptions, Scheduler};
use crate::status::StatusFile;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing("info");

    tracing::info!(service = "tidemark-harvester", "starting");

    match run().await {
        Ok(()) => {
            tracing::info!("shutting down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "harvester stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), HarvestError> {
    let config = AppConfig::from_env()?;
    let api_config = ApiClientConfig::from_env().map_err(HarvestError::Config)?;
    tracing::info!(
        base_url = %api_config.base_url,
        page_size = api_config.timeline_page_size,
        repeat = config.schedule.repeat,
        interval_hours = config.schedule.interval_hours,
        following = config.schedule.harvest_following,
        "configuration loaded"
    );
    let client = ApiClient::new(api_config)
        .map_err(|e| HarvestError::Config(format!("failed to build HTTP client: {e}")))?;

    let cancel = CancellationToken::new();
    let trigger = Arc::new(Notify::new());
    listen_for_signals(cancel.clone(), trigger.clone())?;

    let scheduler = Scheduler::new(
        DaemonManager::new(SystemProcessTable, config.daemon.clone()),
        StatusFile::new(&config.status_file),
        ScheduleOptions::from_config(&config.schedule),
    );

    let options = PassOptions::from_config(&config);
    let database_url = config.database_url.clone();

    scheduler
        .run(
            || async move {
                let pool = retry("store connect", &RetryPolicy::startup(), || {
                    tidemark_db::create_pool(&database_url)
                })
                .await?;
                tidemark_db::schema::ensure_schema(&pool).await?;
                Ok::<_, HarvestError>(HarvestPass::new(
                    client,
                    StoreHandle::postgres(pool),
                    options,
                ))
            },
            cancel,
            trigger,
        )
        .await
}

/// SIGINT/SIGTERM cancel the run; SIGHUP starts the next run early.
fn listen_for_signals(cancel: CancellationToken, trigger: Arc<Notify>) -> Result<(), HarvestError> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        tracing::warn!("interrupt received, stopping after the current entity");
        cancel.cancel();
    });

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, triggering a run");
            trigger.notify_one();
        }
    });

    Ok(())
}
