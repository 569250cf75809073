use std::time::Duration;

use tidemark_config::DaemonConfig;

use super::process::{ProcessState, ProcessTable};
use super::LifecycleError;

/// Written by `initdb`; absent in an empty or foreign data directory.
const CLUSTER_MARKER: &str = "PG_VERSION";

/// Starts and stops the storage daemon the harvester writes to.
pub struct DaemonManager<P> {
    table: P,
    config: DaemonConfig,
    poll_interval: Duration,
}

impl<P: ProcessTable> DaemonManager<P> {
    pub fn new(table: P, config: DaemonConfig) -> Self {
        Self {
            table,
            config,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[cfg(test)]
    pub fn table(&self) -> &P {
        &self.table
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-D".to_string(),
            self.config.data_dir.display().to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    /// Start the daemon unless it is unmanaged. A live instance is a
    /// conflict; a zombie entry is ignored. Returns the new pid.
    pub async fn ensure_running(&self) -> Result<Option<u32>, LifecycleError> {
        if !self.config.manage {
            tracing::debug!("daemon not managed, assuming store is reachable");
            return Ok(None);
        }

        let name = &self.config.process_name;
        match self.table.state(name) {
            ProcessState::Running(pid) => {
                return Err(LifecycleError::Conflict {
                    name: name.clone(),
                    pid,
                });
            }
            ProcessState::Zombie(pid) => {
                tracing::warn!(process = %name, pid, "stale zombie entry, starting a fresh daemon");
            }
            ProcessState::Absent => {}
        }

        let marker = self.config.data_dir.join(CLUSTER_MARKER);
        if !tokio::fs::try_exists(&marker).await? {
            return Err(LifecycleError::Uninitialized {
                data_dir: self.config.data_dir.clone(),
                marker: CLUSTER_MARKER,
            });
        }

        let pid = self.table.spawn(
            &self.config.executable,
            &self.args(),
            &self.config.log_path,
        )?;
        tracing::info!(
            process = %name,
            pid,
            data_dir = %self.config.data_dir.display(),
            log = %self.config.log_path.display(),
            "daemon started"
        );
        Ok(Some(pid))
    }

    /// Ask the daemon to shut down and wait for it to go. Never force-kills:
    /// on timeout the daemon may still be running.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        if !self.config.manage {
            return Ok(());
        }

        let name = &self.config.process_name;
        let signalled = self.table.send_terminate(name);
        if signalled == 0 {
            tracing::info!(process = %name, "daemon not running, nothing to stop");
            return Ok(());
        }
        tracing::info!(process = %name, signalled, "waiting for daemon to shut down");

        for poll in 1..=self.config.stop_polls {
            tokio::time::sleep(self.poll_interval).await;
            if !matches!(self.table.state(name), ProcessState::Running(_)) {
                tracing::info!(process = %name, polls = poll, "daemon stopped");
                return Ok(());
            }
        }

        Err(LifecycleError::Timeout {
            name: name.clone(),
            polls: self.config.stop_polls,
        })
    }
}
