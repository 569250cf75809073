use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

use sysinfo::{ProcessStatus, ProcessesToUpdate, Signal, System};

use super::LifecycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Absent,
    Running(u32),
    /// Exited but not yet reaped; holds no resources.
    Zombie(u32),
}

/// The slice of the OS process table the daemon manager needs.
pub trait ProcessTable: Send + Sync {
    fn state(&self, name: &str) -> ProcessState;

    /// Start `executable` detached from this process group, with stdout and
    /// stderr appended to `log_path`.
    fn spawn(&self, executable: &Path, args: &[String], log_path: &Path)
        -> Result<u32, LifecycleError>;

    /// Ask every process named `name` to terminate. Returns how many were signalled.
    fn send_terminate(&self, name: &str) -> usize;
}

#[derive(Debug, Default)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    fn snapshot() -> System {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
    }
}

impl ProcessTable for SystemProcessTable {
    fn state(&self, name: &str) -> ProcessState {
        let system = Self::snapshot();
        let mut state = ProcessState::Absent;
        for process in system.processes_by_exact_name(OsStr::new(name)) {
            let pid = process.pid().as_u32();
            if process.status() == ProcessStatus::Zombie {
                state = ProcessState::Zombie(pid);
            } else {
                return ProcessState::Running(pid);
            }
        }
        state
    }

    fn spawn(
        &self,
        executable: &Path,
        args: &[String],
        log_path: &Path,
    ) -> Result<u32, LifecycleError> {
        if let Some(dir) = log_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let log = OpenOptions::new().create(true).append(true).open(log_path)?;
        let err_log = log.try_clone()?;

        let child = Command::new(executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(err_log)
            .process_group(0)
            .spawn()
            .map_err(|source| LifecycleError::Spawn {
                executable: executable.to_path_buf(),
                source,
            })?;

        Ok(child.id())
    }

    fn send_terminate(&self, name: &str) -> usize {
        let system = Self::snapshot();
        system
            .processes_by_exact_name(OsStr::new(name))
            .filter(|p| p.status() != ProcessStatus::Zombie)
            .filter(|p| p.kill_with(Signal::Term).unwrap_or(false))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_process_is_absent() {
        let table = SystemProcessTable;
        assert_eq!(
            table.state("tidemark-no-such-process-name"),
            ProcessState::Absent
        );
        assert_eq!(table.send_terminate("tidemark-no-such-process-name"), 0);
    }

    #[test]
    fn spawn_writes_to_log_path() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs/daemon.log");
        let pid = SystemProcessTable
            .spawn(Path::new("echo"), &["hello".to_string()], &log)
            .unwrap();
        assert!(pid > 0);

        // echo exits at once; give it a moment to flush
        for _ in 0..50 {
            if std::fs::read_to_string(&log).unwrap_or_default().contains("hello") {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        panic!("daemon log never received output");
    }

    #[test]
    fn spawn_missing_executable_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SystemProcessTable
            .spawn(
                Path::new("/nonexistent/tidemark-daemon"),
                &[],
                &dir.path().join("d.log"),
            )
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Spawn { .. }));
    }
}
