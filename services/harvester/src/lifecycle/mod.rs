pub mod daemon;
pub mod process;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{name} is already running (pid {pid}); refusing to start a second instance")]
    Conflict { name: String, pid: u32 },

    #[error("{} is not an initialized cluster (no {marker}); run initdb first", .data_dir.display())]
    Uninitialized { data_dir: PathBuf, marker: &'static str },

    #[error("failed to start {}: {source}", .executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} still running after {polls} polls")]
    Timeout { name: String, polls: u32 },

    #[error("daemon I/O: {0}")]
    Io(#[from] std::io::Error),
}
