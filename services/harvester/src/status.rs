//! Human-readable run artifacts: the status file and per-class entity lists.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

const TIMESTAMP: &str = "%H:%M:%S_%d-%m-%Y";

fn stamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP).to_string()
}

#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn running(&self, started: DateTime<Utc>, records: u64) -> io::Result<()> {
        self.write(&format!(
            "Harvester is currently running.\n\
             Run started: {}\n\
             Records in store at start: {records}\n",
            stamp(started)
        ))
        .await
    }

    /// `next` is `None` when no further run is scheduled.
    pub async fn idle(
        &self,
        last_run: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
        records: u64,
    ) -> io::Result<()> {
        let next = next
            .map(stamp)
            .unwrap_or_else(|| "not scheduled".to_string());
        self.write(&format!(
            "Harvester is currently idle.\n\
             Last run finished: {}\n\
             Next run: {next}\n\
             Records in store: {records}\n",
            stamp(last_run)
        ))
        .await
    }

    pub async fn interrupted(&self, at: DateTime<Utc>) -> io::Result<()> {
        self.write(&format!(
            "Harvester was interrupted.\n\
             Stopped: {}\n",
            stamp(at)
        ))
        .await
    }

    pub async fn failed(&self, at: DateTime<Utc>, error: &str) -> io::Result<()> {
        self.write(&format!(
            "Harvester failed.\n\
             Stopped: {}\n\
             Error: {error}\n",
            stamp(at)
        ))
        .await
    }

    async fn write(&self, text: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, text).await
    }
}

/// Write one name per line to `path`; an empty list removes a stale file.
pub async fn write_entity_list(path: &Path, names: &[String]) -> io::Result<()> {
    if names.is_empty() {
        return match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        };
    }
    let mut text = names.join("\n");
    text.push('\n');
    tokio::fs::write(path, text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 7, h, 5, 9).unwrap()
    }

    #[test]
    fn timestamp_format() {
        assert_eq!(stamp(at(14)), "14:05:09_07-03-2026");
    }

    #[tokio::test]
    async fn status_transitions_overwrite_file() {
        let dir = tempfile::tempdir().unwrap();
        let status = StatusFile::new(dir.path().join("STATUS"));

        status.running(at(1), 10).await.unwrap();
        let text = std::fs::read_to_string(status.path()).unwrap();
        assert!(text.contains("currently running"));
        assert!(text.contains("01:05:09_07-03-2026"));

        status.idle(at(2), Some(at(3)), 25).await.unwrap();
        let text = std::fs::read_to_string(status.path()).unwrap();
        assert!(text.contains("currently idle"));
        assert!(text.contains("Next run: 03:05:09_07-03-2026"));
        assert!(text.contains("Records in store: 25"));
        assert!(!text.contains("running"));
    }

    #[tokio::test]
    async fn interrupted_is_distinct_from_idle() {
        let dir = tempfile::tempdir().unwrap();
        let status = StatusFile::new(dir.path().join("STATUS"));
        status.interrupted(at(4)).await.unwrap();
        let text = std::fs::read_to_string(status.path()).unwrap();
        assert!(text.contains("interrupted"));
        assert!(!text.contains("idle"));
    }

    #[tokio::test]
    async fn idle_without_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let status = StatusFile::new(dir.path().join("STATUS"));
        status.idle(at(2), None, 0).await.unwrap();
        let text = std::fs::read_to_string(status.path()).unwrap();
        assert!(text.contains("Next run: not scheduled"));
    }

    #[tokio::test]
    async fn entity_list_written_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_list.private");

        write_entity_list(&path, &["a".into(), "b".into()]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");

        write_entity_list(&path, &[]).await.unwrap();
        assert!(!path.exists());

        // clearing an absent file is fine
        write_entity_list(&path, &[]).await.unwrap();
    }
}
