use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tidemark_common::error::{TidemarkError, TidemarkResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub log_level: String,
    pub run_folder: PathBuf,
    /// One entity name per line.
    pub entity_list: PathBuf,
    pub status_file: PathBuf,
    pub schedule: ScheduleConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub repeat: bool,
    pub interval_hours: u64,
    pub refresh_entities: bool,
    pub harvest_following: bool,
    /// Rebuild store indexes after this many entities.
    pub maintenance_every: usize,
}

/// Settings for the storage daemon the harvester starts and stops.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub manage: bool,
    pub executable: PathBuf,
    pub process_name: String,
    pub data_dir: PathBuf,
    pub log_path: PathBuf,
    pub stop_polls: u32,
    pub extra_args: Vec<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> TidemarkResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let run_folder = PathBuf::from(get_var_or("TIDEMARK_RUN_FOLDER", "."));

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            log_level: get_var_or("LOG_LEVEL", "info"),
            entity_list: get_path_or("TIDEMARK_ENTITY_LIST", &run_folder, "user_list"),
            status_file: get_path_or("TIDEMARK_STATUS_FILE", &run_folder, "STATUS"),
            schedule: ScheduleConfig {
                repeat: get_bool_or("TIDEMARK_REPEAT", false)?,
                interval_hours: get_parsed_or("TIDEMARK_INTERVAL_HOURS", 72)?,
                refresh_entities: get_bool_or("TIDEMARK_REFRESH_ENTITIES", false)?,
                harvest_following: get_bool_or("TIDEMARK_HARVEST_FOLLOWING", false)?,
                maintenance_every: get_parsed_or("TIDEMARK_MAINTENANCE_EVERY", 100)?,
            },
            daemon: DaemonConfig {
                manage: get_bool_or("DAEMON_MANAGE", true)?,
                executable: PathBuf::from(get_var_or("DAEMON_EXECUTABLE", "postgres")),
                process_name: get_var_or("DAEMON_PROCESS_NAME", "postgres"),
                data_dir: get_path_or("DAEMON_DATA_DIR", &run_folder, "db"),
                log_path: get_path_or("DAEMON_LOG_PATH", &run_folder, "db_logs/daemon.log"),
                stop_polls: get_parsed_or("DAEMON_STOP_POLLS", 60)?,
                extra_args: get_var_or("DAEMON_EXTRA_ARGS", "")
                    .split_whitespace()
                    .map(str::to_owned)
                    .collect(),
            },
            run_folder,
        })
    }

    /// Sibling file of the entity list, e.g. `user_list.empty`.
    pub fn artifact_path(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .entity_list
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "user_list".into());
        name.push(".");
        name.push(suffix);
        self.entity_list.with_file_name(name)
    }
}

fn get_var(key: &str) -> TidemarkResult<String> {
    env::var(key).map_err(|_| TidemarkError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn get_path_or(key: &str, run_folder: &Path, relative: &str) -> PathBuf {
    env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| run_folder.join(relative))
}

fn get_parsed_or<T>(key: &str, default: T) -> TidemarkResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| TidemarkError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn get_bool_or(key: &str, default: bool) -> TidemarkResult<bool> {
    match env::var(key) {
        Ok(raw) => parse_bool(&raw)
            .ok_or_else(|| TidemarkError::Config(format!("invalid {key}: expected a boolean, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const OPTIONAL_VARS: &[&str] = &[
        "TIDEMARK_RUN_FOLDER",
        "TIDEMARK_ENTITY_LIST",
        "TIDEMARK_STATUS_FILE",
        "TIDEMARK_REPEAT",
        "TIDEMARK_INTERVAL_HOURS",
        "TIDEMARK_REFRESH_ENTITIES",
        "TIDEMARK_HARVEST_FOLLOWING",
        "TIDEMARK_MAINTENANCE_EVERY",
        "DAEMON_MANAGE",
        "DAEMON_DATA_DIR",
        "DAEMON_EXTRA_ARGS",
    ];

    fn clear_optional() {
        for key in OPTIONAL_VARS {
            env::remove_var(key);
        }
    }

    #[test]
    fn config_from_env_succeeds_with_required_vars() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_optional();
        env::set_var("DATABASE_URL", "postgres://localhost/tidemark_test");

        let cfg = AppConfig::from_env().expect("should parse config");
        assert_eq!(cfg.database_url, "postgres://localhost/tidemark_test");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.entity_list, PathBuf::from("./user_list"));
        assert_eq!(cfg.daemon.data_dir, PathBuf::from("./db"));
        assert_eq!(cfg.daemon.stop_polls, 60);
        assert_eq!(cfg.schedule.interval_hours, 72);
        assert!(!cfg.schedule.repeat);
        assert!(cfg.daemon.manage);

        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn config_from_env_fails_without_database_url() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::remove_var("DATABASE_URL");
        let result = AppConfig::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn run_folder_anchors_relative_defaults() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_optional();
        env::set_var("DATABASE_URL", "postgres://localhost/tidemark_test");
        env::set_var("TIDEMARK_RUN_FOLDER", "/srv/harvest");
        env::set_var("TIDEMARK_REPEAT", "yes");
        env::set_var("DAEMON_EXTRA_ARGS", "-p 5433  -k /tmp");

        let cfg = AppConfig::from_env().expect("should parse config");
        assert_eq!(cfg.status_file, PathBuf::from("/srv/harvest/STATUS"));
        assert_eq!(
            cfg.daemon.log_path,
            PathBuf::from("/srv/harvest/db_logs/daemon.log")
        );
        assert!(cfg.schedule.repeat);
        assert_eq!(cfg.daemon.extra_args, vec!["-p", "5433", "-k", "/tmp"]);

        clear_optional();
        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn invalid_bool_is_a_config_error() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_optional();
        env::set_var("DATABASE_URL", "postgres://localhost/tidemark_test");
        env::set_var("TIDEMARK_REPEAT", "sometimes");

        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("TIDEMARK_REPEAT"), "got: {err}");

        clear_optional();
        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn artifact_path_appends_suffix_to_list_name() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_optional();
        env::set_var("DATABASE_URL", "postgres://localhost/tidemark_test");
        env::set_var("TIDEMARK_ENTITY_LIST", "/data/accounts.txt");

        let cfg = AppConfig::from_env().expect("should parse config");
        assert_eq!(
            cfg.artifact_path("not_found"),
            PathBuf::from("/data/accounts.txt.not_found")
        );

        clear_optional();
        env::remove_var("DATABASE_URL");
    }
}
