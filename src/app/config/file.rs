use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{Config, ConfigError, LogLevel};

/// TOML form of [`Config`]: every field optional, snake_case keys
/// matching the CLI flag names.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub node_home: Option<PathBuf>,
    pub wal_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub service_url: Option<String>,
    pub auth_key: Option<String>,
    pub chain_id: Option<String>,
    pub node_id: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub send_interval_secs: Option<u64>,
    pub hard_interval_secs: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub max_batch_bytes: Option<usize>,
    pub cpu_threshold: Option<f64>,
    pub net_threshold: Option<f64>,
    pub once: Option<bool>,
    pub verify: Option<bool>,
    pub meta: Option<bool>,
    pub log_level: Option<LogLevel>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// `~/.walship/config.toml`, when a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".walship").join("config.toml"))
    }

    /// Applies file values underneath flags and environment: a field is
    /// taken from the file only while the target still holds its
    /// built-in default.
    pub fn apply(&self, config: &mut Config) {
        let defaults = Config::default();

        merge_opt(&mut config.node_home, &self.node_home);
        merge_opt(&mut config.wal_dir, &self.wal_dir);
        merge_opt(&mut config.state_dir, &self.state_dir);
        merge_opt(&mut config.chain_id, &self.chain_id);
        merge_opt(&mut config.node_id, &self.node_id);

        merge_eq(&mut config.service_url, &self.service_url, &defaults.service_url);
        merge_eq(&mut config.auth_key, &self.auth_key, &defaults.auth_key);
        merge_eq(
            &mut config.poll_interval_ms,
            &self.poll_interval_ms,
            &defaults.poll_interval_ms,
        );
        merge_eq(
            &mut config.send_interval_secs,
            &self.send_interval_secs,
            &defaults.send_interval_secs,
        );
        merge_eq(
            &mut config.hard_interval_secs,
            &self.hard_interval_secs,
            &defaults.hard_interval_secs,
        );
        merge_eq(
            &mut config.http_timeout_secs,
            &self.http_timeout_secs,
            &defaults.http_timeout_secs,
        );
        merge_eq(
            &mut config.max_batch_bytes,
            &self.max_batch_bytes,
            &defaults.max_batch_bytes,
        );
        merge_eq(
            &mut config.cpu_threshold,
            &self.cpu_threshold,
            &defaults.cpu_threshold,
        );
        merge_eq(
            &mut config.net_threshold,
            &self.net_threshold,
            &defaults.net_threshold,
        );
        merge_eq(&mut config.once, &self.once, &defaults.once);
        merge_eq(&mut config.verify, &self.verify, &defaults.verify);
        merge_eq(&mut config.meta, &self.meta, &defaults.meta);
        merge_eq(&mut config.log_level, &self.log_level, &defaults.log_level);
    }
}

fn merge_opt<T: Clone>(target: &mut Option<T>, file: &Option<T>) {
    if target.is_none()
        && let Some(value) = file
    {
        *target = Some(value.clone());
    }
}

fn merge_eq<T: Clone + PartialEq>(target: &mut T, file: &Option<T>, default: &T) {
    if target == default
        && let Some(value) = file
    {
        *target = value.clone();
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        std::env::var_os("HOME").map(PathBuf::from)
    }
    #[cfg(not(unix))]
    {
        std::env::var_os("USERPROFILE").map(PathBuf::from)
    }
}
