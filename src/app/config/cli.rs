use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use super::node_info;
use super::{ConfigError, FileConfig, LogLevel};

pub const DEFAULT_SERVICE_URL: &str = "https://api.apphash.io";

/// Agent configuration. Priority: flags > `WALSHIP_*` environment >
/// config file (`--config-file` or `~/.walship/config.toml`) > defaults.
#[derive(Parser, Debug, Clone)]
#[command(name = "walship", author, version, about = "Ships WAL frames from a node to a remote ingestion service", long_about = None)]
pub struct Config {
    /// Node root; locates config/genesis.json, config/node_key.json and
    /// the default WAL directory
    #[arg(long, env = "WALSHIP_NODE_HOME")]
    pub node_home: Option<PathBuf>,

    /// WAL root holding segment blobs and index sidecars
    /// (default: <node_home>/data/log.wal/node-<node_id>)
    #[arg(long, env = "WALSHIP_WAL_DIR")]
    pub wal_dir: Option<PathBuf>,

    /// Directory for status.json (default: the WAL directory)
    #[arg(long, env = "WALSHIP_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Ingestion service base URL
    #[arg(long, env = "WALSHIP_SERVICE_URL", default_value = DEFAULT_SERVICE_URL)]
    pub service_url: String,

    /// Bearer token for the ingestion service
    #[arg(long, env = "WALSHIP_AUTH_KEY", hide_env_values = true, default_value = "")]
    pub auth_key: String,

    /// Chain id (auto-discovered from genesis.json when omitted)
    #[arg(long, env = "WALSHIP_CHAIN_ID")]
    pub chain_id: Option<String>,

    /// Node id (auto-derived from node_key.json when omitted)
    #[arg(long, env = "WALSHIP_NODE_ID")]
    pub node_id: Option<String>,

    /// Idle tail interval in milliseconds
    #[arg(long, env = "WALSHIP_POLL_INTERVAL_MS", default_value = "500")]
    pub poll_interval_ms: u64,

    /// Soft flush deadline in seconds
    #[arg(long, env = "WALSHIP_SEND_INTERVAL_SECS", default_value = "5")]
    pub send_interval_secs: u64,

    /// Forced flush deadline in seconds; overrides resource gating
    #[arg(long, env = "WALSHIP_HARD_INTERVAL_SECS", default_value = "10")]
    pub hard_interval_secs: u64,

    /// Per-request HTTP ceiling in seconds
    #[arg(long, env = "WALSHIP_HTTP_TIMEOUT_SECS", default_value = "15")]
    pub http_timeout_secs: u64,

    /// Batch size cap in bytes (sum of compressed frame lengths)
    #[arg(long, env = "WALSHIP_MAX_BATCH_BYTES", default_value = "4194304")]
    pub max_batch_bytes: usize,

    /// CPU usage fraction above which sending is deferred
    #[arg(long, env = "WALSHIP_CPU_THRESHOLD", default_value = "0.85")]
    pub cpu_threshold: f64,

    /// Network usage fraction above which sending is deferred
    #[arg(long, env = "WALSHIP_NET_THRESHOLD", default_value = "0.70")]
    pub net_threshold: f64,

    /// One-shot mode: exit at the first end of data
    #[arg(long, env = "WALSHIP_ONCE")]
    pub once: bool,

    /// Debug: gzip-verify each frame (observational)
    #[arg(long, env = "WALSHIP_VERIFY")]
    pub verify: bool,

    /// Debug: log frame metadata
    #[arg(long, env = "WALSHIP_META")]
    pub meta: bool,

    /// Log level
    #[arg(long, env = "WALSHIP_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Configuration file path (default: ~/.walship/config.toml)
    #[arg(long, env = "WALSHIP_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[arg(skip)]
    pub poll_interval: Duration,

    #[arg(skip)]
    pub send_interval: Duration,

    #[arg(skip)]
    pub hard_interval: Duration,

    #[arg(skip)]
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_home: None,
            wal_dir: None,
            state_dir: None,
            service_url: DEFAULT_SERVICE_URL.to_string(),
            auth_key: String::new(),
            chain_id: None,
            node_id: None,
            poll_interval_ms: 500,
            send_interval_secs: 5,
            hard_interval_secs: 10,
            http_timeout_secs: 15,
            max_batch_bytes: 4 << 20,
            cpu_threshold: 0.85,
            net_threshold: 0.70,
            once: false,
            verify: false,
            meta: false,
            log_level: LogLevel::Info,
            config_file: None,
            poll_interval: Duration::from_millis(500),
            send_interval: Duration::from_secs(5),
            hard_interval: Duration::from_secs(10),
            http_timeout: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Parses flags and environment, layers the config file underneath,
    /// and finalizes derived values. Node identity is resolved later by
    /// [`Config::resolve_identity`] so tests and embedders can skip it.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        config.layer_file()?;
        config.post_process();
        config.validate()?;
        Ok(config)
    }

    /// Merges the config file (explicit `--config-file`, or the default
    /// `~/.walship/config.toml` when present) under flag/env values: a
    /// file value applies only where the current value is still the
    /// built-in default.
    pub fn layer_file(&mut self) -> Result<(), ConfigError> {
        let path = match &self.config_file {
            Some(path) => path.clone(),
            None => match FileConfig::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(()),
            },
        };

        let file = FileConfig::load(&path)?;
        file.apply(self);
        Ok(())
    }

    /// Converts the numeric duration fields into [`Duration`]s.
    pub fn post_process(&mut self) {
        self.poll_interval = Duration::from_millis(self.poll_interval_ms);
        self.send_interval = Duration::from_secs(self.send_interval_secs);
        self.hard_interval = Duration::from_secs(self.hard_interval_secs);
        self.http_timeout = Duration::from_secs(self.http_timeout_secs);
    }

    /// Checks required options, normalizes the service URL, and derives
    /// the WAL and state directories. Requires `node_id` to be resolved
    /// first when `wal_dir` is not set explicitly.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.node_home.is_none() && self.wal_dir.is_none() {
            return Err(ConfigError::MissingNodeHome);
        }

        if let Err(source) = Url::parse(&self.service_url) {
            return Err(ConfigError::InvalidServiceUrl {
                url: self.service_url.clone(),
                source,
            });
        }
        while self.service_url.ends_with('/') {
            self.service_url.pop();
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::NonPositiveInterval("poll-interval-ms"));
        }
        if self.send_interval_secs == 0 {
            return Err(ConfigError::NonPositiveInterval("send-interval-secs"));
        }
        if self.hard_interval_secs == 0 {
            return Err(ConfigError::NonPositiveInterval("hard-interval-secs"));
        }

        Ok(())
    }

    /// Fills `chain_id` and `node_id` from the node's own files when
    /// they were not configured, then derives the WAL and state
    /// directories. Discovery errors are startup-fatal.
    pub fn resolve_identity(&mut self) -> Result<(), ConfigError> {
        if self.chain_id.is_none() {
            let home = self.node_home.as_ref().ok_or(ConfigError::MissingNodeHome)?;
            self.chain_id = Some(node_info::chain_id(home)?);
        }
        if self.node_id.is_none() {
            let home = self.node_home.as_ref().ok_or(ConfigError::MissingNodeHome)?;
            self.node_id = Some(node_info::node_id(home)?);
        }

        if self.wal_dir.is_none() {
            let home = self.node_home.as_ref().ok_or(ConfigError::MissingNodeHome)?;
            let node_id = self.node_id.as_deref().unwrap_or("default");
            self.wal_dir = Some(home.join("data/log.wal").join(format!("node-{node_id}")));
        }
        if self.state_dir.is_none() {
            self.state_dir = self.wal_dir.clone();
        }

        Ok(())
    }

    /// The resolved WAL directory. Only meaningful after
    /// [`Config::resolve_identity`].
    pub fn wal_dir(&self) -> PathBuf {
        self.wal_dir.clone().unwrap_or_default()
    }

    /// The resolved state directory. Only meaningful after
    /// [`Config::resolve_identity`].
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .or_else(|| self.wal_dir.clone())
            .unwrap_or_default()
    }
}
