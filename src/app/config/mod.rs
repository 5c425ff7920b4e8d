mod cli;
mod file;
pub mod node_info;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cli::{Config, DEFAULT_SERVICE_URL};
pub use file::FileConfig;
pub use node_info::DiscoveryError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("node-home is required (flag --node-home, env WALSHIP_NODE_HOME, or config file)")]
    MissingNodeHome,
    #[error("invalid service url {url:?}: {source}")]
    InvalidServiceUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("{0} must be positive")]
    NonPositiveInterval(&'static str),
    #[error("config file error: {0}")]
    File(#[from] std::io::Error),
    #[error("config file parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("node identity discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
