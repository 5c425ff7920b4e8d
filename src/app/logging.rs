use tracing_subscriber::EnvFilter;

use super::config::LogLevel;

/// Initializes the global tracing subscriber. `RUST_LOG` overrides the
/// configured level; HTTP internals default to `warn` either way.
/// Safe to call more than once (later calls are no-ops).
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "walship={},hyper=warn,reqwest=warn",
            level.as_str()
        ))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
}
