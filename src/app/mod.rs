pub mod config;
pub mod logging;
pub mod service;
pub mod watcher;

pub use config::{Config, ConfigError, LogLevel};
pub use service::{Plugin, PluginContext, Walship, WalshipError};
pub use watcher::ConfigWatcher;

use std::process;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use crate::lifecycle::LifecycleState;

/// CLI application wrapper around the [`Walship`] host.
pub struct App {
    walship: Walship,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, Box<dyn std::error::Error + Send + Sync>>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::from_args(args)?;
        logging::init(config.log_level);

        config.resolve_identity()?;
        info!(
            version = env!("CARGO_PKG_VERSION"),
            wal_dir = %config.wal_dir().display(),
            state_dir = %config.state_dir().display(),
            service_url = %config.service_url,
            chain_id = config.chain_id.as_deref().unwrap_or_default(),
            node_id = config.node_id.as_deref().unwrap_or_default(),
            "starting walship"
        );

        let walship = Walship::new(config)?.with_plugin(Box::new(ConfigWatcher::new()));
        Ok(Self { walship })
    }

    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.walship.start().await?;
        let subscriber = self.walship.subscribe();

        info!("walship is running; press Ctrl+C to stop");

        tokio::select! {
            state = wait_terminal(subscriber) => match state {
                LifecycleState::Stopped => {
                    info!("walship finished");
                    Ok(())
                }
                state => Err(format!("walship ended in state {state}").into()),
            },
            _ = shutdown_signal() => {
                info!("shutdown signal received");
                self.walship.stop().await?;
                info!("walship stopped");
                Ok(())
            }
        }
    }

    pub fn status(&self) -> LifecycleState {
        self.walship.status()
    }
}

/// Resolves once the host reaches a terminal state (one-shot completion
/// or a crash).
async fn wait_terminal(mut subscriber: watch::Receiver<LifecycleState>) -> LifecycleState {
    loop {
        let state = *subscriber.borrow_and_update();
        if matches!(state, LifecycleState::Stopped | LifecycleState::Crashed) {
            return state;
        }
        if subscriber.changed().await.is_err() {
            return *subscriber.borrow();
        }
    }
}

/// Completes on SIGINT, or additionally SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal as unix_signal};

        let mut sigterm = match unix_signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("received SIGINT");
    }
}

/// Main entry point for the binary. Exit codes: 0 for a clean stop or
/// one-shot completion, 2 for configuration or discovery errors, 1 for
/// runtime failures including shutdown timeouts.
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = std::env::args().collect();

    match App::from_args(args) {
        Ok(app) => {
            if let Err(err) = app.run().await {
                error!("{err}");
                process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("walship: {err}");
            process::exit(2);
        }
    }

    Ok(())
}
