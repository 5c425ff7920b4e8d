//! The host facade: wires the pipeline components, drives the
//! lifecycle, and hosts optional plugins.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::Config;
use crate::agent::{Agent, AgentConfig, RunExit};
use crate::cleanup::{CleanupConfig, CleanupRunner};
use crate::events::EventHandler;
use crate::gate::{LoadGate, ResourceGate};
use crate::lifecycle::{Lifecycle, LifecycleError, LifecycleState, SHUTDOWN_TIMEOUT};
use crate::reader::IndexReader;
use crate::sender::{FrameSender, HttpFrameSender, Metadata, SendError};
use crate::state::StateStore;

pub type PluginError = Box<dyn std::error::Error + Send + Sync>;

/// Resolved settings handed to plugins at initialization.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub node_home: Option<PathBuf>,
    pub wal_dir: PathBuf,
    pub state_dir: PathBuf,
    pub service_url: String,
    pub chain_id: String,
    pub node_id: String,
    pub auth_key: String,
}

/// An optional collaborator started with the host. Initialization
/// failures are fatal to `start`; shutdown failures are logged only.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;
    async fn initialize(
        &mut self,
        ctx: &PluginContext,
        cancel: CancellationToken,
    ) -> Result<(), PluginError>;
    async fn shutdown(&mut self) -> Result<(), PluginError>;
}

#[derive(Error, Debug)]
pub enum WalshipError {
    #[error("walship is already running")]
    AlreadyRunning,
    #[error("walship is not running")]
    NotRunning,
    #[error("plugin {name} failed to initialize: {source}")]
    Plugin {
        name: &'static str,
        source: PluginError,
    },
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// A WAL shipping agent that can be embedded in other applications:
/// construct with [`Walship::new`], then [`Walship::start`] /
/// [`Walship::stop`]. [`Walship::status`] is safe from any task.
pub struct Walship<S: FrameSender + 'static = HttpFrameSender> {
    config: Config,
    metadata: Metadata,
    lifecycle: Arc<Lifecycle>,
    sender: Arc<S>,
    gate: Option<Arc<dyn ResourceGate>>,
    cleanup: Option<CleanupConfig>,
    plugins: Vec<Box<dyn Plugin>>,
    events: Option<Arc<dyn EventHandler>>,
}

impl Walship<HttpFrameSender> {
    /// Builds a host with the default HTTP sender, the in-process load
    /// gate, and cleanup at the default watermarks.
    pub fn new(config: Config) -> Result<Self, WalshipError> {
        let sender = HttpFrameSender::new(config.http_timeout)?;
        Ok(Self::with_sender(config, sender))
    }
}

impl<S: FrameSender + 'static> Walship<S> {
    /// Builds a host around a caller-provided sender implementation.
    pub fn with_sender(config: Config, sender: S) -> Self {
        let metadata = Metadata {
            chain_id: config.chain_id.clone().unwrap_or_default(),
            node_id: config.node_id.clone().unwrap_or_default(),
            hostname: hostname(),
            os_arch: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
            auth_key: config.auth_key.clone(),
            service_url: config.service_url.clone(),
        };
        let gate: Arc<dyn ResourceGate> = Arc::new(LoadGate::new(config.cpu_threshold));

        Self {
            config,
            metadata,
            lifecycle: Arc::new(Lifecycle::new(None)),
            sender: Arc::new(sender),
            gate: Some(gate),
            cleanup: Some(CleanupConfig::default()),
            plugins: Vec::new(),
            events: None,
        }
    }

    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = Some(events.clone());
        self.lifecycle = Arc::new(Lifecycle::new(Some(events)));
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn ResourceGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn without_gate(mut self) -> Self {
        self.gate = None;
        self
    }

    pub fn with_cleanup(mut self, config: CleanupConfig) -> Self {
        self.cleanup = Some(config);
        self
    }

    pub fn without_cleanup(mut self) -> Self {
        self.cleanup = None;
        self
    }

    pub fn with_plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Starts the shipping pipeline in the background. Plugins are
    /// initialized in registration order before any worker spawns; a
    /// plugin failure cancels the run and leaves the host `Crashed`.
    pub async fn start(&mut self) -> Result<(), WalshipError> {
        if !self.lifecycle.can_start() {
            return Err(WalshipError::AlreadyRunning);
        }
        self.lifecycle
            .transition_to(LifecycleState::Starting, "start requested")?;

        let cancel = CancellationToken::new();
        self.lifecycle.set_cancel(cancel.clone());

        let plugin_ctx = PluginContext {
            node_home: self.config.node_home.clone(),
            wal_dir: self.config.wal_dir(),
            state_dir: self.config.state_dir(),
            service_url: self.config.service_url.clone(),
            chain_id: self.metadata.chain_id.clone(),
            node_id: self.metadata.node_id.clone(),
            auth_key: self.config.auth_key.clone(),
        };
        for plugin in &mut self.plugins {
            let name = plugin.name();
            if let Err(source) = plugin.initialize(&plugin_ctx, cancel.clone()).await {
                error!(plugin = name, error = %source, "plugin initialization failed");
                cancel.cancel();
                let _ = self
                    .lifecycle
                    .transition_to(LifecycleState::Crashed, "plugin initialization failed");
                return Err(WalshipError::Plugin { name, source });
            }
            info!(plugin = name, "plugin initialized");
        }

        if let Some(cleanup_config) = self.cleanup.clone() {
            let runner = CleanupRunner::new(
                cleanup_config,
                self.config.wal_dir(),
                StateStore::new(self.config.state_dir()),
            );
            let cleanup_cancel = cancel.clone();
            self.lifecycle
                .register_worker(tokio::spawn(runner.run(cleanup_cancel)));
        }

        let agent = Agent::new(
            AgentConfig {
                poll_interval: self.config.poll_interval,
                send_interval: self.config.send_interval,
                hard_interval: self.config.hard_interval,
                max_batch_bytes: self.config.max_batch_bytes,
                once: self.config.once,
                verify: self.config.verify,
                meta: self.config.meta,
            },
            IndexReader::new(self.config.wal_dir()),
            StateStore::new(self.config.state_dir()),
            self.sender.clone(),
            self.gate.clone(),
            self.metadata.clone(),
            self.events.clone(),
        );

        let lifecycle = self.lifecycle.clone();
        let agent_cancel = cancel.clone();
        self.lifecycle.register_worker(tokio::spawn(async move {
            if let Err(err) = lifecycle.transition_to(LifecycleState::Running, "agent worker up") {
                // An early stop can already have moved us to Stopping.
                warn!(error = %err, "agent worker could not enter Running");
                return;
            }

            match agent.run(agent_cancel.clone()).await {
                Ok(RunExit::Cancelled) => {}
                Ok(RunExit::Completed) => {
                    agent_cancel.cancel();
                    let _ = lifecycle.transition_to(LifecycleState::Stopping, "end of data");
                    let _ = lifecycle.transition_to(LifecycleState::Stopped, "one-shot complete");
                }
                Err(err) => {
                    agent_cancel.cancel();
                    let _ = lifecycle.transition_to(LifecycleState::Crashed, &err.to_string());
                }
            }
        }));

        Ok(())
    }

    /// Stops the pipeline: cancels the shared token, joins workers with
    /// a 30 second ceiling, and shuts plugins down in reverse order.
    /// A join timeout leaves the host `Crashed` and is returned.
    pub async fn stop(&mut self) -> Result<(), WalshipError> {
        if !self.lifecycle.can_stop() {
            return Err(WalshipError::NotRunning);
        }
        self.lifecycle
            .transition_to(LifecycleState::Stopping, "stop requested")?;
        self.lifecycle.cancel();

        let join_result = self.lifecycle.join_with_timeout(SHUTDOWN_TIMEOUT).await;

        for plugin in self.plugins.iter_mut().rev() {
            match plugin.shutdown().await {
                Ok(()) => info!(plugin = plugin.name(), "plugin shut down"),
                Err(err) => {
                    error!(plugin = plugin.name(), error = %err, "plugin shutdown failed");
                }
            }
        }

        match join_result {
            Ok(()) => {
                let _ = self
                    .lifecycle
                    .transition_to(LifecycleState::Stopped, "graceful shutdown");
                Ok(())
            }
            Err(err) => {
                let _ = self
                    .lifecycle
                    .transition_to(LifecycleState::Crashed, "shutdown timeout");
                Err(err.into())
            }
        }
    }

    /// The current lifecycle state; safe to call concurrently.
    pub fn status(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Observes lifecycle transitions, e.g. to wait for a terminal
    /// state after a one-shot run.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
