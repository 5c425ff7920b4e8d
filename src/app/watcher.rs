//! Config watcher plugin: mirrors the node's `app.toml` and
//! `config.toml` to the ingestion service. Purely peripheral; it never
//! touches the shipping pipeline.

use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::service::{Plugin, PluginContext, PluginError};
use crate::sender::SendError;

const CONFIG_ENDPOINT: &str = "/v1/ingest/config";
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

const ERR_CODE_FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
const ERR_CODE_PERMISSION_DENIED: &str = "PERMISSION_DENIED";
const ERR_CODE_READ_ERROR: &str = "READ_ERROR";

/// Watches `<node_home>/config/{app.toml,config.toml}` by polling
/// modification times, and posts both files (debounced) to the
/// secondary ingest endpoint on start and on every change.
pub struct ConfigWatcher {
    poll_interval: Duration,
    debounce: Duration,
    http_timeout: Duration,
    handle: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            debounce: Duration::from_millis(100),
            http_timeout: Duration::from_secs(30),
            handle: None,
        }
    }

    /// Shorter intervals for tests.
    pub fn with_intervals(mut self, poll_interval: Duration, debounce: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.debounce = debounce;
        self
    }
}

impl Default for ConfigWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ConfigWatcher {
    fn name(&self) -> &'static str {
        "config-watcher"
    }

    async fn initialize(
        &mut self,
        ctx: &PluginContext,
        cancel: CancellationToken,
    ) -> Result<(), PluginError> {
        let Some(node_home) = &ctx.node_home else {
            info!("config watcher disabled: no node home configured");
            return Ok(());
        };

        let client = Client::builder().timeout(self.http_timeout).build()?;
        let task = WatcherTask {
            config_dir: node_home.join("config"),
            url: format!("{}{}", ctx.service_url, CONFIG_ENDPOINT),
            chain_id: ctx.chain_id.clone(),
            node_id: ctx.node_id.clone(),
            auth_key: ctx.auth_key.clone(),
            client,
            poll_interval: self.poll_interval,
            debounce: self.debounce,
        };
        self.handle = Some(tokio::spawn(task.run(cancel)));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

struct WatcherTask {
    config_dir: PathBuf,
    url: String,
    chain_id: String,
    node_id: String,
    auth_key: String,
    client: Client,
    poll_interval: Duration,
    debounce: Duration,
}

/// One observation of both watched files, captured before the first
/// send attempt so retries upload a consistent snapshot.
struct Snapshot {
    captured_at: String,
    app: io::Result<Vec<u8>>,
    comet: io::Result<Vec<u8>>,
}

impl WatcherTask {
    async fn run(self, cancel: CancellationToken) {
        // Initial upload establishes the baseline on the server.
        self.send_with_retry(&cancel).await;

        let mut last_seen = self.mtimes();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let current = self.mtimes();
            if current == last_seen {
                continue;
            }

            // Debounce: the node often rewrites both files back to back.
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.debounce) => {}
            }

            self.send_with_retry(&cancel).await;
            last_seen = self.mtimes();
        }
    }

    fn mtimes(&self) -> [Option<SystemTime>; 2] {
        let mtime = |name: &str| {
            std::fs::metadata(self.config_dir.join(name))
                .and_then(|meta| meta.modified())
                .ok()
        };
        [mtime("app.toml"), mtime("config.toml")]
    }

    /// Uploads one snapshot, retrying until success or cancellation.
    async fn send_with_retry(&self, cancel: &CancellationToken) {
        let snapshot = self.snapshot();
        let mut retries = 0u32;

        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.post(&snapshot).await {
                Ok(()) => {
                    if retries > 0 {
                        info!(retries, "sent configuration update after retries");
                    } else {
                        debug!("sent configuration update");
                    }
                    return;
                }
                Err(err) => {
                    retries += 1;
                    warn!(error = %err, retries, "configuration upload failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                    }
                }
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            captured_at: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            app: std::fs::read(self.config_dir.join("app.toml")),
            comet: std::fs::read(self.config_dir.join("config.toml")),
        }
    }

    async fn post(&self, snapshot: &Snapshot) -> Result<(), SendError> {
        let mut form = Form::new().text("captured_at", snapshot.captured_at.clone());

        form = match &snapshot.app {
            Ok(data) => form.part("app_config", Part::bytes(data.clone()).file_name("app.toml")),
            Err(err) => form.text("app_error", error_code(err)),
        };
        form = match &snapshot.comet {
            Ok(data) => form.part(
                "comet_config",
                Part::bytes(data.clone()).file_name("config.toml"),
            ),
            Err(err) => form.text("comet_error", error_code(err)),
        };

        let mut request = self
            .client
            .post(&self.url)
            .header("X-Cosmos-Analyzer-Chain-Id", &self.chain_id)
            .header("X-Cosmos-Analyzer-Node-Id", &self.node_id)
            .multipart(form);
        if !self.auth_key.is_empty() {
            request = request.bearer_auth(&self.auth_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

fn error_code(err: &io::Error) -> &'static str {
    match err.kind() {
        io::ErrorKind::NotFound => ERR_CODE_FILE_NOT_FOUND,
        io::ErrorKind::PermissionDenied => ERR_CODE_PERMISSION_DENIED,
        _ => ERR_CODE_READ_ERROR,
    }
}
