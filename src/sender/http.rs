use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, ClientBuilder};
use tracing::debug;

use super::{FrameSender, Metadata, SendError};
use crate::domain::{Batch, FrameMeta};

const WAL_FRAMES_ENDPOINT: &str = "/v1/ingest/wal-frames";

/// Uploads batches as `multipart/form-data`: a `manifest` field holding
/// the JSON frame descriptors in batch order, and a `frames` file part
/// holding the concatenated compressed payloads. Offsets into the
/// payload are recoverable from the manifest's `len` sequence.
#[derive(Debug, Clone)]
pub struct HttpFrameSender {
    client: Client,
}

impl HttpFrameSender {
    pub fn new(timeout: Duration) -> Result<Self, SendError> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("walship/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Builds a sender around an existing client, e.g. one with custom
    /// pool or TLS settings.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl FrameSender for HttpFrameSender {
    async fn send(&self, batch: &Batch, metadata: &Metadata) -> Result<(), SendError> {
        if batch.is_empty() {
            return Ok(());
        }

        let manifest: Vec<FrameMeta> = batch.frames().iter().map(FrameMeta::from).collect();
        let manifest_json = serde_json::to_string(&manifest)?;

        let mut payload = Vec::with_capacity(batch.total_bytes());
        for compressed in batch.compressed() {
            payload.extend_from_slice(compressed);
        }

        let filename = batch
            .frames()
            .first()
            .map(|frame| frame.file.clone())
            .unwrap_or_else(|| "frames.bin".to_string());

        let form = Form::new()
            .text("manifest", manifest_json)
            .part("frames", Part::bytes(payload).file_name(filename));

        let url = format!("{}{}", metadata.service_url, WAL_FRAMES_ENDPOINT);
        debug!(frames = batch.len(), bytes = batch.total_bytes(), %url, "uploading batch");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&metadata.auth_key)
            .header("X-Agent-Hostname", &metadata.hostname)
            .header("X-Agent-OSArch", &metadata.os_arch)
            .header("X-Cosmos-Analyzer-Chain-Id", &metadata.chain_id)
            .header("X-Cosmos-Analyzer-Node-Id", &metadata.node_id)
            .multipart(form)
            .send()
            .await?;

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
