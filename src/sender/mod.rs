mod backoff;
mod http;

pub use backoff::Backoff;
pub use http::HttpFrameSender;

use thiserror::Error;

use crate::domain::Batch;

/// Identity and routing metadata attached to every upload.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub chain_id: String,
    pub node_id: String,
    pub hostname: String,
    pub os_arch: String,
    pub auth_key: String,
    /// Base URL without a trailing slash; endpoint paths are appended.
    pub service_url: String,
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("manifest encoding failed: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("send cancelled")]
    Cancelled,
}

impl SendError {
    /// Every send error is retryable from the unchanged index offset;
    /// the server keys frames idempotently per `(file, frame)`.
    pub fn retryable(&self) -> bool {
        !matches!(self, SendError::Cancelled)
    }
}

/// Ships one batch to the remote ingestion service. Implementations do
/// not retry internally; the agent owns backoff and replay.
pub trait FrameSender: Send + Sync {
    fn send(
        &self,
        batch: &Batch,
        metadata: &Metadata,
    ) -> impl std::future::Future<Output = Result<(), SendError>> + Send;
}
