use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted shipping position, written atomically to `status.json`.
///
/// `idx_offset` always points at the start of an unread index line:
/// every frame described before it has been acknowledged by the remote
/// service, or was never seen by this agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Currently open index file path.
    #[serde(default)]
    pub idx_path: String,
    /// Byte offset of the next unread index line.
    #[serde(default)]
    pub idx_offset: u64,
    /// Currently open blob filename (re-openable hint).
    #[serde(default)]
    pub cur_gz: String,
    /// Segment of the last committed frame.
    #[serde(default)]
    pub last_file: String,
    /// Frame number of the last committed frame.
    #[serde(default)]
    pub last_frame: u64,
    #[serde(default)]
    pub last_commit_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_send_at: Option<DateTime<Utc>>,
}

impl PersistedState {
    /// Records a successful send: advances the index cursor by the
    /// acknowledged batch's line bytes and stamps both timestamps.
    pub fn update_after_send(&mut self, idx_advance: u64, last_file: &str, last_frame: u64) {
        self.idx_offset += idx_advance;
        self.last_file = last_file.to_string();
        self.last_frame = last_frame;
        let now = Utc::now();
        self.last_send_at = Some(now);
        self.last_commit_at = Some(now);
    }
}
