//! Shared fixtures: on-disk WAL layouts and agent configuration.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use walship::Config;
use walship::lifecycle::LifecycleState;

/// One newline-terminated index line in the sidecar format.
pub fn idx_line(file: &str, frame: u64, off: u64, len: u64) -> String {
    format!(
        r#"{{"file":"{file}","frame":{frame},"off":{off},"len":{len},"recs":1,"first_ts":1,"last_ts":1,"crc32":0}}"#
    ) + "\n"
}

/// Writes `seg-NNNNNN.wal.gz` and its sidecar into `dir`, one frame per
/// payload, and returns `(idx_path, gz_path)`.
pub fn write_segment(dir: &Path, number: u32, frames: &[&[u8]]) -> (PathBuf, PathBuf) {
    let gz_name = format!("seg-{number:06}.wal.gz");
    let gz_path = dir.join(&gz_name);
    let idx_path = dir.join(format!("seg-{number:06}.wal.idx"));

    let mut blob = Vec::new();
    let mut idx = String::new();
    for (i, payload) in frames.iter().enumerate() {
        idx.push_str(&idx_line(
            &gz_name,
            i as u64 + 1,
            blob.len() as u64,
            payload.len() as u64,
        ));
        blob.extend_from_slice(payload);
    }
    fs::write(&gz_path, blob).unwrap();
    fs::write(&idx_path, idx).unwrap();
    (idx_path, gz_path)
}

/// Test configuration with tight intervals, pointing at a mock server.
pub fn test_config(wal_dir: &Path, service_url: &str) -> Config {
    let mut config = Config {
        wal_dir: Some(wal_dir.to_path_buf()),
        state_dir: Some(wal_dir.to_path_buf()),
        service_url: service_url.to_string(),
        auth_key: "test-key".to_string(),
        chain_id: Some("testchain-1".to_string()),
        node_id: Some("deadbeefcafe".to_string()),
        poll_interval_ms: 50,
        send_interval_secs: 1,
        hard_interval_secs: 2,
        http_timeout_secs: 5,
        ..Default::default()
    };
    config.post_process();
    config
}

/// Waits until the lifecycle reaches a terminal state.
pub async fn wait_terminal(mut subscriber: watch::Receiver<LifecycleState>) -> LifecycleState {
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

/// Waits for a specific lifecycle state, panicking on timeout.
pub async fn wait_for_state(
    subscriber: watch::Receiver<LifecycleState>,
    expected: LifecycleState,
    timeout: Duration,
) {
    let wait = async {
        let mut subscriber = subscriber;
        loop {
            if *subscriber.borrow_and_update() == expected {
                return;
            }
            if subscriber.changed().await.is_err() {
                panic!("lifecycle channel closed before reaching {expected}");
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {expected}"));
}

/// True when `needle` occurs anywhere inside `haystack`.
pub fn body_contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
