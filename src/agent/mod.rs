//! The shipping loop: read, batch, gate, send, commit, repeat.

mod verify;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{Batcher, Offer};
use crate::domain::{FrameRecord, PersistedState};
use crate::events::{EventHandler, SendErrorEvent, SendSuccessEvent};
use crate::gate::ResourceGate;
use crate::reader::{IndexReader, ReadError};
use crate::sender::{Backoff, FrameSender, Metadata, SendError};
use crate::state::StateStore;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Idle tail interval between polls when no data is available.
    pub poll_interval: Duration,
    /// Soft flush deadline.
    pub send_interval: Duration,
    /// Forced flush deadline; overrides the resource gate.
    pub hard_interval: Duration,
    /// Byte cap on a batch's compressed payload.
    pub max_batch_bytes: usize,
    /// Exit cleanly at the first end of data.
    pub once: bool,
    /// Debug: gunzip each frame and log its digest.
    pub verify: bool,
    /// Debug: log frame metadata as frames are read.
    pub meta: bool,
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Read(#[from] ReadError),
}

/// How a run ended, when it ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The shared cancellation token fired.
    Cancelled,
    /// One-shot mode reached end of data.
    Completed,
}

/// Single-task cooperative loop that owns the reader, the in-progress
/// batch and the persisted state while running.
pub struct Agent<S> {
    config: AgentConfig,
    reader: IndexReader,
    state_store: StateStore,
    batcher: Batcher,
    sender: Arc<S>,
    gate: Option<Arc<dyn ResourceGate>>,
    backoff: Backoff,
    metadata: Metadata,
    events: Option<Arc<dyn EventHandler>>,
}

impl<S: FrameSender> Agent<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        reader: IndexReader,
        state_store: StateStore,
        sender: Arc<S>,
        gate: Option<Arc<dyn ResourceGate>>,
        metadata: Metadata,
        events: Option<Arc<dyn EventHandler>>,
    ) -> Self {
        let batcher = Batcher::new(
            config.max_batch_bytes,
            config.send_interval,
            config.hard_interval,
        );
        Self {
            config,
            reader,
            state_store,
            batcher,
            sender,
            gate,
            backoff: Backoff::default(),
            metadata,
            events,
        }
    }

    /// Runs the loop until cancellation, end of data in one-shot mode,
    /// or a fatal read error.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RunExit, AgentError> {
        let mut state = match self.state_store.load() {
            Ok(state) => state,
            Err(err) => {
                error!(error = %err, "failed to load state, starting from the oldest index");
                PersistedState::default()
            }
        };

        self.reader
            .open(&state.idx_path, state.idx_offset, &state.cur_gz)?;

        // Record the discovered position immediately so a crash before
        // the first send resumes from the same index.
        if state.idx_path.is_empty() {
            let (idx_path, idx_offset, cur_gz) = self.reader.current_position();
            state.idx_path = idx_path;
            state.idx_offset = idx_offset;
            state.cur_gz = cur_gz;
            if let Err(err) = self.state_store.save(&state) {
                warn!(error = %err, "failed to persist initial position");
            }
        }

        let exit = loop {
            if cancel.is_cancelled() {
                // Best-effort flush of whatever is pending.
                self.try_send(&cancel, &mut state).await;
                break RunExit::Cancelled;
            }

            let record = match self.reader.next() {
                Ok(Some(record)) => record,
                Ok(None) => {
                    // End of data ships the pending batch outright; the
                    // resource gate only defers trigger-driven flushes.
                    if self.batcher.has_pending() {
                        self.try_send(&cancel, &mut state).await;
                    }
                    if self.config.once {
                        break RunExit::Completed;
                    }
                    self.poll_sleep(&cancel).await;
                    continue;
                }
                Err(err) if err.is_fatal() => {
                    error!(error = %err, "fatal read error");
                    self.reader.close();
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(error = %err, "transient read error");
                    self.poll_sleep(&cancel).await;
                    continue;
                }
            };

            self.debug_hooks(&record);

            let offer = self.batcher.offer(record);
            let size_trigger = offer.size_trigger();
            if let Offer::Full(record) = offer {
                // The batch is at capacity: flush it, then admit the
                // refused record unconditionally so it is never lost.
                self.flush(&cancel, &mut state).await;
                self.batcher.queue(record);
                continue;
            }

            if size_trigger || self.batcher.should_send() || self.batcher.should_force_send() {
                self.flush(&cancel, &mut state).await;
            }
        };

        self.reader.close();
        Ok(exit)
    }

    /// Debug hooks; neither is allowed to fail the loop.
    fn debug_hooks(&self, record: &FrameRecord) {
        if self.config.meta {
            info!(
                file = %record.frame.file,
                frame = record.frame.frame_number,
                off = record.frame.offset,
                len = record.frame.length,
                recs = record.frame.record_count,
                "frame metadata"
            );
        }
        if self.config.verify {
            match verify::inspect_frame(&record.compressed) {
                Ok(digest) => debug!(
                    file = %record.frame.file,
                    frame = record.frame.frame_number,
                    crc32 = digest.crc32,
                    lines = digest.lines,
                    uncompressed = digest.uncompressed_len,
                    "frame verified"
                ),
                Err(err) => warn!(
                    file = %record.frame.file,
                    frame = record.frame.frame_number,
                    error = %err,
                    "frame verification failed"
                ),
            }
        }
    }

    /// Flushes the pending batch unless the resource gate defers it.
    /// The hard interval supersedes gating.
    async fn flush(&mut self, cancel: &CancellationToken, state: &mut PersistedState) {
        if !self.batcher.has_pending() {
            return;
        }
        if let Some(gate) = &self.gate
            && !self.batcher.should_force_send()
            && !gate.ok()
        {
            debug!("resource gate: deferring send");
            return;
        }
        self.try_send(cancel, state).await;
    }

    /// Attempts to ship the pending batch. On failure the batch is
    /// retained for the next flush and the backoff sleeps; on success
    /// the index cursor is committed and batch and backoff reset.
    async fn try_send(&mut self, cancel: &CancellationToken, state: &mut PersistedState) {
        if self.batcher.batch().is_empty() {
            return;
        }

        let start = Instant::now();
        let result = tokio::select! {
            result = self.sender.send(self.batcher.batch(), &self.metadata) => result,
            _ = cancel.cancelled() => Err(SendError::Cancelled),
        };

        let batch = self.batcher.batch();
        match result {
            Err(SendError::Cancelled) => {
                // Request aborted by shutdown; the batch replays after
                // restart from the unchanged offset.
                debug!(frames = batch.len(), "send cancelled, batch retained");
            }
            Err(err) => {
                error!(
                    error = %err,
                    frames = batch.len(),
                    bytes = batch.total_bytes(),
                    "send failed"
                );
                if let Some(events) = &self.events {
                    events.on_send_error(SendErrorEvent {
                        message: err.to_string(),
                        frames: batch.len(),
                        retryable: err.retryable(),
                    });
                }
                self.backoff.sleep(cancel).await;
            }
            Ok(()) => {
                let duration = start.elapsed();
                info!(
                    frames = batch.len(),
                    bytes = batch.total_bytes(),
                    ?duration,
                    "sent batch"
                );
                if let Some(events) = &self.events {
                    events.on_send_success(SendSuccessEvent {
                        frames: batch.len(),
                        bytes: batch.total_bytes(),
                        duration,
                    });
                }

                if let Some(last) = batch.last_frame() {
                    let advance = batch.total_idx_advance();
                    let (file, frame_number) = (last.file.clone(), last.frame_number);
                    state.update_after_send(advance, &file, frame_number);
                }

                // The reader's position is authoritative: after a
                // rotation mid-batch it points into the new index.
                let (idx_path, idx_offset, cur_gz) = self.reader.current_position();
                state.idx_path = idx_path;
                state.idx_offset = idx_offset;
                state.cur_gz = cur_gz;

                if let Err(err) = self.state_store.save(state) {
                    // Not fatal: the next successful send retries the
                    // save, and duplicate frames are tolerated by the
                    // server's idempotent keying.
                    error!(error = %err, "failed to persist state");
                }

                self.batcher.reset();
                self.backoff.reset();
            }
        }
    }

    async fn poll_sleep(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    use crate::domain::Batch;
    use crate::gate::MockResourceGate;

    /// Counts send attempts; optionally fails them all.
    struct RecordingSender {
        calls: AtomicUsize,
        fail: bool,
    }

    impl RecordingSender {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FrameSender for RecordingSender {
        async fn send(&self, _batch: &Batch, _metadata: &Metadata) -> Result<(), SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SendError::Status {
                    status: 500,
                    body: "nope".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn write_wal_frame(dir: &std::path::Path) {
        fs::write(
            dir.join("seg-000001.wal.idx"),
            concat!(
                r#"{"file":"seg-000001.wal.gz","frame":1,"off":0,"len":5,"recs":1,"#,
                r#""first_ts":1,"last_ts":1,"crc32":0}"#,
                "\n"
            ),
        )
        .unwrap();
        fs::write(dir.join("seg-000001.wal.gz"), b"hello").unwrap();
    }

    fn agent_config() -> AgentConfig {
        AgentConfig {
            poll_interval: Duration::from_millis(10),
            send_interval: Duration::ZERO,
            hard_interval: Duration::from_secs(3600),
            max_batch_bytes: 4 << 20,
            once: true,
            verify: false,
            meta: false,
        }
    }

    fn metadata() -> Metadata {
        Metadata {
            chain_id: "testchain-1".to_string(),
            node_id: "cafe".to_string(),
            hostname: "host".to_string(),
            os_arch: "linux/x86_64".to_string(),
            auth_key: String::new(),
            service_url: "http://127.0.0.1:0".to_string(),
        }
    }

    fn build_agent(
        wal: &TempDir,
        config: AgentConfig,
        sender: Arc<RecordingSender>,
        gate: Option<Arc<dyn ResourceGate>>,
    ) -> Agent<RecordingSender> {
        Agent::new(
            config,
            IndexReader::new(wal.path()),
            StateStore::new(wal.path()),
            sender,
            gate,
            metadata(),
            None,
        )
    }

    #[tokio::test]
    async fn gate_refusal_defers_soft_flushes_but_not_end_of_data() {
        let wal = TempDir::new().unwrap();
        write_wal_frame(wal.path());

        let mut gate = MockResourceGate::new();
        gate.expect_ok().return_const(false);

        let sender = Arc::new(RecordingSender::new(false));
        let agent = build_agent(&wal, agent_config(), sender.clone(), Some(Arc::new(gate)));

        let exit = agent.run(CancellationToken::new()).await.unwrap();
        assert_eq!(exit, RunExit::Completed);

        // The elapsed soft interval was deferred by the gate, but the
        // end-of-data flush bypasses it: the batch ships exactly once.
        assert_eq!(sender.calls(), 1);
        let state = StateStore::new(wal.path()).load().unwrap();
        assert_eq!(state.last_frame, 1);
        assert!(state.idx_offset > 0);
    }

    #[tokio::test]
    async fn hard_interval_overrides_the_gate() {
        let wal = TempDir::new().unwrap();
        write_wal_frame(wal.path());

        let mut gate = MockResourceGate::new();
        gate.expect_ok().return_const(false);

        let mut config = agent_config();
        config.hard_interval = Duration::ZERO;

        let sender = Arc::new(RecordingSender::new(false));
        let agent = build_agent(&wal, config, sender.clone(), Some(Arc::new(gate)));

        let exit = agent.run(CancellationToken::new()).await.unwrap();
        assert_eq!(exit, RunExit::Completed);
        assert_eq!(sender.calls(), 1);

        let state = StateStore::new(wal.path()).load().unwrap();
        assert_eq!(state.last_frame, 1);
        assert!(state.idx_offset > 0);
    }

    #[tokio::test]
    async fn open_gate_lets_the_flush_through() {
        let wal = TempDir::new().unwrap();
        write_wal_frame(wal.path());

        let mut gate = MockResourceGate::new();
        gate.expect_ok().return_const(true);

        let sender = Arc::new(RecordingSender::new(false));
        let agent = build_agent(&wal, agent_config(), sender.clone(), Some(Arc::new(gate)));

        agent.run(CancellationToken::new()).await.unwrap();
        assert_eq!(sender.calls(), 1);
    }

    #[tokio::test]
    async fn failed_send_commits_nothing_in_once_mode() {
        let wal = TempDir::new().unwrap();
        write_wal_frame(wal.path());

        // Long soft interval: the only flush is the end-of-data one.
        let mut config = agent_config();
        config.send_interval = Duration::from_secs(3600);

        let sender = Arc::new(RecordingSender::new(true));
        let agent = build_agent(&wal, config, sender.clone(), None);

        let exit = agent.run(CancellationToken::new()).await.unwrap();
        assert_eq!(exit, RunExit::Completed);
        assert_eq!(sender.calls(), 1);

        let state = StateStore::new(wal.path()).load().unwrap();
        assert_eq!(state.idx_offset, 0);
        assert_eq!(state.last_frame, 0);
    }

    #[tokio::test]
    async fn cancellation_before_start_reads_nothing() {
        let wal = TempDir::new().unwrap();
        write_wal_frame(wal.path());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let sender = Arc::new(RecordingSender::new(false));
        let agent = build_agent(&wal, agent_config(), sender.clone(), None);

        let exit = agent.run(cancel).await.unwrap();
        assert_eq!(exit, RunExit::Cancelled);
        assert_eq!(sender.calls(), 0);
    }
}
