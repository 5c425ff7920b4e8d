//! Lifecycle state machine and worker coordination.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::{EventHandler, StateChangeEvent};

/// Maximum time `stop` waits for workers to exit before declaring the
/// shutdown failed.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Stopped => "Stopped",
            LifecycleState::Starting => "Starting",
            LifecycleState::Running => "Running",
            LifecycleState::Stopping => "Stopping",
            LifecycleState::Crashed => "Crashed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("already running")]
    AlreadyRunning,
    #[error("not running")]
    NotRunning,
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Owns the process-wide lifecycle: the state machine, the shared
/// cancellation token and the set of running workers.
///
/// `state`/`can_start`/`can_stop` take the read lock; `transition_to`
/// takes the write lock and emits the state-change event after
/// releasing it.
pub struct Lifecycle {
    state: RwLock<LifecycleState>,
    changed: watch::Sender<LifecycleState>,
    cancel: Mutex<Option<CancellationToken>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    events: Option<Arc<dyn EventHandler>>,
}

impl Lifecycle {
    pub fn new(events: Option<Arc<dyn EventHandler>>) -> Self {
        let (changed, _) = watch::channel(LifecycleState::Stopped);
        Self {
            state: RwLock::new(LifecycleState::Stopped),
            changed,
            cancel: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// A receiver that observes every state change; useful for waiting
    /// until the host reaches a terminal state.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.changed.subscribe()
    }

    pub fn can_start(&self) -> bool {
        matches!(
            *self.state.read(),
            LifecycleState::Stopped | LifecycleState::Crashed
        )
    }

    pub fn can_stop(&self) -> bool {
        matches!(
            *self.state.read(),
            LifecycleState::Starting | LifecycleState::Running
        )
    }

    /// Attempts a state transition, failing on anything outside the
    /// valid transition table.
    pub fn transition_to(&self, to: LifecycleState, reason: &str) -> Result<(), LifecycleError> {
        let from = {
            let mut state = self.state.write();
            let from = *state;
            if !transition_allowed(from, to) {
                return Err(LifecycleError::InvalidTransition { from, to });
            }
            *state = to;
            from
        };

        // Observers run outside the lock.
        let _ = self.changed.send(to);
        if let Some(events) = &self.events {
            events.on_state_change(StateChangeEvent {
                previous: from,
                current: to,
                reason: reason.to_string(),
            });
        }

        info!(from = %from, to = %to, reason, "lifecycle transition");
        Ok(())
    }

    /// Installs the cancellation token for the current run.
    pub fn set_cancel(&self, token: CancellationToken) {
        *self.cancel.lock() = Some(token);
    }

    /// Cancels the current run's token, if any.
    pub fn cancel(&self) {
        let token = self.cancel.lock().clone();
        if let Some(token) = token {
            token.cancel();
        }
    }

    pub fn register_worker(&self, handle: JoinHandle<()>) {
        self.workers.lock().push(handle);
    }

    /// Joins every registered worker, bounded by `timeout`. On timeout
    /// the remaining workers are abandoned and the caller is expected to
    /// transition to `Crashed`.
    pub async fn join_with_timeout(&self, timeout: Duration) -> Result<(), LifecycleError> {
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if handles.is_empty() {
            return Ok(());
        }

        let join_all = async {
            for handle in handles {
                if let Err(err) = handle.await
                    && !err.is_cancelled()
                {
                    warn!(error = %err, "worker terminated abnormally");
                }
            }
        };

        tokio::time::timeout(timeout, join_all)
            .await
            .map_err(|_| LifecycleError::ShutdownTimeout(timeout))
    }
}

fn transition_allowed(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;
    matches!(
        (from, to),
        (Stopped, Starting)
            | (Starting, Running)
            | (Starting, Stopping)
            | (Starting, Crashed)
            | (Running, Stopping)
            | (Running, Crashed)
            | (Stopping, Stopped)
            | (Stopping, Crashed)
            | (Crashed, Starting)
    )
}
