//! Observer surface for lifecycle and send outcomes.

use std::time::Duration;

use crate::lifecycle::LifecycleState;

#[derive(Debug, Clone)]
pub struct StateChangeEvent {
    pub previous: LifecycleState,
    pub current: LifecycleState,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SendSuccessEvent {
    pub frames: usize,
    pub bytes: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct SendErrorEvent {
    pub message: String,
    pub frames: usize,
    pub retryable: bool,
}

/// Callbacks invoked by the host and agent. All methods default to
/// no-ops so handlers implement only what they observe. Callbacks run
/// on the emitting worker and must return quickly.
pub trait EventHandler: Send + Sync {
    fn on_state_change(&self, _event: StateChangeEvent) {}
    fn on_send_success(&self, _event: SendSuccessEvent) {}
    fn on_send_error(&self, _event: SendErrorEvent) {}
}
