//! Resource gating: a soft yes/no oracle consulted before a flush.

use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Policy oracle that decides whether the agent may send now. `false`
/// defers the flush unless the hard interval has elapsed.
///
/// Implementations must be cheap and lock-free; the gate sits on the
/// agent's hot path.
#[cfg_attr(test, automock)]
pub trait ResourceGate: Send + Sync {
    fn ok(&self) -> bool;
}

/// Tasks per worker thread treated as 100 % load. A rough in-process
/// proxy; OS-metric gates replace this through the trait.
const TASKS_PER_WORKER_AT_FULL_LOAD: f64 = 12.0;

/// Conservative in-process heuristic gate.
///
/// Approximates system load from the number of alive tokio tasks per
/// available core and compares it against `cpu_threshold`. It errs
/// towards allowing the send: with no runtime signal available it
/// answers `true`.
#[derive(Debug, Clone)]
pub struct LoadGate {
    cpu_threshold: f64,
}

impl LoadGate {
    pub fn new(cpu_threshold: f64) -> Self {
        let cpu_threshold = if cpu_threshold > 0.0 { cpu_threshold } else { 0.85 };
        Self { cpu_threshold }
    }
}

impl ResourceGate for LoadGate {
    fn ok(&self) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return true;
        };

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let alive = handle.metrics().num_alive_tasks();

        let load = (alive as f64 / (workers as f64 * TASKS_PER_WORKER_AT_FULL_LOAD)).min(1.0);
        if load > self.cpu_threshold {
            debug!(alive_tasks = alive, workers, load, threshold = self.cpu_threshold,
                "resource gate: high load, deferring send");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_gate_allows_sends_on_an_idle_runtime() {
        let gate = LoadGate::new(0.85);
        assert!(gate.ok());
    }

    #[test]
    fn load_gate_allows_sends_outside_a_runtime() {
        let gate = LoadGate::new(0.85);
        assert!(gate.ok());
    }

    #[test]
    fn zero_threshold_falls_back_to_default() {
        let gate = LoadGate::new(0.0);
        assert!((gate.cpu_threshold - 0.85).abs() < f64::EPSILON);
    }
}
