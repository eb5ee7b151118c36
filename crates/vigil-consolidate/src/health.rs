//! A simplified health snapshot for the consolidation loop — unlike the
//! rolling provider-health windows elsewhere in this stack, there's only
//! one thing to report here: how the last tick went.

use std::sync::RwLock;

use vigil_core::time::MonotonicMs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickStatus {
    NeverRun,
    Ok,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ConsolidationHealth {
    pub status: TickStatus,
    pub last_tick_at_ms: Option<MonotonicMs>,
    pub last_tick_duration_ms: Option<i64>,
}

impl Default for ConsolidationHealth {
    fn default() -> Self {
        Self { status: TickStatus::NeverRun, last_tick_at_ms: None, last_tick_duration_ms: None }
    }
}

/// Shared, lock-guarded health state the loop updates every tick and the
/// runtime reads on demand (e.g. from a readiness endpoint).
#[derive(Default)]
pub struct HealthTracker(RwLock<ConsolidationHealth>);

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, at: MonotonicMs, duration_ms: i64) {
        let mut guard = self.0.write().unwrap();
        guard.status = TickStatus::Ok;
        guard.last_tick_at_ms = Some(at);
        guard.last_tick_duration_ms = Some(duration_ms);
    }

    pub fn record_failure(&self, at: MonotonicMs, duration_ms: i64, error: String) {
        let mut guard = self.0.write().unwrap();
        guard.status = TickStatus::Failed(error);
        guard.last_tick_at_ms = Some(at);
        guard.last_tick_duration_ms = Some(duration_ms);
    }

    pub fn snapshot(&self) -> ConsolidationHealth {
        self.0.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_never_run() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.snapshot().status, TickStatus::NeverRun);
    }

    #[test]
    fn records_success_then_failure() {
        let tracker = HealthTracker::new();
        tracker.record_success(MonotonicMs(1), 5);
        assert_eq!(tracker.snapshot().status, TickStatus::Ok);
        tracker.record_failure(MonotonicMs(2), 7, "db locked".to_string());
        assert_eq!(tracker.snapshot().status, TickStatus::Failed("db locked".to_string()));
    }
}
