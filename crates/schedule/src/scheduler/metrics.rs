use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler operational counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleMetrics {
    /// Arbitration rounds that woke a task.
    pub arbitration_rounds: u64,
    /// Tasks woken because their value was available.
    pub tasks_woken: u64,
    /// Tasks told they are part of a non-terminating cycle.
    pub non_termination_signals: u64,
    /// Fatal errors broadcast to the wait queue.
    pub exceptions_broadcast: u64,
    /// Tasks failed by those broadcasts.
    pub tasks_interrupted: u64,
    /// Largest number of simultaneously registered workers.
    pub peak_workers: usize,
    /// When the last arbitration round ran.
    pub last_arbitration: Option<DateTime<Utc>>,
}

impl ScheduleMetrics {
    pub fn record_wake(&mut self) {
        self.arbitration_rounds += 1;
        self.tasks_woken += 1;
        self.last_arbitration = Some(Utc::now());
    }

    pub fn record_non_termination(&mut self) {
        self.arbitration_rounds += 1;
        self.non_termination_signals += 1;
        self.last_arbitration = Some(Utc::now());
    }

    pub fn record_exception(&mut self, interrupted: usize) {
        self.exceptions_broadcast += 1;
        self.tasks_interrupted += interrupted as u64;
    }

    pub fn record_workers(&mut self, registered: usize) {
        self.peak_workers = self.peak_workers.max(registered);
    }
}
