use std::sync::Arc;

use absint_core::InferError;
use tracing::{debug, warn};

use crate::scheduler::lock;
use crate::scheduler::task::Schedulable;
use crate::scheduler::types::WorkerState;

use super::core::{AnalysisSchedule, ScheduleShared};
use super::scheduling::set_next_ready;

/// Body of the coordination thread. Runs until `stop()` was requested and
/// every worker retired.
pub(super) fn schedule_loop(shared: Arc<ScheduleShared>) {
    let mut state = lock(&shared.state);
    while !state.should_exit() {
        let (guard, _timeout) = shared
            .activity
            .wait_timeout_while(state, shared.check_period, |state| {
                !state.needs_arbitration() && !state.should_exit()
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state = guard;
        if state.needs_arbitration() {
            set_next_ready(&mut state, &shared);
        }
    }
    debug!("Analysis schedule loop exited");
}

impl AnalysisSchedule {
    /// Park `task`: queue it and mark its worker blocked. Signals the
    /// coordination loop when no registered worker is left running.
    ///
    /// When a fatal error is already recorded the task is failed right away
    /// instead of being queued behind a broadcast that already happened.
    pub fn yield_task(&self, task: Arc<dyn Schedulable>) {
        let arbitrate = {
            let mut state = lock(&self.shared.state);
            if self.shared.fatal.has_exception() {
                task.mark_exception();
                return;
            }
            if task.is_woken() {
                return;
            }
            state.set_worker(task.worker(), WorkerState::Blocked);
            debug!(
                "Task {} of worker {} parked. running: {} queue: {}",
                task.id(),
                task.worker(),
                state.running_workers(),
                state.queue.len() + 1
            );
            state.queue.push_back(task);
            state.needs_arbitration()
        };
        if arbitrate {
            self.shared.activity.notify_one();
        }
    }

    /// Record `error` as the run's fatal error (the first one wins) and fail
    /// every parked task so their workers unwind instead of hanging.
    pub fn handle_exception(&self, error: InferError) {
        if self.shared.fatal.record(error.clone()) {
            warn!("Fatal inference error: {}", error);
        }

        let mut state = lock(&self.shared.state);
        let interrupted: Vec<_> = state.queue.drain(..).collect();
        for task in &interrupted {
            state.set_worker(task.worker(), WorkerState::Running);
            task.mark_exception();
        }
        if let Ok(mut m) = self.shared.metrics.write() {
            m.record_exception(interrupted.len());
        }
        debug!("Interrupted {} parked tasks", interrupted.len());
    }
}
