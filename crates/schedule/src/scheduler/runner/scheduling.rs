use tracing::{debug, warn};

use crate::scheduler::types::{ArbitrationDecision, WorkerState, arbitrate};

use super::core::{ScheduleShared, ScheduleState};

/// Run one arbitration round under the schedule lock.
///
/// Wakes the first parked task whose value is available. If none has one,
/// the head of the queue is woken with a non-termination signal so that its
/// worker can report the cycle.
pub(super) fn set_next_ready(state: &mut ScheduleState, shared: &ScheduleShared) {
    // Tasks woken outside arbitration no longer have a parked worker.
    let queue = std::mem::take(&mut state.queue);
    for task in queue {
        if task.is_woken() {
            state.set_worker(task.worker(), WorkerState::Running);
        } else {
            state.queue.push_back(task);
        }
    }

    match arbitrate(&state.snapshot()) {
        ArbitrationDecision::Idle => {}
        ArbitrationDecision::Wake(index) => {
            let Some(task) = state.queue.remove(index) else {
                return;
            };
            state.set_worker(task.worker(), WorkerState::Running);
            task.mark_ready();
            if let Ok(mut m) = shared.metrics.write() {
                m.record_wake();
            }
            debug!(
                "Woke task {} of worker {}. running: {} queue: {}",
                task.id(),
                task.worker(),
                state.running_workers(),
                state.queue.len()
            );
        }
        ArbitrationDecision::SignalNonTermination => {
            let Some(task) = state.queue.pop_front() else {
                return;
            };
            state.set_worker(task.worker(), WorkerState::Running);
            task.mark_non_termination();
            if let Ok(mut m) = shared.metrics.write() {
                m.record_non_termination();
            }
            warn!(
                "No parked task can make progress; signalling non-termination to worker {} ({} still parked)",
                task.worker(),
                state.queue.len()
            );
        }
    }
}
