use absint_core::WorkerId;
use serde::Serialize;

/// Scheduling state of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WorkerState {
    /// Executing inference code.
    Running,
    /// Parked on a pending task.
    Blocked,
}

/// A parked task as seen by arbitration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTask {
    pub worker: WorkerId,
    /// The awaited cell already holds a value.
    pub has_result: bool,
}

/// Point-in-time view of the scheduler: how many registered workers are
/// running, and the wait queue in FIFO order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleSnapshot {
    pub running: usize,
    pub registered: usize,
    pub blocked: Vec<BlockedTask>,
}

/// Outcome of one arbitration round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationDecision {
    /// Someone is still running or nobody waits.
    Idle,
    /// Wake the queued task at this index; its value is available.
    Wake(usize),
    /// Nothing can progress: report non-termination to the queue head.
    SignalNonTermination,
}

/// Decide which blocked worker proceeds.
///
/// Only acts when no registered worker is running. The first queued task
/// whose value is available wins; if none has one, every waiter depends on
/// another waiter and the head of the queue is picked to report the cycle.
///
/// FIFO order does not follow the real dependency graph, so a woken task may
/// still be unable to finish and a later round has to converge.
pub fn arbitrate(snapshot: &ScheduleSnapshot) -> ArbitrationDecision {
    if snapshot.running > 0 || snapshot.blocked.is_empty() {
        return ArbitrationDecision::Idle;
    }
    match snapshot.blocked.iter().position(|task| task.has_result) {
        Some(index) => ArbitrationDecision::Wake(index),
        None => ArbitrationDecision::SignalNonTermination,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(worker: &str, has_result: bool) -> BlockedTask {
        BlockedTask {
            worker: WorkerId::new(worker),
            has_result,
        }
    }

    fn snapshot(running: usize, blocked: Vec<BlockedTask>) -> ScheduleSnapshot {
        ScheduleSnapshot {
            running,
            registered: running + blocked.len(),
            blocked,
        }
    }

    #[test]
    fn idle_while_anyone_runs() {
        let s = snapshot(1, vec![blocked("a", true), blocked("b", false)]);
        assert_eq!(arbitrate(&s), ArbitrationDecision::Idle);
    }

    #[test]
    fn idle_with_empty_queue() {
        assert_eq!(arbitrate(&snapshot(0, vec![])), ArbitrationDecision::Idle);
    }

    #[test]
    fn wakes_first_task_with_result() {
        let s = snapshot(
            0,
            vec![blocked("a", false), blocked("b", true), blocked("c", true)],
        );
        assert_eq!(arbitrate(&s), ArbitrationDecision::Wake(1));
    }

    #[test]
    fn cycle_signals_head() {
        let s = snapshot(0, vec![blocked("a", false), blocked("b", false), blocked("c", false)]);
        assert_eq!(arbitrate(&s), ArbitrationDecision::SignalNonTermination);
    }
}
