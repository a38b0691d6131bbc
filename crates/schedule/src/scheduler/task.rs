use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

use absint_core::{InferError, WorkerId};
use tracing::debug;
use uuid::Uuid;

use super::context::WorkerContext;
use super::lock;
use super::result::AsyncResult;

/// The scheduler's view of a parked worker.
///
/// [`PendingTask`] is generic over the result type; the scheduler queue holds
/// tasks of every result type through this trait.
pub trait Schedulable: Send + Sync {
    fn id(&self) -> Uuid;

    /// Worker that is parked on this task.
    fn worker(&self) -> &WorkerId;

    /// Whether the awaited cell already holds a value.
    fn has_result(&self) -> bool;

    /// Whether a wake-up has been delivered and not yet consumed.
    fn is_woken(&self) -> bool;

    fn mark_ready(&self);

    fn mark_exception(&self);

    fn mark_non_termination(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    Ready,
    Failed,
}

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    /// One-shot: cleared when reported.
    non_termination: bool,
}

impl TaskState {
    fn is_woken(&self) -> bool {
        self.status != TaskStatus::Waiting || self.non_termination
    }
}

/// A worker waiting for the value of an [`AsyncResult`].
pub struct PendingTask<V> {
    id: Uuid,
    worker: WorkerId,
    result: Arc<AsyncResult<V>>,
    state: Mutex<TaskState>,
    signal: Condvar,
}

impl<V: Clone + fmt::Display + Send + Sync + 'static> PendingTask<V> {
    pub fn new(result: Arc<AsyncResult<V>>, worker: WorkerId) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker,
            result,
            state: Mutex::new(TaskState {
                status: TaskStatus::Waiting,
                non_termination: false,
            }),
            signal: Condvar::new(),
        }
    }

    pub fn make_shared(result: Arc<AsyncResult<V>>, worker: WorkerId) -> Arc<Self> {
        Arc::new(Self::new(result, worker))
    }

    pub fn status(&self) -> TaskStatus {
        lock(&self.state).status
    }

    /// Block until the value is available and return it.
    ///
    /// A recorded fatal error is returned instead, both before parking and
    /// after waking. A non-termination wake-up is reported exactly once; the
    /// next call parks again.
    pub fn get_result(self: &Arc<Self>, worker: &WorkerContext) -> Result<V, InferError> {
        let schedule = worker.schedule();
        schedule.fatal().check()?;
        {
            let mut state = lock(&self.state);
            if state.status == TaskStatus::Ready {
                return self.process_result(&mut state, worker);
            }
        }

        // The task lock must be released here: the scheduler takes its own
        // lock first and then marks tasks.
        let parked: Arc<dyn Schedulable> = self.clone();
        schedule.yield_task(parked);

        let guard = lock(&self.state);
        let mut state = self
            .signal
            .wait_while(guard, |state| !state.is_woken())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(
            "Task {} woke up: {:?} (non_termination={}) worker: {}",
            self.id, state.status, state.non_termination, self.worker
        );
        self.process_result(&mut state, worker)
    }

    fn process_result(&self, state: &mut TaskState, worker: &WorkerContext) -> Result<V, InferError> {
        if state.non_termination {
            state.non_termination = false;
            return Err(InferError::NonTermination {
                worker: self.worker.to_string(),
            });
        }
        worker.schedule().fatal().check()?;
        if state.status == TaskStatus::Failed {
            return Err(InferError::MissingResult(format!(
                "task {} of worker {} failed without a recorded error",
                self.id, self.worker
            )));
        }
        let value = self.result.try_get().ok_or_else(|| {
            InferError::MissingResult(format!("task {} of worker {}", self.id, self.worker))
        })?;
        debug!("Task {} got result {} worker: {}", self.id, value, worker.id());
        Ok(value)
    }

    fn update(&self, apply: impl FnOnce(&mut TaskState)) {
        {
            let mut state = lock(&self.state);
            apply(&mut state);
            debug!(
                "Notify task {}: {:?} (non_termination={}) worker: {}",
                self.id, state.status, state.non_termination, self.worker
            );
        }
        self.signal.notify_one();
    }
}

impl<V: Clone + fmt::Display + Send + Sync + 'static> Schedulable for PendingTask<V> {
    fn id(&self) -> Uuid {
        self.id
    }

    fn worker(&self) -> &WorkerId {
        &self.worker
    }

    fn has_result(&self) -> bool {
        self.result.has_value()
    }

    fn is_woken(&self) -> bool {
        lock(&self.state).is_woken()
    }

    fn mark_ready(&self) {
        self.update(|state| {
            if state.status == TaskStatus::Waiting {
                state.status = TaskStatus::Ready;
            }
        });
    }

    fn mark_exception(&self) {
        self.update(|state| {
            if state.status == TaskStatus::Waiting {
                state.status = TaskStatus::Failed;
            }
        });
    }

    fn mark_non_termination(&self) {
        self.update(|state| state.non_termination = true);
    }
}

impl<V> fmt::Debug for PendingTask<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("id", &self.id)
            .field("worker", &self.worker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use absint_core::ScheduleConfig;

    use super::*;
    use crate::scheduler::AnalysisSchedule;

    fn schedule() -> Arc<AnalysisSchedule> {
        let config = ScheduleConfig {
            check_period_ms: 20,
            ..ScheduleConfig::default()
        };
        AnalysisSchedule::start(&config).unwrap()
    }

    #[test]
    fn ready_task_returns_without_parking() {
        let schedule = schedule();
        let worker = WorkerContext::new(WorkerId::new("w"), Arc::clone(&schedule));
        let cell = Arc::new(AsyncResult::with_value(7));
        let task = PendingTask::make_shared(cell, worker.id().clone());

        task.mark_ready();
        assert_eq!(task.status(), TaskStatus::Ready);
        assert_eq!(task.get_result(&worker), Ok(7));
        assert_eq!(schedule.snapshot().blocked.len(), 0);
        schedule.stop();
    }

    #[test]
    fn ready_never_reverts() {
        let cell = Arc::new(AsyncResult::with_value(1));
        let task = PendingTask::make_shared(cell, WorkerId::new("w"));
        task.mark_ready();
        task.mark_ready();
        task.mark_exception();
        assert_eq!(task.status(), TaskStatus::Ready);
        task.mark_non_termination();
        assert_eq!(task.status(), TaskStatus::Ready);
        assert!(task.has_result());

        let failed = PendingTask::make_shared(Arc::new(AsyncResult::with_value(2)), WorkerId::new("w"));
        failed.mark_exception();
        failed.mark_ready();
        assert_eq!(failed.status(), TaskStatus::Failed);
    }

    #[test]
    fn non_termination_is_reported_once() {
        let schedule = schedule();
        // A running driver keeps the scheduler from arbitrating, so the test
        // drives the wake-ups by hand.
        let driver = WorkerId::new("driver");
        schedule.increase_thread_count(&driver);
        let worker = WorkerContext::new(WorkerId::new("loop"), Arc::clone(&schedule));
        let cell: Arc<AsyncResult<i32>> = Arc::new(AsyncResult::new());
        let task = PendingTask::make_shared(Arc::clone(&cell), worker.id().clone());

        task.mark_non_termination();
        let err = task.get_result(&worker).unwrap_err();
        assert_eq!(err, InferError::NonTermination { worker: "loop".into() });

        let waiter = {
            let task = Arc::clone(&task);
            let worker = worker.clone();
            thread::spawn(move || task.get_result(&worker))
        };
        thread::sleep(Duration::from_millis(50));
        cell.set(11);
        task.mark_ready();

        assert_eq!(waiter.join().unwrap(), Ok(11));
        schedule.decrease_thread_count(&driver);
        schedule.stop();
    }

    #[test]
    fn exception_without_value_is_missing_result() {
        let schedule = schedule();
        let worker = WorkerContext::new(WorkerId::new("w"), Arc::clone(&schedule));
        let cell: Arc<AsyncResult<i32>> = Arc::new(AsyncResult::new());
        let task = PendingTask::make_shared(cell, worker.id().clone());

        task.mark_exception();
        let err = task.get_result(&worker).unwrap_err();
        assert!(matches!(err, InferError::MissingResult(_)));
        schedule.stop();
    }
}
