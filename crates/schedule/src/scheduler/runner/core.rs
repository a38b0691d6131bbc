use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use absint_core::{InferError, ScheduleConfig, WorkerId};
use tracing::{debug, error, info};

use crate::scheduler::exception::FatalErrorSink;
use crate::scheduler::lock;
use crate::scheduler::metrics::ScheduleMetrics;
use crate::scheduler::task::Schedulable;
use crate::scheduler::types::{BlockedTask, ScheduleSnapshot, WorkerState};

use super::execution::schedule_loop;

/// Mutable scheduler bookkeeping, guarded by one lock.
pub(super) struct ScheduleState {
    /// Registered inference workers.
    pub(super) workers: HashMap<WorkerId, WorkerState>,
    /// Parked tasks in arrival order.
    pub(super) queue: VecDeque<Arc<dyn Schedulable>>,
    /// Cleared by `stop()`.
    pub(super) running: bool,
}

impl ScheduleState {
    pub(super) fn running_workers(&self) -> usize {
        self.workers
            .values()
            .filter(|state| **state == WorkerState::Running)
            .count()
    }

    pub(super) fn needs_arbitration(&self) -> bool {
        !self.queue.is_empty() && self.running_workers() == 0
    }

    pub(super) fn should_exit(&self) -> bool {
        !self.running && self.workers.is_empty()
    }

    /// Update a registered worker. Unregistered waiters (such as a driver
    /// thread outside the pool) are ignored.
    pub(super) fn set_worker(&mut self, worker: &WorkerId, state: WorkerState) {
        if let Some(current) = self.workers.get_mut(worker) {
            *current = state;
        }
    }

    pub(super) fn snapshot(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            running: self.running_workers(),
            registered: self.workers.len(),
            blocked: self
                .queue
                .iter()
                .map(|task| BlockedTask {
                    worker: task.worker().clone(),
                    has_result: task.has_result(),
                })
                .collect(),
        }
    }
}

/// State shared between the schedule handle and its coordination thread.
pub(super) struct ScheduleShared {
    pub(super) state: Mutex<ScheduleState>,
    /// Signals the coordination loop.
    pub(super) activity: Condvar,
    /// Signals `wait()` callers when the last worker retires.
    pub(super) idle: Condvar,
    pub(super) fatal: FatalErrorSink,
    pub(super) metrics: RwLock<ScheduleMetrics>,
    pub(super) check_period: Duration,
}

/// Coordinator for inference workers that block on each other's results.
///
/// One instance serves a whole inference run and is shared by `Arc` with
/// every [`WorkerContext`](crate::scheduler::WorkerContext). It owns a
/// background thread that wakes parked workers once no registered worker is
/// running.
pub struct AnalysisSchedule {
    pub(super) shared: Arc<ScheduleShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisSchedule {
    /// Create the schedule and start its coordination thread.
    pub fn start(config: &ScheduleConfig) -> Result<Arc<Self>, InferError> {
        let shared = Arc::new(ScheduleShared {
            state: Mutex::new(ScheduleState {
                workers: HashMap::new(),
                queue: VecDeque::new(),
                running: true,
            }),
            activity: Condvar::new(),
            idle: Condvar::new(),
            fatal: FatalErrorSink::new(),
            metrics: RwLock::new(ScheduleMetrics::default()),
            check_period: config.check_period(),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("analysis-schedule".to_string())
            .spawn(move || schedule_loop(loop_shared))
            .map_err(|e| InferError::Spawn {
                worker: "analysis-schedule".to_string(),
                message: e.to_string(),
            })?;

        info!("Analysis schedule started (recheck every {:?})", config.check_period());
        Ok(Arc::new(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }))
    }

    /// Register a worker as running.
    pub fn increase_thread_count(&self, worker: &WorkerId) {
        let mut state = lock(&self.shared.state);
        state.workers.insert(worker.clone(), WorkerState::Running);
        let registered = state.workers.len();
        if let Ok(mut m) = self.shared.metrics.write() {
            m.record_workers(registered);
        }
        debug!(
            "Worker {} joined. registered: {} running: {} queue: {}",
            worker,
            registered,
            state.running_workers(),
            state.queue.len()
        );
    }

    /// Retire a worker. Wakes `wait()` callers when it was the last one.
    pub fn decrease_thread_count(&self, worker: &WorkerId) {
        let remaining = {
            let mut state = lock(&self.shared.state);
            if state.workers.remove(worker).is_none() {
                debug!("Worker {} retired without being registered", worker);
            }
            debug!(
                "Worker {} left. registered: {} running: {} queue: {}",
                worker,
                state.workers.len(),
                state.running_workers(),
                state.queue.len()
            );
            state.workers.len()
        };
        if remaining == 0 {
            self.shared.idle.notify_all();
        }
        self.shared.activity.notify_one();
    }

    /// Number of registered workers.
    pub fn infer_thread_count(&self) -> usize {
        lock(&self.shared.state).workers.len()
    }

    pub fn fatal(&self) -> &FatalErrorSink {
        &self.shared.fatal
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> ScheduleMetrics {
        match self.shared.metrics.read() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn snapshot(&self) -> ScheduleSnapshot {
        lock(&self.shared.state).snapshot()
    }

    /// Snapshot, metrics and fatal error as JSON, for diagnostics.
    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "snapshot": self.snapshot(),
            "metrics": self.metrics(),
            "fatal": self.shared.fatal.last().map(|e| e.to_string()),
        })
    }

    /// Forget the fatal error of a previous run. Refused while workers are
    /// still registered.
    pub fn reset(&self) -> bool {
        let state = lock(&self.shared.state);
        if !state.workers.is_empty() {
            return false;
        }
        self.shared.fatal.clear();
        true
    }

    /// Block until every registered worker has retired, then re-raise the
    /// fatal error of the run, if any. Must not be called by a registered
    /// worker.
    pub fn wait(&self) -> Result<(), InferError> {
        self.shared.activity.notify_one();
        {
            let state = lock(&self.shared.state);
            if !state.workers.is_empty() {
                debug!("Waiting for {} workers", state.workers.len());
            }
            let _idle = self
                .shared
                .idle
                .wait_while(state, |state| !state.workers.is_empty())
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        debug!("Inference finished");
        self.shared.fatal.check()
    }

    /// Signal the coordination thread to exit once no workers remain, and
    /// join it.
    pub fn stop(&self) {
        self.signal_exit();
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Analysis schedule thread panicked");
            }
            info!("Analysis schedule stopped");
        }
    }

    fn signal_exit(&self) {
        lock(&self.shared.state).running = false;
        self.shared.activity.notify_all();
    }
}

impl Drop for AnalysisSchedule {
    fn drop(&mut self) {
        self.signal_exit();
    }
}

impl fmt::Debug for AnalysisSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("AnalysisSchedule")
            .field("registered", &state.workers.len())
            .field("running", &state.running_workers())
            .field("queue", &state.queue.len())
            .finish()
    }
}
