use std::sync::Arc;

use absint_core::WorkerId;

use super::runner::AnalysisSchedule;

/// Identity of the worker on whose behalf code runs, plus the scheduler it
/// reports to. Passed down the call stack instead of living in a
/// thread-local.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    id: WorkerId,
    schedule: Arc<AnalysisSchedule>,
}

impl WorkerContext {
    pub fn new(id: WorkerId, schedule: Arc<AnalysisSchedule>) -> Self {
        Self { id, schedule }
    }

    /// Context for the root worker of a run.
    pub fn root(schedule: Arc<AnalysisSchedule>) -> Self {
        Self::new(WorkerId::root(), schedule)
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn schedule(&self) -> &Arc<AnalysisSchedule> {
        &self.schedule
    }

    /// Context for the `index`-th branch worker forked from this one.
    pub fn fork(&self, index: usize) -> Self {
        Self::new(self.id.branch(index), Arc::clone(&self.schedule))
    }

    /// Log prefix naming the worker.
    pub fn label(&self) -> String {
        format!(" INFER:{}:", self.id)
    }

    /// Register this worker as running. The worker retires when the returned
    /// guard is dropped, also while unwinding from a panic.
    pub fn register(self) -> RegisteredWorker {
        self.schedule.increase_thread_count(&self.id);
        RegisteredWorker { worker: self }
    }
}

/// A worker counted by its schedule until dropped.
#[derive(Debug)]
pub struct RegisteredWorker {
    worker: WorkerContext,
}

impl RegisteredWorker {
    pub fn context(&self) -> &WorkerContext {
        &self.worker
    }
}

impl Drop for RegisteredWorker {
    fn drop(&mut self) {
        self.worker.schedule.decrease_thread_count(&self.worker.id);
    }
}
