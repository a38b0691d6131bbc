//! Cooperative scheduler for inference workers that block on each other.
//!
//! Workers run in parallel until they need a value another worker has not
//! produced yet. They then park on a [`PendingTask`] and hand control to the
//! [`AnalysisSchedule`], whose coordination thread wakes blocked workers one
//! at a time once nobody is left running. When no blocked worker can make
//! progress, the head of the wait queue is told it is part of a
//! non-terminating cycle.

pub mod context;
pub mod exception;
pub mod metrics;
pub mod result;
pub mod runner;
pub mod task;
pub mod types;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use context::{RegisteredWorker, WorkerContext};
pub use exception::FatalErrorSink;
pub use metrics::ScheduleMetrics;
pub use result::AsyncResult;
pub use runner::AnalysisSchedule;
pub use task::{PendingTask, Schedulable};
pub use types::{ArbitrationDecision, BlockedTask, ScheduleSnapshot, WorkerState, arbitrate};

/// Critical sections never leave shared state half-updated, so a poisoned
/// lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
