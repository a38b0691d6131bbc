use std::fmt;
use std::sync::{Arc, Mutex};

use absint_core::InferError;
use tracing::trace;

use super::context::WorkerContext;
use super::lock;
use super::task::PendingTask;

/// Single-slot box for an inference result, shared between the producing
/// worker and any number of waiters.
pub struct AsyncResult<V> {
    value: Mutex<Option<V>>,
}

impl<V> Default for AsyncResult<V> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }
}

impl<V: Clone + fmt::Display + Send + Sync + 'static> AsyncResult<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cell that already holds `value`.
    pub fn with_value(value: V) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }

    /// Store `value` unless the cell is already set. Returns whether it was
    /// stored; an earlier value is never replaced.
    pub fn set(&self, value: V) -> bool {
        let mut slot = lock(&self.value);
        if slot.is_some() {
            trace!("Result already set, keeping it over {}", value);
            return false;
        }
        *slot = Some(value);
        true
    }

    /// Like [`set`](Self::set), rejecting an empty value.
    pub fn set_checked(&self, value: Option<V>, context: impl fmt::Display) -> Result<bool, InferError> {
        match value {
            Some(value) => Ok(self.set(value)),
            None => Err(InferError::EmptyResult(context.to_string())),
        }
    }

    pub fn try_get(&self) -> Option<V> {
        lock(&self.value).clone()
    }

    pub fn has_value(&self) -> bool {
        lock(&self.value).is_some()
    }

    /// Replace the value with `merge(previous, value)`, or store `value` when
    /// the cell is empty. The merge runs under the cell lock.
    pub(crate) fn join_with<F>(&self, value: V, merge: F) -> Result<V, InferError>
    where
        F: FnOnce(&V, &V) -> Result<V, InferError>,
    {
        let mut slot = lock(&self.value);
        let next = match slot.as_ref() {
            Some(previous) => merge(previous, &value)?,
            None => value,
        };
        *slot = Some(next.clone());
        Ok(next)
    }

    /// Wait for the value on behalf of `worker`.
    ///
    /// Returns immediately when the value is present; otherwise parks the
    /// worker on a fresh [`PendingTask`] until the scheduler wakes it.
    pub fn get_result(self: &Arc<Self>, worker: &WorkerContext) -> Result<V, InferError> {
        worker.schedule().fatal().check()?;
        if let Some(value) = self.try_get() {
            return Ok(value);
        }
        let task = PendingTask::make_shared(Arc::clone(self), worker.id().clone());
        task.get_result(worker)
    }
}

impl<V: fmt::Display> fmt::Display for AsyncResult<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match lock(&self.value).as_ref() {
            Some(value) => write!(f, "{}", value),
            None => write!(f, "NOT SET"),
        }
    }
}

impl<V: fmt::Display> fmt::Debug for AsyncResult<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncResult({})", self)
    }
}
