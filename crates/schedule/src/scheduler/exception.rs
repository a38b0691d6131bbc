use std::sync::RwLock;

use absint_core::InferError;
use tracing::debug;

/// Process-wide register of the first fatal error of a run.
///
/// Any worker may record an error; every worker polls it on entry to and
/// exit from a blocking wait, so one failure ends the whole run instead of
/// leaving the other workers parked forever.
#[derive(Debug, Default)]
pub struct FatalErrorSink {
    error: RwLock<Option<InferError>>,
}

impl FatalErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` unless an earlier one is already held. Returns whether
    /// this call recorded it.
    pub fn record(&self, error: InferError) -> bool {
        let mut slot = match self.error.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_some() {
            debug!("Fatal error already recorded, dropping: {}", error);
            return false;
        }
        *slot = Some(error);
        true
    }

    pub fn has_exception(&self) -> bool {
        self.last().is_some()
    }

    /// The recorded error, if any.
    pub fn last(&self) -> Option<InferError> {
        match self.error.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-raise the recorded error.
    pub fn check(&self) -> Result<(), InferError> {
        match self.last() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn clear(&self) {
        match self.error.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}
