use std::fmt;

use thiserror::Error;

/// Errors raised while scheduling or running inference.
///
/// The enum is `Clone` because a single fatal error is broadcast to every
/// blocked worker, and each of them returns its own copy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferError {
    #[error("Empty inference result for {0}")]
    EmptyResult(String),

    #[error("Branches of {config} inferred incompatible results: {previous} and {current}")]
    JoinMismatch {
        config: String,
        previous: String,
        current: String,
    },

    #[error("Inference failed at {location}: {message}")]
    Failed { location: String, message: String },

    #[error(
        "There isn't any branch that can be evaluated (worker {worker}). \
         Please check the code if it has the infinite recursion or loop."
    )]
    NonTermination { worker: String },

    #[error("Woken without a result: {0}")]
    MissingResult(String),

    #[error("No branches to evaluate for {0}")]
    NoBranches(String),

    #[error("Failed to spawn worker {worker}: {message}")]
    Spawn { worker: String, message: String },
}

impl InferError {
    /// Error for an inference rule that could not produce a result.
    pub fn failed(location: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Failed {
            location: location.to_string(),
            message: message.into(),
        }
    }

    pub fn join_mismatch(
        config: impl fmt::Display,
        previous: impl fmt::Display,
        current: impl fmt::Display,
    ) -> Self {
        Self::JoinMismatch {
            config: config.to_string(),
            previous: previous.to_string(),
            current: current.to_string(),
        }
    }

    pub fn is_non_termination(&self) -> bool {
        matches!(self, Self::NonTermination { .. })
    }

    pub fn is_join_mismatch(&self) -> bool {
        matches!(self, Self::JoinMismatch { .. })
    }
}
