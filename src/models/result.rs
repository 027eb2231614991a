// Execution results

use std::time::Duration;
use thiserror::Error;

/// Why an invocation did not succeed.
///
/// Cloneable so one result can gate several sibling chain branches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The action returned an error
    #[error("command failed: {0}")]
    Failed(String),

    /// The action did not settle within the callback timeout
    #[error("command timed out after {0:?}")]
    TimedOut(Duration),

    /// The action panicked
    #[error("command panicked: {0}")]
    Panicked(String),

    /// The context failed structural validation; the action never ran
    #[error("invalid command context: {0}")]
    Invalid(String),
}

/// Outcome of one invocation. Produced once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: ExecutionError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl From<std::result::Result<(), ExecutionError>> for ExecutionResult {
    fn from(outcome: std::result::Result<(), ExecutionError>) -> Self {
        match outcome {
            Ok(()) => ExecutionResult::success(),
            Err(error) => ExecutionResult::failure(error),
        }
    }
}
