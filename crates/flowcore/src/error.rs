use crate::Status;
use std::sync::Arc;
use thiserror::Error;

/// Failure object recorded by a flow node.
///
/// Shared so that a composition reports the very same failure its child
/// produced; compare with [`Arc::ptr_eq`].
pub type SharedError = Arc<FlowError>;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Job '{job}' failed: {message}")]
    Job { job: String, message: String },

    #[error("Unable to resolve job '{job}': {reason}")]
    Resolution { job: String, reason: String },

    #[error("Flow '{flow}' was cancelled")]
    Cancelled { flow: String },

    #[error("Flow '{flow}' already completed with status {status}; reset it before executing again")]
    AlreadyCompleted { flow: String, status: Status },

    #[error("Flow '{flow}' cannot {operation} while {status}")]
    InvalidState {
        flow: String,
        operation: &'static str,
        status: Status,
    },

    #[error("No tokio runtime available to execute flow '{flow}'")]
    NoRuntime { flow: String },

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    pub fn job(job: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::Job {
            job: job.into(),
            message: message.into(),
        }
    }

    pub fn resolution(job: impl Into<String>, reason: impl Into<String>) -> Self {
        FlowError::Resolution {
            job: job.into(),
            reason: reason.into(),
        }
    }

    pub fn cancelled(flow: impl Into<String>) -> Self {
        FlowError::Cancelled { flow: flow.into() }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, FlowError::Cancelled { .. })
    }

    /// Operator misuse of a flow, as opposed to a failure of its work.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            FlowError::AlreadyCompleted { .. } | FlowError::InvalidState { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Duplicate job: {0}")]
    DuplicateJob(String),

    #[error("Job '{job}' depends on unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("Cyclic dependency detected at job '{0}'")]
    CyclicDependency(String),

    #[error("Invalid catalog {path}: {reason}")]
    Invalid { path: String, reason: String },
}
