use crate::{events::EventEmitter, Props, SharedError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A unit of work run by a leaf flow.
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> &str;

    /// Run the job to completion with the merged input properties.
    async fn run(&self, ctx: JobContext) -> Result<(), SharedError>;

    /// Properties produced by the last successful run.
    fn generated_properties(&self) -> Props {
        Props::new()
    }
}

pub type JobRef = Arc<dyn Job>;

/// Resolves job names into runnable jobs at execution time.
#[async_trait]
pub trait JobManager: Send + Sync {
    /// `strict` rejects jobs whose definition cannot be fully honoured instead
    /// of falling back to defaults.
    async fn load_job(&self, name: &str, overrides: &Props, strict: bool)
        -> Result<JobRef, SharedError>;
}

/// Everything a job sees while it runs.
#[derive(Clone)]
pub struct JobContext {
    /// Input properties merged from the flow's defaults and its parent.
    pub inputs: Props,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Triggered when the owning flow is cancelled. Honouring it is up to the job.
    pub cancellation: CancellationToken,
}

impl JobContext {
    pub fn new(inputs: Props, events: EventEmitter) -> Self {
        Self {
            inputs,
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
