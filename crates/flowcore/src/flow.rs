use crate::{CallbackRef, Props, Result, SharedError, Status};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Capabilities shared by every node of an execution graph.
///
/// Implementations guard their state with a single per-node lock and never
/// invoke callbacks while holding it.
pub trait ExecutableFlow: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Start (or join) a run of this flow and return immediately.
    ///
    /// While the flow is running the callback is only queued; it fires once
    /// when the in-flight run reaches a terminal state. A flow that already
    /// completed rejects the call with [`crate::FlowError::AlreadyCompleted`]
    /// until it is reset.
    fn execute(&self, callback: CallbackRef, props: Option<Props>) -> Result<()>;

    /// Force the flow to FAILED with a cancellation error. Best effort: work that
    /// already started is asked to stop, never preempted.
    fn cancel(&self) -> bool;

    /// Return a terminal flow to READY. Fails while running.
    fn reset(&self) -> bool;

    /// Treat a READY flow as having succeeded without running it.
    fn mark_completed(&self) -> bool;

    fn status(&self) -> Status;

    /// Present exactly when the status is FAILED.
    fn exception(&self) -> Option<SharedError>;

    fn flow_generated_properties(&self) -> Option<Props>;

    fn start_time(&self) -> Option<DateTime<Utc>>;

    fn children(&self) -> Vec<FlowRef>;

    fn has_children(&self) -> bool {
        !self.children().is_empty()
    }
}

pub type FlowRef = Arc<dyn ExecutableFlow>;
