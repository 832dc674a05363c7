use crate::state::{notify, FlowState, NodeLock};
use chrono::{DateTime, Utc};
use flowcore::{
    CallbackRef, ExecutableFlow, FlowCallback, FlowError, FlowRef, Props, Result, SharedError,
    Status,
};
use std::sync::Arc;

/// Two-stage dependency composition: runs the dependee and, only once it
/// succeeded, the depender with the dependee's generated properties.
///
/// Only the dependee is exposed through [`ExecutableFlow::children`]; the
/// depender is the job this composition stands for.
#[derive(Clone)]
pub struct ComposedFlow {
    inner: Arc<ComposedInner>,
}

struct ComposedInner {
    id: String,
    name: String,
    dependee: FlowRef,
    depender: FlowRef,
    state: NodeLock<Stage>,
}

/// Sub-flow the current run is waiting on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Stage {
    #[default]
    Idle,
    Dependee,
    Depender,
}

impl ComposedFlow {
    /// The composition takes the depender's name. A depender that already
    /// finished makes the composition start out finished too.
    pub fn new(id: impl Into<String>, dependee: FlowRef, depender: FlowRef) -> Self {
        let mut state = FlowState::new();
        state.start_time = dependee.start_time();
        match depender.status() {
            Status::Succeeded => {
                state.status = Status::Succeeded;
                state.generated = Some(depender.flow_generated_properties().unwrap_or_default());
            }
            Status::Failed => {
                if let Some(error) = depender.exception() {
                    state.status = Status::Failed;
                    state.exception = Some(error);
                }
            }
            Status::Ready | Status::Running => {}
        }

        Self {
            inner: Arc::new(ComposedInner {
                id: id.into(),
                name: depender.name().to_string(),
                dependee,
                depender,
                state: NodeLock::new(state),
            }),
        }
    }

    pub fn dependee(&self) -> &FlowRef {
        &self.inner.dependee
    }

    pub fn depender(&self) -> &FlowRef {
        &self.inner.depender
    }
}

impl ComposedInner {
    fn start_dependee(self: &Arc<Self>, generation: u64, working: Props) {
        tracing::debug!("Flow {} running dependee {}", self.name, self.dependee.name());
        let continuation = Arc::new(DependeeDone {
            flow: Arc::clone(self),
            generation,
            working: working.clone(),
        });
        let callback: CallbackRef = continuation.clone();
        if let Err(error) = self.dependee.execute(callback, Some(working)) {
            self.child_rejected(generation, &self.dependee, continuation.as_ref(), error);
        }
    }

    fn dependee_completed(self: &Arc<Self>, generation: u64, working: &Props, status: Status) {
        match status {
            Status::Succeeded => {
                let generated = self.dependee.flow_generated_properties().unwrap_or_default();
                let merged = working.merged_from(self.dependee.name(), &generated);
                {
                    let mut state = self.state.lock();
                    if !state.is_current(generation) {
                        tracing::warn!(
                            "Flow {} no longer waits for {}, not starting {}",
                            self.name,
                            self.dependee.name(),
                            self.depender.name()
                        );
                        return;
                    }
                    state.run = Stage::Depender;
                }

                tracing::debug!("Flow {} running depender {}", self.name, self.depender.name());
                let continuation = Arc::new(DependerDone {
                    flow: Arc::clone(self),
                    generation,
                    working: merged.clone(),
                });
                let callback: CallbackRef = continuation.clone();
                if let Err(error) = self.depender.execute(callback, Some(merged)) {
                    self.child_rejected(generation, &self.depender, continuation.as_ref(), error);
                }
            }
            Status::Failed => {
                let error = child_failure(&self.dependee);
                self.finish(generation, Err(error));
            }
            Status::Ready | Status::Running => tracing::warn!(
                "Dependee {} of {} reported non-terminal status {}",
                self.dependee.name(),
                self.name,
                status
            ),
        }
    }

    fn depender_completed(&self, generation: u64, working: &Props, status: Status) {
        match status {
            Status::Succeeded => {
                let generated = self.depender.flow_generated_properties().unwrap_or_default();
                self.finish(
                    generation,
                    Ok(working.merged_from(self.depender.name(), &generated)),
                );
            }
            Status::Failed => {
                let error = child_failure(&self.depender);
                self.finish(generation, Err(error));
            }
            Status::Ready | Status::Running => tracing::warn!(
                "Depender {} of {} reported non-terminal status {}",
                self.depender.name(),
                self.name,
                status
            ),
        }
    }

    /// A child that already finished in this session answers with its result;
    /// anything else it rejects with fails the composition.
    fn child_rejected(
        &self,
        generation: u64,
        child: &FlowRef,
        continuation: &dyn FlowCallback,
        error: FlowError,
    ) {
        match error {
            FlowError::AlreadyCompleted { status, .. } => {
                tracing::debug!("{} already completed with {}, reusing it", child.name(), status);
                continuation.completed(status);
            }
            other => {
                tracing::error!("Flow {} could not start {}: {}", self.name, child.name(), other);
                self.finish(generation, Err(Arc::new(other)));
            }
        }
    }

    fn finish(&self, generation: u64, outcome: std::result::Result<Props, SharedError>) {
        let (status, callbacks) = {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                tracing::warn!("Discarding stale result for flow {}", self.name);
                return;
            }
            state.run = Stage::Idle;
            match outcome {
                Ok(generated) => (Status::Succeeded, state.succeed(generated)),
                Err(error) => {
                    tracing::debug!("Flow {} failed: {}", self.name, error);
                    (Status::Failed, state.fail(error))
                }
            }
        };
        notify(callbacks, status);
    }

    fn forward_progress(&self) {
        let callbacks = self.state.lock().callbacks.clone();
        for callback in callbacks {
            callback.progress_made();
        }
    }
}

fn child_failure(child: &FlowRef) -> SharedError {
    child.exception().unwrap_or_else(|| {
        Arc::new(FlowError::job(
            child.name(),
            "flow failed without recording an error",
        ))
    })
}

struct DependeeDone {
    flow: Arc<ComposedInner>,
    generation: u64,
    working: Props,
}

impl FlowCallback for DependeeDone {
    fn progress_made(&self) {
        self.flow.forward_progress();
    }

    fn completed(&self, status: Status) {
        self.flow
            .dependee_completed(self.generation, &self.working, status);
    }
}

struct DependerDone {
    flow: Arc<ComposedInner>,
    generation: u64,
    working: Props,
}

impl FlowCallback for DependerDone {
    fn progress_made(&self) {
        self.flow.forward_progress();
    }

    fn completed(&self, status: Status) {
        self.flow
            .depender_completed(self.generation, &self.working, status);
    }
}

impl ExecutableFlow for ComposedFlow {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn execute(&self, callback: CallbackRef, props: Option<Props>) -> Result<()> {
        let generation = {
            let mut state = self.inner.state.lock();
            let status = state.status;
            match status {
                Status::Running => {
                    tracing::debug!("Flow {} already running, queueing callback", self.inner.name);
                    state.callbacks.push(callback);
                    return Ok(());
                }
                Status::Succeeded | Status::Failed => {
                    tracing::warn!(
                        "Refusing to execute completed flow {} ({})",
                        self.inner.name,
                        status
                    );
                    return Err(FlowError::AlreadyCompleted {
                        flow: self.inner.name.clone(),
                        status,
                    });
                }
                Status::Ready => {}
            }
            let generation = state.start(callback);
            state.run = Stage::Dependee;
            generation
        };

        self.inner
            .start_dependee(generation, props.unwrap_or_default());
        Ok(())
    }

    fn cancel(&self) -> bool {
        // the active stage can move on while cancellation is forwarded
        for _ in 0..2 {
            let stage = {
                let mut state = self.inner.state.lock();
                let status = state.status;
                match status {
                    Status::Ready => {
                        tracing::info!("Cancelling flow {} before it started", self.inner.name);
                        let callbacks =
                            state.fail(Arc::new(FlowError::cancelled(&self.inner.name)));
                        drop(state);
                        notify(callbacks, Status::Failed);
                        return true;
                    }
                    Status::Succeeded => return false,
                    Status::Failed => return state.cancelled_already(),
                    Status::Running => state.run,
                }
            };

            let child = match stage {
                Stage::Dependee => &self.inner.dependee,
                Stage::Depender => &self.inner.depender,
                Stage::Idle => return false,
            };
            tracing::info!("Cancelling flow {} through {}", self.inner.name, child.name());
            if child.cancel() {
                return true;
            }

            let state = self.inner.state.lock();
            if state.status != Status::Running || state.run == stage {
                return state.cancelled_already();
            }
        }
        false
    }

    fn reset(&self) -> bool {
        if self.inner.state.lock().status == Status::Running {
            tracing::warn!("Cannot reset flow {} while it is running", self.inner.name);
            return false;
        }

        if !self.inner.depender.reset() {
            tracing::warn!(
                "Cannot reset flow {}: depender {} refused",
                self.inner.name,
                self.inner.depender.name()
            );
            return false;
        }
        // a succeeded dependee keeps its output for the next run
        if self.inner.dependee.status() == Status::Failed && !self.inner.dependee.reset() {
            tracing::warn!(
                "Cannot reset flow {}: dependee {} refused",
                self.inner.name,
                self.inner.dependee.name()
            );
            return false;
        }

        let mut state = self.inner.state.lock();
        if !state.reset() {
            return false;
        }
        tracing::debug!("Flow {} reset", self.inner.name);
        true
    }

    fn mark_completed(&self) -> bool {
        match self.status() {
            Status::Succeeded => return true,
            Status::Running | Status::Failed => return false,
            Status::Ready => {}
        }
        if !self.inner.dependee.mark_completed() || !self.inner.depender.mark_completed() {
            return false;
        }

        let generated = self
            .inner
            .depender
            .flow_generated_properties()
            .unwrap_or_default();
        let callbacks = {
            let mut state = self.inner.state.lock();
            let status = state.status;
            if status != Status::Ready {
                return status == Status::Succeeded;
            }
            state.succeed(generated)
        };
        tracing::debug!("Flow {} marked completed", self.inner.name);
        notify(callbacks, Status::Succeeded);
        true
    }

    fn status(&self) -> Status {
        self.inner.state.lock().status
    }

    fn exception(&self) -> Option<SharedError> {
        self.inner.state.lock().exception.clone()
    }

    fn flow_generated_properties(&self) -> Option<Props> {
        self.inner.state.lock().generated.clone()
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().start_time
    }

    fn children(&self) -> Vec<FlowRef> {
        vec![Arc::clone(&self.inner.dependee)]
    }

    fn has_children(&self) -> bool {
        true
    }
}
