use crate::state::{notify, FlowState, NodeLock};
use chrono::{DateTime, Utc};
use flowcore::{
    CallbackRef, EventBus, EventEmitter, ExecutableFlow, FlowError, FlowEvent, FlowRef, JobContext,
    JobManager, JobRef, Props, Result, RunId, SharedError, Status,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Leaf flow: runs exactly one named job on a tokio task.
///
/// The job is resolved through the [`JobManager`] only when the flow runs, so
/// definitions loaded in between two runs are picked up after a reset.
#[derive(Clone)]
pub struct IndividualJobFlow {
    inner: Arc<LeafInner>,
}

struct LeafInner {
    id: String,
    name: String,
    overrides: Props,
    defaults: Props,
    strict: bool,
    job_manager: Arc<dyn JobManager>,
    events: Option<Arc<EventBus>>,
    state: NodeLock<LeafRun>,
}

#[derive(Default)]
struct LeafRun {
    job: Option<JobRef>,
    cancellation: CancellationToken,
}

impl IndividualJobFlow {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        overrides: Props,
        job_manager: Arc<dyn JobManager>,
    ) -> Self {
        Self::builder(id, name, job_manager).overrides(overrides).build()
    }

    pub fn builder(
        id: impl Into<String>,
        name: impl Into<String>,
        job_manager: Arc<dyn JobManager>,
    ) -> IndividualJobFlowBuilder {
        IndividualJobFlowBuilder {
            id: id.into(),
            name: name.into(),
            overrides: Props::new(),
            defaults: Props::new(),
            strict: true,
            job_manager,
            events: None,
        }
    }

    /// The job instance of the current run, once it has been resolved.
    pub fn current_job(&self) -> Option<JobRef> {
        self.inner.state.lock().run.job.clone()
    }
}

pub struct IndividualJobFlowBuilder {
    id: String,
    name: String,
    overrides: Props,
    defaults: Props,
    strict: bool,
    job_manager: Arc<dyn JobManager>,
    events: Option<Arc<EventBus>>,
}

impl IndividualJobFlowBuilder {
    /// Properties handed to the job manager when the job is resolved.
    pub fn overrides(mut self, overrides: Props) -> Self {
        self.overrides = overrides;
        self
    }

    /// Input properties the parent properties are merged over.
    pub fn defaults(mut self, defaults: Props) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn events(mut self, events: Option<Arc<EventBus>>) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> IndividualJobFlow {
        IndividualJobFlow {
            inner: Arc::new(LeafInner {
                id: self.id,
                name: self.name,
                overrides: self.overrides,
                defaults: self.defaults,
                strict: self.strict,
                job_manager: self.job_manager,
                events: self.events,
                state: NodeLock::new(FlowState::new()),
            }),
        }
    }
}

impl LeafInner {
    async fn run(self: Arc<Self>, generation: u64, cancellation: CancellationToken, parent: Props) {
        let run_id = RunId::new_v4();
        let started = Instant::now();
        tracing::info!("Starting job {} (flow {})", self.name, self.id);
        self.emit(FlowEvent::JobStarted {
            run_id,
            flow_id: self.id.clone(),
            job: self.name.clone(),
            timestamp: Utc::now(),
        });

        let outcome = AssertUnwindSafe(self.run_job(generation, cancellation, parent))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Arc::new(FlowError::job(&self.name, "job panicked"))));

        let duration_ms = started.elapsed().as_millis() as u64;
        let (status, callbacks) = {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                tracing::warn!(
                    "Discarding result of job {}: flow was cancelled or reset while it ran",
                    self.name
                );
                return;
            }
            match outcome {
                Ok(generated) => {
                    tracing::info!("Job {} succeeded in {}ms", self.name, duration_ms);
                    self.emit(FlowEvent::JobSucceeded {
                        run_id,
                        flow_id: self.id.clone(),
                        job: self.name.clone(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    (Status::Succeeded, state.succeed(generated))
                }
                Err(error) => {
                    tracing::error!("Job {} failed: {}", self.name, error);
                    self.emit(FlowEvent::JobFailed {
                        run_id,
                        flow_id: self.id.clone(),
                        job: self.name.clone(),
                        error: error.to_string(),
                        timestamp: Utc::now(),
                    });
                    (Status::Failed, state.fail(error))
                }
            }
        };

        notify(callbacks, status);
    }

    async fn run_job(
        &self,
        generation: u64,
        cancellation: CancellationToken,
        parent: Props,
    ) -> std::result::Result<Props, SharedError> {
        let job = self
            .job_manager
            .load_job(&self.name, &self.overrides, self.strict)
            .await?;

        // cancellation checkpoint: nothing has run yet
        {
            let mut state = self.state.lock();
            if !state.is_current(generation) || cancellation.is_cancelled() {
                tracing::info!("Job {} cancelled before it started", self.name);
                return Err(Arc::new(FlowError::cancelled(&self.name)));
            }
            state.run.job = Some(Arc::clone(&job));
        }

        let inputs = self.defaults.merge(&parent);
        tracing::debug!("Running job {} with {} input properties", job.id(), inputs.len());
        let ctx = JobContext::new(inputs.clone(), self.emitter()).with_cancellation(cancellation);
        job.run(ctx).await?;

        Ok(inputs.merge(&job.generated_properties()))
    }

    fn emitter(&self) -> EventEmitter {
        match &self.events {
            Some(bus) => bus.create_emitter(&self.name),
            None => EventEmitter::detached(&self.name),
        }
    }

    fn emit(&self, event: FlowEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }
}

impl ExecutableFlow for IndividualJobFlow {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn execute(&self, callback: CallbackRef, props: Option<Props>) -> Result<()> {
        let mut state = self.inner.state.lock();
        let status = state.status;
        match status {
            Status::Running => {
                tracing::debug!("Flow {} already running, queueing callback", self.inner.name);
                state.callbacks.push(callback);
                return Ok(());
            }
            Status::Succeeded | Status::Failed => {
                tracing::warn!("Refusing to execute completed flow {} ({})", self.inner.name, status);
                return Err(FlowError::AlreadyCompleted {
                    flow: self.inner.name.clone(),
                    status,
                });
            }
            Status::Ready => {}
        }

        let runtime = Handle::try_current().map_err(|_| FlowError::NoRuntime {
            flow: self.inner.name.clone(),
        })?;
        let generation = state.start(callback);
        let cancellation = CancellationToken::new();
        state.run = LeafRun {
            job: None,
            cancellation: cancellation.clone(),
        };
        drop(state);

        let inner = Arc::clone(&self.inner);
        runtime.spawn(inner.run(generation, cancellation, props.unwrap_or_default()));
        Ok(())
    }

    fn cancel(&self) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock();
            let status = state.status;
            match status {
                Status::Ready | Status::Running => {
                    tracing::info!("Cancelling flow {} ({})", self.inner.name, status);
                    state.run.cancellation.cancel();
                    state.fail(Arc::new(FlowError::cancelled(&self.inner.name)))
                }
                Status::Failed => return state.cancelled_already(),
                Status::Succeeded => return false,
            }
        };

        self.inner.emit(FlowEvent::JobCancelled {
            flow_id: self.inner.id.clone(),
            job: self.inner.name.clone(),
            timestamp: Utc::now(),
        });
        notify(callbacks, Status::Failed);
        true
    }

    fn reset(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !state.reset() {
            tracing::warn!("Cannot reset flow {} while it is running", self.inner.name);
            return false;
        }
        tracing::debug!("Flow {} reset", self.inner.name);
        true
    }

    fn mark_completed(&self) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock();
            let status = state.status;
            match status {
                Status::Ready => state.succeed(Props::new()),
                Status::Succeeded => return true,
                Status::Running | Status::Failed => return false,
            }
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
        Vec::new()
    }

    fn has_children(&self) -> bool {
        false
    }
}
