use crate::{CatalogJobManager, FlowManager, JobTypeRegistry, NamedPermitManager};
use flowcore::{
    completion_channel, CatalogHandle, CatalogSource, EventBus, FlowError, FlowEvent, FlowRef,
    JobManager, Props, Result, Status,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Main runtime wiring job types, permits, catalog and flows together
pub struct FlowRuntime {
    registry: Arc<JobTypeRegistry>,
    permits: Arc<NamedPermitManager>,
    flows: FlowManager,
    event_bus: Arc<EventBus>,
}

impl FlowRuntime {
    /// Create a runtime over a populated job type registry
    pub fn new(registry: JobTypeRegistry, source: CatalogSource, config: RuntimeConfig) -> Result<Self> {
        let registry = Arc::new(registry);
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        let permits = Arc::new(NamedPermitManager::new());
        permits.create_named_permit(config.default_permit.clone(), config.num_work_permits);

        let catalog = CatalogHandle::default();
        let job_manager: Arc<dyn JobManager> = Arc::new(
            CatalogJobManager::new(catalog.clone(), Arc::clone(&registry))
                .with_permits(Arc::clone(&permits), config.default_permit.clone())
                .with_fallback_type(config.fallback_job_type.clone()),
        );

        let flows = FlowManager::new(source, catalog, job_manager, config.last_flow_id)?
            .with_events(Arc::clone(&event_bus))
            .with_strict(config.strict_job_loading);

        Ok(Self {
            registry,
            permits,
            flows,
            event_bus,
        })
    }

    pub fn registry(&self) -> &Arc<JobTypeRegistry> {
        &self.registry
    }

    pub fn permits(&self) -> &Arc<NamedPermitManager> {
        &self.permits
    }

    pub fn flows(&self) -> &FlowManager {
        &self.flows
    }

    /// Execute `flow` and wait for its terminal status
    pub async fn run(&self, flow: &FlowRef, props: Option<Props>) -> Result<Status> {
        let (callback, completion) = completion_channel();
        flow.execute(callback, props)?;
        completion
            .await
            .map_err(|_| FlowError::job(flow.name(), "flow dropped its callback without completing"))
    }

    /// Build the flow for job `name` and run it to completion
    pub async fn run_flow(&self, name: &str, overrides: &Props) -> Result<Option<(FlowRef, Status)>> {
        let Some(flow) = self.flows.create_executable_flow(name, overrides) else {
            return Ok(None);
        };
        let status = self.run(&flow, None).await?;
        Ok(Some((flow, status)))
    }

    /// Subscribe to flow events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<FlowEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Size of the default permit pool, i.e. how many jobs may run at once.
    pub num_work_permits: usize,
    pub default_permit: String,
    pub event_buffer_size: usize,
    /// Unknown job types fail resolution instead of running as `fallback_job_type`.
    pub strict_job_loading: bool,
    /// Job type standing in for unknown types when loading is not strict.
    pub fallback_job_type: String,
    /// Flow ids continue after this one.
    pub last_flow_id: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_work_permits: 10,
            default_permit: "default".to_string(),
            event_buffer_size: 1000,
            strict_job_loading: true,
            fallback_job_type: "noop".to_string(),
            last_flow_id: 0,
        }
    }
}
