use crate::permits::NamedPermitManager;
use crate::registry::JobTypeRegistry;
use async_trait::async_trait;
use flowcore::{
    CatalogHandle, FlowError, Job, JobContext, JobManager, JobRef, Props, SharedError,
};
use std::sync::Arc;

/// Property naming the permit pool a job draws from.
pub const PERMIT_PROPERTY: &str = "permit";

/// Resolves jobs from the current catalog snapshot through the job type registry.
pub struct CatalogJobManager {
    catalog: CatalogHandle,
    registry: Arc<JobTypeRegistry>,
    permits: Option<Arc<NamedPermitManager>>,
    default_permit: String,
    fallback_type: String,
}

impl CatalogJobManager {
    pub fn new(catalog: CatalogHandle, registry: Arc<JobTypeRegistry>) -> Self {
        Self {
            catalog,
            registry,
            permits: None,
            default_permit: "default".to_string(),
            fallback_type: "noop".to_string(),
        }
    }

    /// Every job waits for a permit of its pool before it runs.
    pub fn with_permits(mut self, permits: Arc<NamedPermitManager>, default_permit: impl Into<String>) -> Self {
        self.permits = Some(permits);
        self.default_permit = default_permit.into();
        self
    }

    /// Job type used for unknown types when loading is not strict.
    pub fn with_fallback_type(mut self, job_type: impl Into<String>) -> Self {
        self.fallback_type = job_type.into();
        self
    }
}

#[async_trait]
impl JobManager for CatalogJobManager {
    async fn load_job(&self, name: &str, overrides: &Props, strict: bool) -> Result<JobRef, SharedError> {
        let catalog = self.catalog.current();
        let spec = catalog
            .find_job(name)
            .ok_or_else(|| Arc::new(FlowError::resolution(name, "no such job in catalog")))?;

        let props = spec.props().merge(overrides);
        let job_type = if self.registry.has_type(&spec.job_type) {
            spec.job_type.as_str()
        } else if strict {
            return Err(Arc::new(FlowError::resolution(
                name,
                format!("unknown job type '{}'", spec.job_type),
            )));
        } else {
            tracing::warn!(
                "Job {} has unknown type '{}', falling back to '{}'",
                name,
                spec.job_type,
                self.fallback_type
            );
            self.fallback_type.as_str()
        };

        let job = self.registry.create_job(job_type, name, &props).map_err(Arc::new)?;
        tracing::debug!("Loaded job {} of type {}", name, job_type);

        match &self.permits {
            Some(permits) => {
                let permit = props
                    .get(PERMIT_PROPERTY)
                    .unwrap_or(self.default_permit.as_str())
                    .to_string();
                Ok(Arc::new(PermitJob {
                    inner: job,
                    permits: Arc::clone(permits),
                    permit,
                }))
            }
            None => Ok(job),
        }
    }
}

/// Holds a work permit for the whole run of the wrapped job.
struct PermitJob {
    inner: JobRef,
    permits: Arc<NamedPermitManager>,
    permit: String,
}

#[async_trait]
impl Job for PermitJob {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn run(&self, ctx: JobContext) -> Result<(), SharedError> {
        let _permit = tokio::select! {
            permit = self.permits.acquire(&self.permit) => permit?,
            _ = ctx.cancellation.cancelled() => {
                return Err(Arc::new(FlowError::cancelled(self.inner.id())));
            }
        };
        tracing::debug!("Job {} acquired a '{}' permit", self.inner.id(), self.permit);
        self.inner.run(ctx).await
    }

    fn generated_properties(&self) -> Props {
        self.inner.generated_properties()
    }
}
