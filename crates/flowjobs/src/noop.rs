use async_trait::async_trait;
use flowcore::{FlowError, Job, JobContext, JobRef, Props, SharedError};
use flowruntime::{JobFactory, JobTypeMetadata};
use std::sync::Arc;

/// Succeeds immediately, publishing its own properties
pub struct NoopJob {
    name: String,
    props: Props,
}

impl NoopJob {
    pub fn new(name: impl Into<String>, props: Props) -> Self {
        Self {
            name: name.into(),
            props,
        }
    }
}

#[async_trait]
impl Job for NoopJob {
    fn id(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: JobContext) -> Result<(), SharedError> {
        Ok(())
    }

    fn generated_properties(&self) -> Props {
        self.props.clone()
    }
}

pub struct NoopJobFactory;

impl JobFactory for NoopJobFactory {
    fn create(&self, name: &str, props: &Props) -> Result<JobRef, FlowError> {
        Ok(Arc::new(NoopJob::new(name, props.clone())))
    }

    fn job_type(&self) -> &str {
        "noop"
    }

    fn metadata(&self) -> JobTypeMetadata {
        JobTypeMetadata {
            description: "Does nothing; generates its own properties".to_string(),
            properties: vec![],
        }
    }
}
