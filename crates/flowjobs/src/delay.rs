use async_trait::async_trait;
use flowcore::{FlowError, Job, JobContext, JobRef, Props, SharedError};
use flowruntime::{JobFactory, JobTypeMetadata, PropertyDefinition};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Delay for a configured duration, ending early when cancelled
pub struct DelayJob {
    name: String,
    delay: Duration,
}

impl DelayJob {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Job for DelayJob {
    fn id(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: JobContext) -> Result<(), SharedError> {
        ctx.events.info(format!("Delaying for {}ms", self.delay.as_millis()));

        tokio::select! {
            _ = sleep(self.delay) => Ok(()),
            _ = ctx.cancellation.cancelled() => Err(Arc::new(FlowError::cancelled(&self.name))),
        }
    }
}

pub struct DelayJobFactory;

impl JobFactory for DelayJobFactory {
    fn create(&self, name: &str, props: &Props) -> Result<JobRef, FlowError> {
        let delay_ms = match props.get("delay_ms") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                FlowError::resolution(name, format!("invalid delay_ms '{}'", raw))
            })?,
            None => DEFAULT_DELAY_MS,
        };
        Ok(Arc::new(DelayJob::new(name, Duration::from_millis(delay_ms))))
    }

    fn job_type(&self) -> &str {
        "delay"
    }

    fn metadata(&self) -> JobTypeMetadata {
        JobTypeMetadata {
            description: "Delay execution for the configured milliseconds".to_string(),
            properties: vec![PropertyDefinition {
                name: "delay_ms".to_string(),
                description: "Milliseconds to wait (default 1000)".to_string(),
                required: false,
            }],
        }
    }
}
