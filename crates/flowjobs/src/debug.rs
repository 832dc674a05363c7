use async_trait::async_trait;
use flowcore::{FlowError, Job, JobContext, JobRef, Props, SharedError};
use flowruntime::{JobFactory, JobTypeMetadata};
use std::sync::{Arc, Mutex};

/// Logs its inputs and passes them through
pub struct DebugJob {
    name: String,
    seen: Mutex<Props>,
}

impl DebugJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seen: Mutex::new(Props::new()),
        }
    }
}

#[async_trait]
impl Job for DebugJob {
    fn id(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: JobContext) -> Result<(), SharedError> {
        ctx.events.info(format!("DEBUG: {} input properties", ctx.inputs.len()));
        for (key, value) in ctx.inputs.iter() {
            tracing::info!("[{}] {} = {}", self.name, key, value);
            ctx.events.info(format!("  {}: {}", key, value));
        }

        match self.seen.lock() {
            Ok(mut seen) => *seen = ctx.inputs,
            Err(poisoned) => *poisoned.into_inner() = ctx.inputs,
        }
        Ok(())
    }

    fn generated_properties(&self) -> Props {
        match self.seen.lock() {
            Ok(seen) => seen.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub struct DebugJobFactory;

impl JobFactory for DebugJobFactory {
    fn create(&self, name: &str, _props: &Props) -> Result<JobRef, FlowError> {
        Ok(Arc::new(DebugJob::new(name)))
    }

    fn job_type(&self) -> &str {
        "debug"
    }

    fn metadata(&self) -> JobTypeMetadata {
        JobTypeMetadata {
            description: "Logs input properties for debugging".to_string(),
            properties: vec![],
        }
    }
}
