use flowcore::{FlowError, JobRef, Props};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating job instances of one type
pub trait JobFactory: Send + Sync {
    /// Create a job named `name` configured by `props`
    fn create(&self, name: &str, props: &Props) -> Result<JobRef, FlowError>;

    /// Get job type identifier
    fn job_type(&self) -> &str;

    /// Optional: describe the job type
    fn metadata(&self) -> JobTypeMetadata {
        JobTypeMetadata::default()
    }
}

/// Metadata about a job type
#[derive(Debug, Clone)]
pub struct JobTypeMetadata {
    pub description: String,
    pub properties: Vec<PropertyDefinition>,
}

impl Default for JobTypeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            properties: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// Registry of available job types
#[derive(Default)]
pub struct JobTypeRegistry {
    factories: HashMap<String, Arc<dyn JobFactory>>,
}

impl JobTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job factory, replacing any factory of the same type
    pub fn register(&mut self, factory: Arc<dyn JobFactory>) {
        let job_type = factory.job_type().to_string();
        tracing::info!("Registering job type: {}", job_type);
        self.factories.insert(job_type, factory);
    }

    pub fn has_type(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
    }

    /// Create a job instance of the given type
    pub fn create_job(&self, job_type: &str, name: &str, props: &Props) -> Result<JobRef, FlowError> {
        let factory = self
            .factories
            .get(job_type)
            .ok_or_else(|| FlowError::resolution(name, format!("unknown job type '{}'", job_type)))?;

        factory.create(name, props)
    }

    /// Get all registered job types, sorted
    pub fn list_job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, job_type: &str) -> Option<JobTypeMetadata> {
        self.factories.get(job_type).map(|f| f.metadata())
    }
}
