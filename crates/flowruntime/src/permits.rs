use flowcore::{FlowError, SharedError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Named pools of work permits bounding how many jobs run at once.
#[derive(Default)]
pub struct NamedPermitManager {
    permits: RwLock<HashMap<String, Arc<Semaphore>>>,
}

impl NamedPermitManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the pool `name` with `count` permits.
    pub fn create_named_permit(&self, name: impl Into<String>, count: usize) {
        let name = name.into();
        tracing::debug!("Creating permit pool {} with {} permits", name, count);
        let semaphore = Arc::new(Semaphore::new(count));
        match self.permits.write() {
            Ok(mut permits) => permits.insert(name, semaphore),
            Err(poisoned) => poisoned.into_inner().insert(name, semaphore),
        };
    }

    fn pool(&self, name: &str) -> Option<Arc<Semaphore>> {
        match self.permits.read() {
            Ok(permits) => permits.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        }
    }

    /// Wait for a permit of pool `name`; it is returned when the guard drops.
    pub async fn acquire(&self, name: &str) -> Result<OwnedSemaphorePermit, SharedError> {
        let pool = self.pool(name).ok_or_else(|| {
            Arc::new(FlowError::resolution(name, "no such permit pool"))
        })?;
        pool.acquire_owned()
            .await
            .map_err(|_| Arc::new(FlowError::resolution(name, "permit pool closed")))
    }

    pub fn available(&self, name: &str) -> Option<usize> {
        self.pool(name).map(|p| p.available_permits())
    }
}
