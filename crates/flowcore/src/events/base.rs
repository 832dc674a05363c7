use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Identifies one run of a leaf flow.
pub type RunId = Uuid;

/// Lifecycle events published while flows run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    JobStarted {
        run_id: RunId,
        flow_id: String,
        job: String,
        timestamp: DateTime<Utc>,
    },
    JobSucceeded {
        run_id: RunId,
        flow_id: String,
        job: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    JobFailed {
        run_id: RunId,
        flow_id: String,
        job: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    JobCancelled {
        flow_id: String,
        job: String,
        timestamp: DateTime<Utc>,
    },
    Message {
        job: String,
        level: MessageLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLevel {
    Info,
    Warning,
}

/// Event emitter handed to a running job
#[derive(Clone)]
pub struct EventEmitter {
    job: String,
    sender: broadcast::Sender<FlowEvent>,
}

impl EventEmitter {
    pub fn new(job: impl Into<String>, sender: broadcast::Sender<FlowEvent>) -> Self {
        Self {
            job: job.into(),
            sender,
        }
    }

    /// Emitter nobody listens to.
    pub fn detached(job: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(job, sender)
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn emit(&self, event: FlowEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.message(MessageLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.message(MessageLevel::Warning, message.into());
    }

    fn message(&self, level: MessageLevel, message: String) {
        self.emit(FlowEvent::Message {
            job: self.job.clone(),
            level,
            message,
            timestamp: Utc::now(),
        });
    }
}

/// Process-wide event bus
pub struct EventBus {
    sender: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, job: impl Into<String>) -> EventEmitter {
        EventEmitter::new(job, self.sender.clone())
    }
}
