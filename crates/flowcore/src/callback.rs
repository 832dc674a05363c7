use crate::Status;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Receiver of a flow's progress and terminal notifications.
///
/// `completed` is invoked exactly once for every `execute` call the callback
/// was registered with, carrying the terminal status of that run.
pub trait FlowCallback: Send + Sync {
    /// Advisory; may be called any number of times, in no particular order.
    fn progress_made(&self) {}

    fn completed(&self, status: Status);
}

pub type CallbackRef = Arc<dyn FlowCallback>;

/// Wraps a closure as a callback.
pub struct FnCallback<F> {
    on_completed: F,
}

impl<F> FnCallback<F>
where
    F: Fn(Status) + Send + Sync + 'static,
{
    pub fn new(on_completed: F) -> Self {
        Self { on_completed }
    }

    pub fn shared(on_completed: F) -> CallbackRef {
        Arc::new(Self::new(on_completed))
    }
}

impl<F> FlowCallback for FnCallback<F>
where
    F: Fn(Status) + Send + Sync,
{
    fn completed(&self, status: Status) {
        (self.on_completed)(status)
    }
}

/// Callback that fires its closure at most once, even under racing terminal
/// notifications. The shared flag records whether it fired.
pub struct OneCallFlowCallback<F> {
    called: Arc<AtomicBool>,
    on_completed: F,
}

impl<F> OneCallFlowCallback<F>
where
    F: Fn(Status) + Send + Sync + 'static,
{
    pub fn new(called: Arc<AtomicBool>, on_completed: F) -> Self {
        Self {
            called,
            on_completed,
        }
    }

    pub fn shared(called: Arc<AtomicBool>, on_completed: F) -> CallbackRef {
        Arc::new(Self::new(called, on_completed))
    }
}

impl<F> FlowCallback for OneCallFlowCallback<F>
where
    F: Fn(Status) + Send + Sync,
{
    fn completed(&self, status: Status) {
        if self
            .called
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            (self.on_completed)(status);
        } else {
            tracing::warn!("Callback completed more than once (status {}), ignoring", status);
        }
    }
}

/// One-shot completion signal: the returned callback forwards the first
/// terminal status to the receiver and drops every later one.
pub fn completion_channel() -> (CallbackRef, oneshot::Receiver<Status>) {
    let (sender, receiver) = oneshot::channel();
    let callback = ChannelCallback {
        sender: Mutex::new(Some(sender)),
    };
    (Arc::new(callback), receiver)
}

struct ChannelCallback {
    sender: Mutex<Option<oneshot::Sender<Status>>>,
}

impl FlowCallback for ChannelCallback {
    fn completed(&self, status: Status) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(sender) => {
                // receiver may have given up waiting
                let _ = sender.send(status);
            }
            None => tracing::warn!("Completion channel already fired, dropping status {}", status),
        }
    }
}
