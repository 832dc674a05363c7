//! Lock-protected bookkeeping shared by both flow kinds.

use chrono::{DateTime, Utc};
use flowcore::{CallbackRef, Props, SharedError, Status};
use std::sync::{Mutex, MutexGuard};

/// Mutable state of one flow node. Only ever touched through [`NodeLock`].
pub(crate) struct FlowState<R> {
    pub status: Status,
    pub exception: Option<SharedError>,
    pub start_time: Option<DateTime<Utc>>,
    pub generated: Option<Props>,
    pub callbacks: Vec<CallbackRef>,
    /// Bumped on every start and reset; continuations of older runs compare
    /// against it and drop their results.
    pub generation: u64,
    /// Per-kind data of the current run, discarded on reset.
    pub run: R,
}

impl<R: Default> FlowState<R> {
    pub fn new() -> Self {
        Self {
            status: Status::Ready,
            exception: None,
            start_time: None,
            generated: None,
            callbacks: Vec::new(),
            generation: 0,
            run: R::default(),
        }
    }

    /// READY -> RUNNING with `callback` as the first registration.
    pub fn start(&mut self, callback: CallbackRef) -> u64 {
        self.status = Status::Running;
        self.start_time = Some(Utc::now());
        self.generation += 1;
        self.callbacks.push(callback);
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.status == Status::Running
    }

    pub fn succeed(&mut self, generated: Props) -> Vec<CallbackRef> {
        self.status = Status::Succeeded;
        self.exception = None;
        self.generated = Some(generated);
        std::mem::take(&mut self.callbacks)
    }

    pub fn fail(&mut self, error: SharedError) -> Vec<CallbackRef> {
        self.status = Status::Failed;
        self.exception = Some(error);
        self.generated = None;
        std::mem::take(&mut self.callbacks)
    }

    pub fn reset(&mut self) -> bool {
        if self.status == Status::Running {
            return false;
        }
        self.status = Status::Ready;
        self.exception = None;
        self.start_time = None;
        self.generated = None;
        self.callbacks.clear();
        self.generation += 1;
        self.run = R::default();
        true
    }

    pub fn cancelled_already(&self) -> bool {
        self.status == Status::Failed
            && self
                .exception
                .as_ref()
                .is_some_and(|e| e.is_cancellation())
    }
}

pub(crate) struct NodeLock<R> {
    state: Mutex<FlowState<R>>,
}

impl<R: Default> NodeLock<R> {
    pub fn new(state: FlowState<R>) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// A panicking callback never runs under the lock, so a poisoned state is
    /// still consistent.
    pub fn lock(&self) -> MutexGuard<'_, FlowState<R>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Deliver a terminal status. Must be called without holding the node lock.
pub(crate) fn notify(callbacks: Vec<CallbackRef>, status: Status) {
    for callback in callbacks {
        callback.completed(status);
    }
}
