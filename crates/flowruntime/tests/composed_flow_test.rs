// crates/flowruntime/tests/composed_flow_test.rs

use chrono::{DateTime, Utc};
use flowcore::{
    CallbackRef, ExecutableFlow, FlowCallback, FlowError, FlowRef, FnCallback, Props, Result,
    SharedError, Status,
};
use flowruntime::ComposedFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

/// Child flow whose completion is either immediate or driven by the test.
struct MockFlow {
    name: String,
    outcome: Option<Status>,
    generated: Props,
    error: SharedError,
    log: Log,
    state: Mutex<MockState>,
}

struct MockState {
    status: Status,
    callbacks: Vec<CallbackRef>,
    received: Option<Props>,
    executions: usize,
    resets: usize,
    exception: Option<SharedError>,
}

impl MockFlow {
    fn new(name: &str, outcome: Option<Status>, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            outcome,
            generated: Props::new(),
            error: Arc::new(FlowError::job(name, "mock failure")),
            log: Arc::clone(log),
            state: Mutex::new(MockState {
                status: Status::Ready,
                callbacks: Vec::new(),
                received: None,
                executions: 0,
                resets: 0,
                exception: None,
            }),
        })
    }

    fn generating(name: &str, generated: Props, log: &Log) -> Arc<Self> {
        let mut flow = Arc::into_inner(Self::new(name, Some(Status::Succeeded), log)).unwrap();
        flow.generated = generated;
        Arc::new(flow)
    }

    fn finish(&self, status: Status) {
        let callbacks = {
            let mut state = self.state.lock().unwrap();
            state.status = status;
            if status == Status::Failed && state.exception.is_none() {
                state.exception = Some(Arc::clone(&self.error));
            }
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback.completed(status);
        }
    }

    fn report_progress(&self) {
        let callbacks = self.state.lock().unwrap().callbacks.clone();
        for callback in callbacks {
            callback.progress_made();
        }
    }

    fn executions(&self) -> usize {
        self.state.lock().unwrap().executions
    }

    fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    fn received(&self) -> Option<Props> {
        self.state.lock().unwrap().received.clone()
    }
}

impl ExecutableFlow for MockFlow {
    fn id(&self) -> &str {
        &self.name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, callback: CallbackRef, props: Option<Props>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            match state.status {
                Status::Running => {
                    state.callbacks.push(callback);
                    return Ok(());
                }
                Status::Succeeded | Status::Failed => {
                    return Err(FlowError::AlreadyCompleted {
                        flow: self.name.clone(),
                        status: state.status,
                    });
                }
                Status::Ready => {}
            }
            state.status = Status::Running;
            state.executions += 1;
            state.received = props;
            state.callbacks.push(callback);
        }
        self.log.lock().unwrap().push(self.name.clone());

        if let Some(status) = self.outcome {
            self.finish(status);
        }
        Ok(())
    }

    fn cancel(&self) -> bool {
        let status = self.state.lock().unwrap().status;
        match status {
            Status::Ready | Status::Running => {
                self.state.lock().unwrap().exception =
                    Some(Arc::new(FlowError::cancelled(&self.name)));
                self.finish(Status::Failed);
                true
            }
            Status::Succeeded | Status::Failed => false,
        }
    }

    fn reset(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.status == Status::Running {
            return false;
        }
        state.status = Status::Ready;
        state.exception = None;
        state.resets += 1;
        true
    }

    fn mark_completed(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.status {
            Status::Ready | Status::Succeeded => {
                state.status = Status::Succeeded;
                true
            }
            Status::Running | Status::Failed => false,
        }
    }

    fn status(&self) -> Status {
        self.state.lock().unwrap().status
    }

    fn exception(&self) -> Option<SharedError> {
        let state = self.state.lock().unwrap();
        match state.status {
            Status::Failed => state.exception.clone(),
            _ => None,
        }
    }

    fn flow_generated_properties(&self) -> Option<Props> {
        match self.status() {
            Status::Succeeded => Some(self.generated.clone()),
            _ => None,
        }
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn children(&self) -> Vec<FlowRef> {
        Vec::new()
    }
}

fn recorder() -> (CallbackRef, Arc<Mutex<Vec<Status>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback = FnCallback::shared(move |status| sink.lock().unwrap().push(status));
    (callback, seen)
}

fn compose(dependee: &Arc<MockFlow>, depender: &Arc<MockFlow>) -> ComposedFlow {
    let dependee: FlowRef = Arc::clone(dependee) as FlowRef;
    let depender: FlowRef = Arc::clone(depender) as FlowRef;
    ComposedFlow::new("1.composed", dependee, depender)
}

#[test]
fn test_dependee_runs_before_depender() {
    let log = Log::default();
    let dependee = MockFlow::generating("extract", Props::new().with("rows", "42"), &log);
    let depender = MockFlow::generating("report", Props::new().with("pages", "3"), &log);
    let flow = compose(&dependee, &depender);

    assert_eq!(flow.name(), "report");
    assert_eq!(flow.status(), Status::Ready);

    let (callback, seen) = recorder();
    flow.execute(callback, Some(Props::new().with("date", "2024-01-01"))).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![Status::Succeeded]);
    assert_eq!(*log.lock().unwrap(), vec!["extract".to_string(), "report".to_string()]);
    assert_eq!(flow.status(), Status::Succeeded);
    assert!(flow.exception().is_none());

    let dependee_input = dependee.received().unwrap();
    assert_eq!(dependee_input.get("date"), Some("2024-01-01"));

    let depender_input = depender.received().unwrap();
    assert_eq!(depender_input.get("date"), Some("2024-01-01"));
    assert_eq!(depender_input.get("rows"), Some("42"));
    assert_eq!(depender_input.source_of("rows"), Some("extract"));

    let generated = flow.flow_generated_properties().unwrap();
    assert_eq!(generated.get("rows"), Some("42"));
    assert_eq!(generated.get("pages"), Some("3"));
    assert_eq!(generated.source_of("pages"), Some("report"));
    assert_eq!(generated.from_source("extract").len(), 1);
}

#[test]
fn test_dependee_failure_skips_depender() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", Some(Status::Failed), &log);
    let depender = MockFlow::new("report", Some(Status::Succeeded), &log);
    let flow = compose(&dependee, &depender);

    let (callback, seen) = recorder();
    flow.execute(callback, None).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![Status::Failed]);
    assert_eq!(depender.executions(), 0);
    assert!(Arc::ptr_eq(&flow.exception().unwrap(), &dependee.exception().unwrap()));
    assert!(flow.flow_generated_properties().is_none());
}

#[test]
fn test_depender_failure_fails_composition() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", Some(Status::Succeeded), &log);
    let depender = MockFlow::new("report", Some(Status::Failed), &log);
    let flow = compose(&dependee, &depender);

    let (callback, seen) = recorder();
    flow.execute(callback, None).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![Status::Failed]);
    assert!(Arc::ptr_eq(&flow.exception().unwrap(), &depender.error));
}

#[test]
fn test_callbacks_join_running_composition() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", None, &log);
    let depender = MockFlow::new("report", None, &log);
    let flow = compose(&dependee, &depender);

    let (first, first_seen) = recorder();
    let (second, second_seen) = recorder();
    flow.execute(first, None).unwrap();
    flow.execute(second, None).unwrap();
    assert_eq!(flow.status(), Status::Running);
    assert_eq!(dependee.executions(), 1);

    dependee.finish(Status::Succeeded);
    assert_eq!(depender.executions(), 1);
    assert_eq!(flow.status(), Status::Running);

    depender.finish(Status::Succeeded);
    assert_eq!(*first_seen.lock().unwrap(), vec![Status::Succeeded]);
    assert_eq!(*second_seen.lock().unwrap(), vec![Status::Succeeded]);
}

struct ProgressCounter {
    progress: AtomicUsize,
}

impl FlowCallback for ProgressCounter {
    fn progress_made(&self) {
        self.progress.fetch_add(1, Ordering::SeqCst);
    }

    fn completed(&self, _status: Status) {}
}

#[test]
fn test_progress_is_forwarded() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", None, &log);
    let depender = MockFlow::new("report", None, &log);
    let flow = compose(&dependee, &depender);

    let counter = Arc::new(ProgressCounter {
        progress: AtomicUsize::new(0),
    });
    flow.execute(Arc::clone(&counter) as CallbackRef, None).unwrap();

    dependee.report_progress();
    dependee.finish(Status::Succeeded);
    depender.report_progress();

    assert_eq!(counter.progress.load(Ordering::SeqCst), 2);
}

#[test]
fn test_callback_may_reenter_the_flow() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", Some(Status::Succeeded), &log);
    let depender = MockFlow::new("report", Some(Status::Succeeded), &log);
    let flow = Arc::new(compose(&dependee, &depender));

    let rejected = Arc::new(AtomicUsize::new(0));
    let reentrant = {
        let flow = Arc::clone(&flow);
        let rejected = Arc::clone(&rejected);
        FnCallback::shared(move |_| {
            let (noop, _) = recorder();
            if flow.execute(noop, None).is_err() {
                rejected.fetch_add(1, Ordering::SeqCst);
            }
            assert_eq!(flow.status(), Status::Succeeded);
        })
    };
    flow.execute(reentrant, None).unwrap();

    assert_eq!(rejected.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reset_keeps_succeeded_dependee() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", Some(Status::Succeeded), &log);
    let depender = MockFlow::new("report", Some(Status::Failed), &log);
    let flow = compose(&dependee, &depender);

    let (callback, _) = recorder();
    flow.execute(callback, None).unwrap();
    assert_eq!(flow.status(), Status::Failed);

    assert!(flow.reset());
    assert_eq!(flow.status(), Status::Ready);
    assert!(flow.exception().is_none());
    assert_eq!(depender.resets(), 1);
    assert_eq!(dependee.resets(), 0);
    assert_eq!(dependee.status(), Status::Succeeded);

    let (callback, seen) = recorder();
    flow.execute(callback, None).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Status::Failed]);
    assert_eq!(dependee.executions(), 1, "a succeeded dependee is reused");
    assert_eq!(depender.executions(), 2);
}

#[test]
fn test_reset_retries_failed_dependee() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", Some(Status::Failed), &log);
    let depender = MockFlow::new("report", Some(Status::Succeeded), &log);
    let flow = compose(&dependee, &depender);

    let (callback, _) = recorder();
    flow.execute(callback, None).unwrap();
    assert!(flow.reset());
    assert_eq!(dependee.resets(), 1);
    assert_eq!(dependee.status(), Status::Ready);

    let (callback, _) = recorder();
    flow.execute(callback, None).unwrap();
    assert_eq!(dependee.executions(), 2);
}

#[test]
fn test_reset_while_running_is_refused() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", None, &log);
    let depender = MockFlow::new("report", Some(Status::Succeeded), &log);
    let flow = compose(&dependee, &depender);

    let (callback, seen) = recorder();
    flow.execute(callback, None).unwrap();
    assert!(!flow.reset());
    assert_eq!(flow.status(), Status::Running);

    dependee.finish(Status::Succeeded);
    assert_eq!(*seen.lock().unwrap(), vec![Status::Succeeded]);
}

#[test]
fn test_cancel_reaches_running_dependee() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", None, &log);
    let depender = MockFlow::new("report", Some(Status::Succeeded), &log);
    let flow = compose(&dependee, &depender);

    let (callback, seen) = recorder();
    flow.execute(callback, None).unwrap();

    assert!(flow.cancel());
    assert_eq!(*seen.lock().unwrap(), vec![Status::Failed]);
    assert_eq!(dependee.status(), Status::Failed);
    assert_eq!(depender.executions(), 0);
    assert!(flow.exception().unwrap().is_cancellation());
    assert!(flow.cancel());
}

#[test]
fn test_cancel_reaches_running_depender() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", Some(Status::Succeeded), &log);
    let depender = MockFlow::new("report", None, &log);
    let flow = compose(&dependee, &depender);

    let (callback, seen) = recorder();
    flow.execute(callback, None).unwrap();
    assert_eq!(depender.status(), Status::Running);

    assert!(flow.cancel());
    assert_eq!(*seen.lock().unwrap(), vec![Status::Failed]);
    assert_eq!(depender.status(), Status::Failed);
    assert_eq!(dependee.status(), Status::Succeeded);
}

#[test]
fn test_cancel_ready_and_succeeded() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", Some(Status::Succeeded), &log);
    let depender = MockFlow::new("report", Some(Status::Succeeded), &log);

    let ready = compose(&dependee, &depender);
    assert!(ready.cancel());
    assert_eq!(ready.status(), Status::Failed);
    assert_eq!(dependee.executions(), 0);

    let done = compose(&dependee, &depender);
    let (callback, _) = recorder();
    done.execute(callback, None).unwrap();
    assert_eq!(done.status(), Status::Succeeded);
    assert!(!done.cancel());
}

#[test]
fn test_shared_dependee_runs_once() {
    let log = Log::default();
    let shared = MockFlow::generating("extract", Props::new().with("rows", "42"), &log);
    let left = MockFlow::new("left", Some(Status::Succeeded), &log);
    let right = MockFlow::new("right", Some(Status::Succeeded), &log);
    let first = compose(&shared, &left);
    let second = compose(&shared, &right);

    let (callback, _) = recorder();
    first.execute(callback, None).unwrap();
    let (callback, seen) = recorder();
    second.execute(callback, None).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![Status::Succeeded]);
    assert_eq!(shared.executions(), 1);
    assert_eq!(right.received().unwrap().get("rows"), Some("42"));
}

#[test]
fn test_children_and_terminal_depender() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", Some(Status::Succeeded), &log);
    let depender = MockFlow::new("report", Some(Status::Succeeded), &log);
    assert!(depender.mark_completed());

    let flow = compose(&dependee, &depender);

    assert!(flow.has_children());
    let children = flow.children();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name(), "extract");
    assert_eq!(flow.dependee().name(), "extract");
    assert_eq!(flow.depender().name(), "report");
    assert_eq!(flow.status(), Status::Succeeded, "adopts a finished depender");
}

#[test]
fn test_mark_completed_marks_both_stages() {
    let log = Log::default();
    let dependee = MockFlow::new("extract", Some(Status::Succeeded), &log);
    let depender = MockFlow::new("report", Some(Status::Succeeded), &log);
    let flow = compose(&dependee, &depender);

    assert!(flow.mark_completed());
    assert_eq!(flow.status(), Status::Succeeded);
    assert_eq!(dependee.status(), Status::Succeeded);
    assert_eq!(depender.status(), Status::Succeeded);
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_colliding_outputs_are_kept_per_stage() {
    let log = Log::default();
    let dependee = MockFlow::generating("extract", Props::new().with("out", "dependee-value"), &log);
    let depender = MockFlow::generating("report", Props::new().with("out", "depender-value"), &log);
    let flow = compose(&dependee, &depender);

    let (callback, _) = recorder();
    flow.execute(callback, None).unwrap();

    let generated = flow.flow_generated_properties().unwrap();
    assert_eq!(generated.get("out"), Some("depender-value"));
    assert_eq!(generated.source_of("out"), Some("report"));
    assert_eq!(generated.namespaced("extract", "out"), Some("dependee-value"));
    assert_eq!(generated.from_source("extract").get("out"), Some("dependee-value"));
    assert_eq!(generated.from_source("report").get("out"), Some("depender-value"));
}

#[test]
fn test_chained_stages_keep_their_attribution() {
    let log = Log::default();
    let a = MockFlow::generating("a", Props::new().with("a.out", "1"), &log);
    let b = MockFlow::generating("b", Props::new().with("b.out", "2"), &log);
    let c = MockFlow::generating("c", Props::new().with("c.out", "3"), &log);

    let inner: FlowRef = Arc::new(compose(&a, &b));
    let outer = ComposedFlow::new("1.outer", inner, Arc::clone(&c) as FlowRef);

    let (callback, seen) = recorder();
    outer.execute(callback, None).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Status::Succeeded]);
    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);

    let c_input = c.received().unwrap();
    assert_eq!(c_input.source_of("a.out"), Some("a"));
    assert_eq!(c_input.source_of("b.out"), Some("b"));

    let generated = outer.flow_generated_properties().unwrap();
    for (stage, key, value) in [("a", "a.out", "1"), ("b", "b.out", "2"), ("c", "c.out", "3")] {
        assert_eq!(generated.source_of(key), Some(stage));
        assert_eq!(generated.namespaced(stage, key), Some(value));
        assert_eq!(generated.from_source(stage).len(), 1);
    }
}
