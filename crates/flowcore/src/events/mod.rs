// crates/flowcore/src/events/mod.rs

mod base;

pub use base::{EventBus, EventEmitter, FlowEvent, MessageLevel, RunId};
