//! Standard job library
//!
//! Collection of built-in job types for the flow runtime

mod command;
mod debug;
mod delay;
mod noop;

pub use command::{env_name, parse_output, CommandJob, CommandJobFactory, OUTPUT_MARKER};
pub use debug::{DebugJob, DebugJobFactory};
pub use delay::{DelayJob, DelayJobFactory};
pub use noop::{NoopJob, NoopJobFactory};
use flowruntime::JobTypeRegistry;

use std::sync::Arc;

/// Register all standard job types with a registry
pub fn register_all(registry: &mut JobTypeRegistry) {
    registry.register(Arc::new(CommandJobFactory));
    registry.register(Arc::new(DebugJobFactory));
    registry.register(Arc::new(DelayJobFactory));
    registry.register(Arc::new(NoopJobFactory));
}
