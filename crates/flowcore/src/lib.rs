//! Core abstractions for the job flow engine
//!
//! This crate provides the vocabulary every other component depends on:
//! the status machine, property sets, callbacks, the executable flow
//! contract and the job collaborator traits. It runs nothing by itself.

mod callback;
mod catalog;
mod error;
pub mod events;
mod flow;
mod job;
mod props;
mod status;

pub use callback::{completion_channel, CallbackRef, FlowCallback, FnCallback, OneCallFlowCallback};
pub use catalog::{CatalogHandle, CatalogSource, JobCatalog, JobSpec};
pub use error::{CatalogError, FlowError, SharedError};
pub use events::*;
pub use flow::{ExecutableFlow, FlowRef};
pub use job::{Job, JobContext, JobManager, JobRef};
pub use props::Props;
pub use status::Status;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
