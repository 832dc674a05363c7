//! Flow execution runtime
//!
//! This crate provides the executable flow nodes (single jobs and two-stage
//! dependency compositions), the catalog-backed job manager, work permits and
//! the flow manager that turns a job catalog into runnable graphs.

mod composed;
mod individual;
mod job_manager;
mod manager;
mod permits;
mod registry;
mod runtime;
mod state;

pub use composed::ComposedFlow;
pub use individual::{IndividualJobFlow, IndividualJobFlowBuilder};
pub use job_manager::{CatalogJobManager, PERMIT_PROPERTY};
pub use manager::{validate_catalog, FlowManager};
pub use permits::NamedPermitManager;
pub use registry::{JobFactory, JobTypeMetadata, JobTypeRegistry, PropertyDefinition};
pub use runtime::{FlowRuntime, RuntimeConfig};
