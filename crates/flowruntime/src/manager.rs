use crate::{ComposedFlow, IndividualJobFlow};
use flowcore::{
    CatalogError, CatalogHandle, CatalogSource, EventBus, FlowRef, JobCatalog, JobManager, Props,
    Result,
};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Builds executable flow graphs from the job catalog.
///
/// The catalog lives behind a [`CatalogHandle`] shared with the job manager;
/// [`FlowManager::reload`] validates a fresh catalog and swaps it in, so flows
/// created before a reload keep running against what they were built from.
pub struct FlowManager {
    source: CatalogSource,
    catalog: CatalogHandle,
    job_manager: Arc<dyn JobManager>,
    events: Option<Arc<EventBus>>,
    strict: bool,
    last_id: AtomicU64,
}

impl FlowManager {
    pub fn new(
        source: CatalogSource,
        catalog: CatalogHandle,
        job_manager: Arc<dyn JobManager>,
        last_id: u64,
    ) -> Result<Self> {
        let manager = Self {
            source,
            catalog,
            job_manager,
            events: None,
            strict: true,
            last_id: AtomicU64::new(last_id),
        };
        manager.reload()?;
        Ok(manager)
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn catalog(&self) -> Arc<JobCatalog> {
        self.catalog.current()
    }

    pub fn has_flow(&self, name: &str) -> bool {
        self.catalog.current().find_job(name).is_some()
    }

    pub fn flow_names(&self) -> BTreeSet<String> {
        self.catalog.current().job_names()
    }

    pub fn root_flow_names(&self) -> BTreeSet<String> {
        self.catalog.current().root_job_names()
    }

    pub fn next_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_max_id(&self) -> u64 {
        self.last_id.load(Ordering::SeqCst)
    }

    /// Load, validate and swap in the catalog. On error the previous catalog stays.
    pub fn reload(&self) -> Result<()> {
        let catalog = self.source.load()?;
        validate_catalog(&catalog)?;
        tracing::info!(
            "Loaded catalog with {} jobs ({} roots)",
            catalog.jobs.len(),
            catalog.root_job_names().len()
        );
        self.catalog.replace(catalog);
        Ok(())
    }

    /// Build a fresh flow graph rooted at `name`, or `None` for an unknown job.
    ///
    /// Jobs are leaves; a job with dependencies becomes a composition whose
    /// dependee chains the dependencies in declared order. A dependency shared
    /// by several jobs is one node, so it runs once per graph.
    pub fn create_executable_flow(&self, name: &str, overrides: &Props) -> Option<FlowRef> {
        let catalog = self.catalog.current();
        if catalog.find_job(name).is_none() {
            tracing::warn!("No flow named {}", name);
            return None;
        }
        let id = self.next_id();
        let mut built = HashMap::new();
        self.build(&catalog, name, overrides, id, &mut built)
    }

    fn build(
        &self,
        catalog: &JobCatalog,
        name: &str,
        overrides: &Props,
        id: u64,
        built: &mut HashMap<String, FlowRef>,
    ) -> Option<FlowRef> {
        if let Some(flow) = built.get(name) {
            return Some(Arc::clone(flow));
        }
        let spec = catalog.find_job(name)?;

        let leaf: FlowRef = Arc::new(
            IndividualJobFlow::builder(format!("{}.{}", id, name), name, Arc::clone(&self.job_manager))
                .overrides(overrides.clone())
                .strict(self.strict)
                .events(self.events.clone())
                .build(),
        );

        let mut dependee: Option<FlowRef> = None;
        for dependency in &spec.dependencies {
            let flow = self.build(catalog, dependency, overrides, id, built)?;
            let chained: FlowRef = match dependee {
                None => flow,
                Some(previous) => Arc::new(ComposedFlow::new(
                    format!("{}.{}+{}", id, previous.name(), dependency),
                    previous,
                    flow,
                )),
            };
            dependee = Some(chained);
        }

        let flow: FlowRef = match dependee {
            None => leaf,
            Some(dependee) => Arc::new(ComposedFlow::new(format!("{}.{}", id, name), dependee, leaf)),
        };
        built.insert(name.to_string(), Arc::clone(&flow));
        Some(flow)
    }
}

/// Reject duplicate jobs, dangling dependencies and cycles.
pub fn validate_catalog(catalog: &JobCatalog) -> std::result::Result<(), CatalogError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index = HashMap::new();

    for job in &catalog.jobs {
        if index.contains_key(job.name.as_str()) {
            return Err(CatalogError::DuplicateJob(job.name.clone()));
        }
        index.insert(job.name.as_str(), graph.add_node(job.name.as_str()));
    }

    for job in &catalog.jobs {
        let to = index[job.name.as_str()];
        for dependency in &job.dependencies {
            let from = index.get(dependency.as_str()).ok_or_else(|| CatalogError::UnknownDependency {
                job: job.name.clone(),
                dependency: dependency.clone(),
            })?;
            graph.add_edge(*from, to, ());
        }
    }

    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| CatalogError::CyclicDependency(graph[cycle.node_id()].to_string()))
}
