use crate::{CatalogError, FlowError, Props, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Declared set of jobs and their dependencies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobCatalog {
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

impl JobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job(&mut self, job: JobSpec) {
        self.jobs.push(job);
    }

    pub fn with_job(mut self, job: JobSpec) -> Self {
        self.add_job(job);
        self
    }

    pub fn find_job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn job_names(&self) -> BTreeSet<String> {
        self.jobs.iter().map(|j| j.name.clone()).collect()
    }

    /// Jobs no other job depends on.
    pub fn root_job_names(&self) -> BTreeSet<String> {
        let depended_on: HashSet<&str> = self
            .jobs
            .iter()
            .flat_map(|j| j.dependencies.iter().map(String::as_str))
            .collect();

        self.jobs
            .iter()
            .filter(|j| !depended_on.contains(j.name.as_str()))
            .map(|j| j.name.clone())
            .collect()
    }

    /// Load a catalog from a JSON file, or merge every `*.json` file of a directory.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Self::load_file(path);
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let file = entry?.path();
            if file.extension() == Some("json".as_ref()) {
                files.push(file);
            }
        }
        files.sort();

        let mut catalog = JobCatalog::new();
        for file in files {
            catalog.jobs.extend(Self::load_file(&file)?.jobs);
        }
        Ok(catalog)
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            FlowError::Catalog(CatalogError::Invalid {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        })
    }
}

/// Declaration of a single job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,

    #[serde(rename = "type", default = "default_job_type")]
    pub job_type: String,

    #[serde(default)]
    pub props: BTreeMap<String, String>,

    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_job_type() -> String {
    "command".to_string()
}

impl JobSpec {
    pub fn new(name: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            job_type: job_type.into(),
            props: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn props(&self) -> Props {
        Props::from(self.props.clone())
    }
}

/// Shared, atomically replaceable catalog snapshot.
///
/// Readers get an immutable `Arc<JobCatalog>`; a reload swaps the pointer
/// without disturbing readers holding the previous snapshot.
#[derive(Clone, Default)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<JobCatalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: JobCatalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    pub fn current(&self) -> Arc<JobCatalog> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, catalog: JobCatalog) {
        let catalog = Arc::new(catalog);
        match self.current.write() {
            Ok(mut guard) => *guard = catalog,
            Err(poisoned) => *poisoned.into_inner() = catalog,
        }
    }
}

/// Where a catalog is (re)loaded from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    Path(PathBuf),
    Static(JobCatalog),
}

impl CatalogSource {
    pub fn load(&self) -> Result<JobCatalog> {
        match self {
            CatalogSource::Path(path) => JobCatalog::load(path),
            CatalogSource::Static(catalog) => Ok(catalog.clone()),
        }
    }
}
