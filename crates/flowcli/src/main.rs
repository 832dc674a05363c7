// crates/flowcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{completion_channel, CatalogSource, FlowEvent, JobCatalog, MessageLevel, Props, Status};
use flowruntime::{validate_catalog, FlowRuntime, JobTypeRegistry, RuntimeConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow job runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more jobs together with their dependencies
    Run {
        /// Job catalog: a JSON file or a directory of JSON files
        #[arg(short, long)]
        catalog: PathBuf,

        /// Override property used instead of what is in the job
        #[arg(short = 'o', long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// Run only the named jobs, treating their dependencies as done
        #[arg(long)]
        ignore_deps: bool,

        /// Number of jobs allowed to run at the same time
        #[arg(long, default_value_t = 10)]
        permits: usize,

        /// Run jobs of unknown types as the fallback type instead of failing them
        #[arg(long)]
        lenient: bool,

        /// Job type used for unknown types with --lenient
        #[arg(long, default_value = "noop", requires = "lenient")]
        fallback_type: String,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Jobs to run
        #[arg(required = true)]
        jobs: Vec<String>,
    },

    /// List the root flows of a catalog
    List {
        #[arg(short, long)]
        catalog: PathBuf,
    },

    /// Validate a catalog
    Validate {
        #[arg(short, long)]
        catalog: PathBuf,
    },

    /// List available job types
    Types,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            catalog,
            overrides,
            ignore_deps,
            permits,
            lenient,
            fallback_type,
            verbose,
            jobs,
        } => {
            init_logging(verbose);
            let overrides = parse_overrides(&overrides)?;
            let config = RuntimeConfig {
                num_work_permits: permits,
                strict_job_loading: !lenient,
                fallback_job_type: fallback_type,
                ..RuntimeConfig::default()
            };
            run_jobs(catalog, overrides, config, ignore_deps, jobs).await?;
        }

        Commands::List { catalog } => {
            list_flows(catalog)?;
        }

        Commands::Validate { catalog } => {
            validate(catalog)?;
        }

        Commands::Types => {
            list_job_types();
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn registry() -> JobTypeRegistry {
    let mut registry = JobTypeRegistry::new();
    flowjobs::register_all(&mut registry);
    registry
}

/// `key=value` pairs; anything else is rejected.
fn parse_overrides(raw: &[String]) -> Result<Props> {
    let mut props = Props::new();
    for entry in raw {
        let pieces: Vec<&str> = entry.split('=').collect();
        if pieces.len() != 2 || pieces[0].is_empty() {
            bail!(
                "Invalid property override: '{}', properties must be in the form key=value",
                entry
            );
        }
        props.put(pieces[0], pieces[1]);
    }
    Ok(props)
}

async fn run_jobs(
    catalog: PathBuf,
    overrides: Props,
    config: RuntimeConfig,
    ignore_deps: bool,
    jobs: Vec<String>,
) -> Result<()> {
    let runtime = FlowRuntime::new(registry(), CatalogSource::Path(catalog.clone()), config)
        .with_context(|| format!("Failed to load catalog {}", catalog.display()))?;
    tracing::debug!(
        "Catalog {} has {} jobs",
        catalog.display(),
        runtime.flows().flow_names().len()
    );

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                FlowEvent::JobStarted { job, .. } => println!("  ⚡ Starting job: {}", job),
                FlowEvent::JobSucceeded { job, duration_ms, .. } => {
                    println!("  ✅ Job {} completed in {}ms", job, duration_ms)
                }
                FlowEvent::JobFailed { job, error, .. } => println!("  ❌ Job {} failed: {}", job, error),
                FlowEvent::JobCancelled { job, .. } => println!("  🛑 Job {} cancelled", job),
                FlowEvent::Message { job, level, message, .. } => match level {
                    MessageLevel::Info => println!("     ℹ️  [{}] {}", job, message),
                    MessageLevel::Warning => println!("     ⚠️  [{}] {}", job, message),
                },
            }
        }
    });

    let total = jobs.len();
    let mut failures = 0;
    let mut running = Vec::new();

    for name in jobs {
        let Some(flow) = runtime.flows().create_executable_flow(&name, &overrides) else {
            println!("Job[{}] is unknown. Not running.", name);
            failures += 1;
            continue;
        };
        println!("Running {}", name);

        if ignore_deps {
            for child in flow.children() {
                child.mark_completed();
            }
        }

        let (callback, completion) = completion_channel();
        if let Err(e) = flow.execute(callback, None) {
            println!("Failed to run job '{}': {}", name, e);
            failures += 1;
            continue;
        }
        running.push((name, flow, completion));
    }

    for (name, flow, completion) in running {
        match completion.await {
            Ok(Status::Succeeded) => println!("✨ Job {} succeeded", name),
            Ok(status) => {
                failures += 1;
                println!("💥 Job {} finished {}.", name, status);
                match flow.exception() {
                    Some(error) => println!("   {}", error),
                    None => println!("   No error was recorded for the failure."),
                }
            }
            Err(_) => {
                failures += 1;
                println!("💥 Job {} never reported completion.", name);
            }
        }
    }

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    if failures > 0 {
        bail!("{} of {} jobs did not succeed", failures, total);
    }
    Ok(())
}

fn list_flows(catalog: PathBuf) -> Result<()> {
    let runtime = FlowRuntime::new(registry(), CatalogSource::Path(catalog), RuntimeConfig::default())?;
    let snapshot = runtime.flows().catalog();

    println!("📦 Root flows:");
    for name in runtime.flows().root_flow_names() {
        match snapshot.find_job(&name) {
            Some(job) if !job.dependencies.is_empty() => {
                println!("  • {} ({}) <- {}", name, job.job_type, job.dependencies.join(", "))
            }
            Some(job) => println!("  • {} ({})", name, job.job_type),
            None => println!("  • {}", name),
        }
    }
    Ok(())
}

fn validate(catalog: PathBuf) -> Result<()> {
    println!("🔍 Validating catalog: {}", catalog.display());

    let jobs = JobCatalog::load(&catalog)?;
    validate_catalog(&jobs)?;

    let registry = registry();
    let unknown: Vec<&str> = jobs
        .jobs
        .iter()
        .filter(|j| !registry.has_type(&j.job_type))
        .map(|j| j.name.as_str())
        .collect();

    println!("✅ Catalog is valid:");
    println!("   Jobs: {}", jobs.jobs.len());
    println!("   Roots: {}", jobs.root_job_names().len());
    if !unknown.is_empty() {
        println!("⚠️  Jobs with unknown types: {}", unknown.join(", "));
    }
    Ok(())
}

fn list_job_types() {
    println!("📦 Available Job Types:");
    println!();

    let registry = registry();
    for job_type in registry.list_job_types() {
        if let Some(metadata) = registry.get_metadata(&job_type) {
            println!("  • {}", job_type);
            println!("    {}", metadata.description);
            for property in metadata.properties {
                let required = if property.required { " (required)" } else { "" };
                println!("      {}{}: {}", property.name, required, property.description);
            }
        } else {
            println!("  • {}", job_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_must_be_key_value() {
        let props = parse_overrides(&["a=1".to_string(), "b.c=two".to_string()]).unwrap();
        assert_eq!(props.get("a"), Some("1"));
        assert_eq!(props.get("b.c"), Some("two"));

        assert!(parse_overrides(&["novalue".to_string()]).is_err());
        assert!(parse_overrides(&["a=b=c".to_string()]).is_err());
        assert!(parse_overrides(&["=x".to_string()]).is_err());
    }
}
