use async_trait::async_trait;
use flowcore::{FlowError, Job, JobContext, JobRef, Props, SharedError};
use flowruntime::{JobFactory, JobTypeMetadata, PropertyDefinition};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::Command;

/// Stdout lines starting with this marker become generated properties.
pub const OUTPUT_MARKER: &str = "::output ";

/// Runs a shell command; inputs are exported as environment variables
pub struct CommandJob {
    name: String,
    command: String,
    props: Props,
    generated: Mutex<Props>,
}

impl CommandJob {
    pub fn new(name: impl Into<String>, command: impl Into<String>, props: Props) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            props,
            generated: Mutex::new(Props::new()),
        }
    }

    fn failure(&self, message: impl Into<String>) -> SharedError {
        Arc::new(FlowError::job(&self.name, message))
    }
}

/// `input.path` -> `INPUT_PATH`
pub fn env_name(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Collect `::output key=value` lines.
pub fn parse_output(stdout: &str) -> Props {
    stdout
        .lines()
        .filter_map(|line| line.trim_end().strip_prefix(OUTPUT_MARKER))
        .filter_map(|assignment| assignment.split_once('='))
        .map(|(key, value)| (key.trim(), value))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

#[async_trait]
impl Job for CommandJob {
    fn id(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: JobContext) -> Result<(), SharedError> {
        ctx.events.info(format!("Running command: {}", self.command));

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in self.props.merge(&ctx.inputs).iter() {
            cmd.env(env_name(key), value);
        }

        let child = cmd
            .spawn()
            .map_err(|e| self.failure(format!("Failed to spawn command: {}", e)))?;

        // dropping the wait future kills the child
        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.map_err(|e| self.failure(format!("Failed to wait for command: {}", e)))?
            }
            _ = ctx.cancellation.cancelled() => {
                ctx.events.warn("Command cancelled, killing it");
                return Err(Arc::new(FlowError::cancelled(&self.name)));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            ctx.events.warn(format!("Command stderr: {}", stderr.trim()));
        }

        if !output.status.success() {
            return Err(self.failure(format!(
                "Command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let generated = parse_output(&stdout);
        tracing::debug!("Command job {} generated {} properties", self.name, generated.len());
        match self.generated.lock() {
            Ok(mut props) => *props = generated,
            Err(poisoned) => *poisoned.into_inner() = generated,
        }
        Ok(())
    }

    fn generated_properties(&self) -> Props {
        match self.generated.lock() {
            Ok(props) => props.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub struct CommandJobFactory;

impl JobFactory for CommandJobFactory {
    fn create(&self, name: &str, props: &Props) -> Result<JobRef, FlowError> {
        let command = props
            .get("command")
            .ok_or_else(|| FlowError::resolution(name, "missing 'command' property"))?;
        Ok(Arc::new(CommandJob::new(name, command, props.clone())))
    }

    fn job_type(&self) -> &str {
        "command"
    }

    fn metadata(&self) -> JobTypeMetadata {
        JobTypeMetadata {
            description: "Run a shell command; `::output key=value` lines become generated properties"
                .to_string(),
            properties: vec![PropertyDefinition {
                name: "command".to_string(),
                description: "Command line passed to `sh -c`".to_string(),
                required: true,
            }],
        }
    }
}
