// Common Pipeline Model
// Provider-independent representation of a parsed CI/CD pipeline

pub mod results;

pub use results::{
    sanitize_name, ArtifactContext, ExecutionContext, ExecutionTarget, JobExecutionResult,
    StepExecutionResult,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The CI/CD provider a pipeline was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    GitHub,
    Azure,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::GitHub => write!(f, "github"),
            Provider::Azure => write!(f, "azure"),
        }
    }
}

/// A parsed pipeline in the common model.
///
/// The provider tag records where the definition came from and never changes
/// after parsing. Jobs preserve their definition order; variable expansion
/// happens at execution time, not here.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Display name of the pipeline
    pub name: String,
    /// Provider the definition was parsed from
    pub provider: Provider,
    /// Jobs keyed by identifier, in definition order
    pub jobs: IndexMap<String, Job>,
    /// Pipeline-level variables
    pub variables: HashMap<String, String>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, provider: Provider) -> Self {
        Self {
            name: name.into(),
            provider,
            jobs: IndexMap::new(),
            variables: HashMap::new(),
        }
    }

    /// Total number of steps across all jobs.
    pub fn step_count(&self) -> usize {
        self.jobs.values().map(|j| j.steps.len()).sum()
    }
}

/// A single job: an ordered step sequence plus scheduling metadata.
#[derive(Debug, Clone)]
pub struct Job {
    /// Identifier, unique within the pipeline
    pub id: String,
    /// Display name
    pub name: String,
    /// Runner selector: a label like `ubuntu-latest`, a raw image, or `host`
    pub runs_on: String,
    /// Ordered steps
    pub steps: Vec<Step>,
    /// Identifiers of jobs that must complete first
    pub depends_on: Vec<String>,
    /// Job-level environment variables
    pub environment: HashMap<String, String>,
    /// Optional condition expression (carried, not evaluated)
    pub condition: Option<String>,
    /// Optional job timeout
    pub timeout: Option<Duration>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            runs_on: String::new(),
            steps: Vec::new(),
            depends_on: Vec::new(),
            environment: HashMap::new(),
            condition: None,
            timeout: None,
        }
    }
}

/// The closed set of step kinds the engine understands.
///
/// Executor lookup is a total function over this enum; adding a kind means
/// adding an executor (or accepting the typed "no executor" error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    Script,
    Bash,
    PowerShell,
    Checkout,
    Dotnet,
    Npm,
    Docker,
    Python,
    Maven,
    Gradle,
    FileOperation,
    UploadArtifact,
    DownloadArtifact,
    Unknown,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Preferred shell for a scripted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellHint {
    /// Platform default (`sh` in containers, `bash`/`cmd.exe` on the host)
    Default,
    Bash,
    Pwsh,
    PowerShell,
}

impl ShellHint {
    /// Parse a provider shell string (`bash`, `pwsh`, `powershell`, ...).
    pub fn from_provider(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "bash" => ShellHint::Bash,
            "pwsh" => ShellHint::Pwsh,
            "powershell" => ShellHint::PowerShell,
            _ => ShellHint::Default,
        }
    }
}

/// The atomic executable unit within a job.
#[derive(Debug, Clone)]
pub struct Step {
    /// Optional identifier for output references
    pub id: Option<String>,
    /// Display name
    pub name: String,
    /// What kind of work this step performs
    pub kind: StepKind,
    /// Inline script payload, if this is a scripted step
    pub script: Option<String>,
    /// Preferred shell for the script payload
    pub shell: ShellHint,
    /// Structured inputs (`with:` / task `inputs:`)
    pub with: HashMap<String, String>,
    /// Step-level environment variables
    pub environment: HashMap<String, String>,
    /// When true, a failure of this step does not stop the job
    pub continue_on_error: bool,
    /// Optional condition expression (carried, not evaluated)
    pub condition: Option<String>,
    /// Optional working-directory override
    pub working_directory: Option<String>,
    /// Optional step timeout override
    pub timeout: Option<Duration>,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind,
            script: None,
            shell: ShellHint::Default,
            with: HashMap::new(),
            environment: HashMap::new(),
            continue_on_error: false,
            condition: None,
            working_directory: None,
            timeout: None,
        }
    }

    /// Whether the step carries any executable payload at all.
    pub fn has_payload(&self) -> bool {
        self.script.is_some()
            || !self.with.is_empty()
            || !matches!(self.kind, StepKind::Script | StepKind::Bash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_step_count() {
        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        let mut job = Job::new("build");
        job.steps.push(Step::new("one", StepKind::Script));
        job.steps.push(Step::new("two", StepKind::Checkout));
        pipeline.jobs.insert(job.id.clone(), job);

        let mut other = Job::new("test");
        other.steps.push(Step::new("three", StepKind::Script));
        pipeline.jobs.insert(other.id.clone(), other);

        assert_eq!(pipeline.step_count(), 3);
    }

    #[test]
    fn test_jobs_preserve_insertion_order() {
        let mut pipeline = Pipeline::new("ci", Provider::Azure);
        for id in ["zeta", "alpha", "mid"] {
            pipeline.jobs.insert(id.to_string(), Job::new(id));
        }
        let order: Vec<&str> = pipeline.jobs.keys().map(|s| s.as_str()).collect();
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_shell_hint_from_provider() {
        assert_eq!(ShellHint::from_provider("bash"), ShellHint::Bash);
        assert_eq!(ShellHint::from_provider("pwsh"), ShellHint::Pwsh);
        assert_eq!(ShellHint::from_provider("PowerShell"), ShellHint::PowerShell);
        assert_eq!(ShellHint::from_provider("fish"), ShellHint::Default);
    }

    #[test]
    fn test_step_has_payload() {
        let mut step = Step::new("run", StepKind::Script);
        assert!(!step.has_payload());
        step.script = Some("echo hi".to_string());
        assert!(step.has_payload());

        let task = Step::new("restore", StepKind::Dotnet);
        assert!(task.has_payload());
    }
}
