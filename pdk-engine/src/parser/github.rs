// GitHub Actions Parser
// Parses workflow YAML and maps it onto the common model; `uses:` references
// are classified into step kinds by the action mapper.

use crate::model::{Job, Pipeline, Provider, ShellHint, Step, StepKind};
use crate::parser::error::{ParseError, ParseResult};
use crate::parser::{graph, PipelineParser};

use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// GitHub Actions workflow parser.
pub struct GitHubParser;

impl PipelineParser for GitHubParser {
    fn name(&self) -> &'static str {
        "github"
    }

    /// A file is a GitHub workflow iff it is YAML and its root carries a
    /// `jobs:` mapping whose entries have `runs-on`.
    fn can_parse(&self, path: &Path, content: &str) -> bool {
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"))
            .unwrap_or(false);
        if !is_yaml {
            return false;
        }
        let Ok(root) = serde_yaml::from_str::<serde_yaml::Value>(content) else {
            return false;
        };
        let Some(jobs) = root.get("jobs").and_then(|j| j.as_mapping()) else {
            return false;
        };
        jobs.values().any(|job| job.get("runs-on").is_some())
    }

    fn parse(&self, content: &str, path: &Path) -> ParseResult<Pipeline> {
        let workflow: Workflow = serde_yaml::from_str(content)
            .map_err(|e| ParseError::from_yaml(&e, content).with_file(path))?;

        let name = workflow.name.unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("workflow")
                .to_string()
        });

        let mut pipeline = Pipeline::new(name, Provider::GitHub);
        pipeline.variables = workflow.env;

        for (id, gh_job) in workflow.jobs {
            let job = map_job(&id, gh_job);
            pipeline.jobs.insert(id, job);
        }

        graph::check_structure(&pipeline).map_err(|e| e.with_file(path))?;
        graph::check_dependencies(&pipeline).map_err(|e| e.with_file(path))?;
        Ok(pipeline)
    }
}

fn map_job(id: &str, gh: GhJob) -> Job {
    let mut job = Job::new(id);
    job.name = gh.name.unwrap_or_else(|| id.to_string());
    job.runs_on = match gh.runs_on {
        Some(RunsOn::Label(label)) => label,
        Some(RunsOn::Labels(labels)) => labels.into_iter().next().unwrap_or_default(),
        None => "ubuntu-latest".to_string(),
    };
    job.depends_on = gh.needs.into_vec();
    job.environment = gh.env;
    job.condition = gh.if_condition;
    job.timeout = gh.timeout_minutes.map(|m| Duration::from_secs(m * 60));
    job.steps = gh.steps.into_iter().map(map_step).collect();
    job
}

fn map_step(gh: GhStep) -> Step {
    let display_name = gh.name.clone().unwrap_or_else(|| match (&gh.uses, &gh.run) {
        (Some(uses), _) => format!("Run {}", uses),
        (None, Some(run)) => {
            let first = run.lines().next().unwrap_or(run);
            format!("Run {}", first)
        }
        (None, None) => "step".to_string(),
    });

    let kind = match (&gh.uses, &gh.run) {
        (Some(uses), _) => ActionMapper::classify(uses),
        (None, Some(_)) => StepKind::Script,
        (None, None) => StepKind::Script,
    };

    let mut step = Step::new(display_name, kind);
    step.id = gh.id;
    step.script = gh.run;
    step.shell = gh
        .shell
        .as_deref()
        .map(ShellHint::from_provider)
        .unwrap_or(ShellHint::Default);
    step.environment = gh.env;
    step.continue_on_error = gh.continue_on_error;
    step.condition = gh.if_condition;
    step.working_directory = gh.working_directory;
    step.timeout = gh.timeout_minutes.map(|m| Duration::from_secs(m * 60));

    step.with = gh
        .with
        .into_iter()
        .map(|(k, v)| (k, yaml_scalar_to_string(&v)))
        .collect();
    if let Some(uses) = gh.uses {
        step.with.insert("uses".to_string(), uses);
    }
    step
}

/// Render a YAML scalar as the string an action would receive.
fn yaml_scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Classifies `uses:` references into step kinds by their prefix.
pub struct ActionMapper;

impl ActionMapper {
    pub fn classify(uses: &str) -> StepKind {
        let repo = uses.split('@').next().unwrap_or(uses);
        match repo {
            r if r.starts_with("actions/checkout") => StepKind::Checkout,
            r if r.starts_with("actions/upload-artifact") => StepKind::UploadArtifact,
            r if r.starts_with("actions/download-artifact") => StepKind::DownloadArtifact,
            r if r.starts_with("actions/setup-dotnet") => StepKind::Dotnet,
            r if r.starts_with("actions/setup-node") => StepKind::Npm,
            r if r.starts_with("actions/setup-python") => StepKind::Python,
            r if r.starts_with("actions/setup-java") => StepKind::Maven,
            r if r.starts_with("gradle/") => StepKind::Gradle,
            r if r.starts_with("docker/") => StepKind::Docker,
            _ => StepKind::Unknown,
        }
    }
}

// =============================================================================
// Provider-shaped intermediate
// =============================================================================

#[derive(Debug, Deserialize)]
struct Workflow {
    name: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    jobs: IndexMap<String, GhJob>,
}

#[derive(Debug, Deserialize)]
struct GhJob {
    name: Option<String>,
    #[serde(default)]
    needs: Needs,
    #[serde(rename = "runs-on")]
    runs_on: Option<RunsOn>,
    #[serde(rename = "if")]
    if_condition: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    steps: Vec<GhStep>,
    #[serde(rename = "timeout-minutes")]
    timeout_minutes: Option<u64>,
}

/// `needs:` accepts a single identifier or a list.
#[derive(Debug, Deserialize, Default)]
#[serde(untagged)]
enum Needs {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl Needs {
    fn into_vec(self) -> Vec<String> {
        match self {
            Needs::None => vec![],
            Needs::Single(s) => vec![s],
            Needs::Multiple(v) => v,
        }
    }
}

/// `runs-on:` accepts a label or a list of labels.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RunsOn {
    Label(String),
    Labels(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct GhStep {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "if")]
    if_condition: Option<String>,
    run: Option<String>,
    shell: Option<String>,
    #[serde(rename = "working-directory")]
    working_directory: Option<String>,
    uses: Option<String>,
    #[serde(default)]
    with: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(rename = "continue-on-error", default)]
    continue_on_error: bool,
    #[serde(rename = "timeout-minutes")]
    timeout_minutes: Option<u64>,
}
