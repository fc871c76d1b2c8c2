// Azure DevOps Parser
// Parses azure-pipelines YAML in its three hierarchy shapes, flattens stages
// into jobs, and normalizes `$(VAR)` references to the canonical `${VAR}`.

use crate::model::{Job, Pipeline, Provider, ShellHint, Step, StepKind};
use crate::parser::error::{ParseError, ParseResult};
use crate::parser::{graph, PipelineParser};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Azure DevOps pipeline parser.
pub struct AzureParser;

static TASK_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"task:\s*[\w.]+@\d").expect("task marker pattern"));

/// `$(NAME)` — Azure's runtime variable syntax. Names may be dotted
/// (`$(Build.SourcesDirectory)`, `$(Agent.OS)`).
static AZURE_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\(([\w.]+)\)").expect("azure variable pattern"));

impl PipelineParser for AzureParser {
    fn name(&self) -> &'static str {
        "azure"
    }

    /// A file is an Azure pipeline iff it carries one of the distinctive
    /// markers: `pool:`, `stages:`, or a `task:` reference with `@version`.
    fn can_parse(&self, _path: &Path, content: &str) -> bool {
        if let Ok(root) = serde_yaml::from_str::<serde_yaml::Value>(content) {
            if root.get("pool").is_some() || root.get("stages").is_some() {
                return true;
            }
        }
        TASK_MARKER.is_match(content)
    }

    fn parse(&self, content: &str, path: &Path) -> ParseResult<Pipeline> {
        let az: AzPipeline = serde_yaml::from_str(content)
            .map_err(|e| ParseError::from_yaml(&e, content).with_file(path))?;

        let pipeline = map_pipeline(az, path).map_err(|e| e.with_file(path))?;
        graph::check_structure(&pipeline).map_err(|e| e.with_file(path))?;
        graph::check_dependencies(&pipeline).map_err(|e| e.with_file(path))?;
        Ok(pipeline)
    }
}

/// Rewrite every `$(NAME)` occurrence to `${NAME}`. This is the single point
/// where provider variable syntax is normalized.
pub fn rewrite_variables(input: &str) -> String {
    AZURE_VAR.replace_all(input, "$${${1}}").into_owned()
}

fn map_pipeline(az: AzPipeline, path: &Path) -> ParseResult<Pipeline> {
    let shapes_used = [!az.stages.is_empty(), !az.jobs.is_empty(), !az.steps.is_empty()]
        .iter()
        .filter(|used| **used)
        .count();
    if shapes_used > 1 {
        return Err(ParseError::new(
            "pipeline must use exactly one hierarchy: stages, jobs, or steps",
        )
        .with_suggestion("move loose jobs/steps under the stages hierarchy"));
    }

    let name = az.name.clone().unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("pipeline")
            .to_string()
    });

    let mut pipeline = Pipeline::new(name, Provider::Azure);
    collect_variables(&az.variables, &mut pipeline.variables);

    let default_pool = az.pool.clone();

    if !az.steps.is_empty() {
        // Simple shape: a single implicit job.
        let mut job = Job::new("job");
        job.name = "Job".to_string();
        job.runs_on = resolve_pool(&[default_pool.as_ref()]);
        job.steps = map_steps(az.steps)?;
        pipeline.jobs.insert(job.id.clone(), job);
        return Ok(pipeline);
    }

    if !az.jobs.is_empty() {
        // Single-stage shape.
        for az_job in az.jobs {
            let job = map_job(az_job, None, default_pool.as_ref(), &HashMap::new())?;
            insert_unique(&mut pipeline, job)?;
        }
        return Ok(pipeline);
    }

    // Multi-stage shape: flatten {stage, job} pairs into `{stage}_{job}`.
    let mut stage_names: Vec<String> = Vec::new();
    let mut stage_jobs: HashMap<String, Vec<String>> = HashMap::new();

    for stage in &az.stages {
        if stage.stage.is_empty() {
            return Err(ParseError::new("stage with missing identifier"));
        }
        if stage_names.contains(&stage.stage) {
            return Err(ParseError::new(format!(
                "duplicate stage identifier '{}'",
                stage.stage
            )));
        }
        stage_names.push(stage.stage.clone());
        let ids = stage
            .jobs
            .iter()
            .filter_map(|j| j.job.clone())
            .collect::<Vec<_>>();
        stage_jobs.insert(stage.stage.clone(), ids);
    }

    for (index, stage) in az.stages.iter().enumerate() {
        // Absent and explicitly-empty dependsOn both mean "after the
        // previous stage", matching the hosted behavior this mirrors.
        let previous_stage = || {
            if index == 0 {
                vec![]
            } else {
                vec![az.stages[index - 1].stage.clone()]
            }
        };
        let depended_stages: Vec<String> = match &stage.depends_on {
            AzDependsOn::Default | AzDependsOn::None => previous_stage(),
            AzDependsOn::Single(s) if s.is_empty() => previous_stage(),
            AzDependsOn::Multiple(v) if v.is_empty() => previous_stage(),
            AzDependsOn::Single(s) => vec![s.clone()],
            AzDependsOn::Multiple(v) => v.clone(),
        };

        for dep in &depended_stages {
            if !stage_names.contains(dep) {
                return Err(ParseError::new(format!(
                    "stage '{}' depends on unknown stage '{}'",
                    stage.stage, dep
                ))
                .with_suggestion(format!("available stages: {}", stage_names.join(", "))));
            }
        }

        let mut stage_env = HashMap::new();
        collect_variables(&stage.variables, &mut stage_env);

        for az_job in stage.jobs.clone() {
            let mut job = map_job(
                az_job,
                Some(stage),
                default_pool.as_ref(),
                &stage_env,
            )?;

            // Same-stage dependencies flatten with the stage prefix; stage
            // dependencies fan out to every job of each depended stage.
            job.depends_on = job
                .depends_on
                .iter()
                .map(|d| format!("{}_{}", stage.stage, d))
                .collect();
            for dep_stage in &depended_stages {
                for dep_job in stage_jobs.get(dep_stage).into_iter().flatten() {
                    let id = format!("{}_{}", dep_stage, dep_job);
                    if !job.depends_on.contains(&id) {
                        job.depends_on.push(id);
                    }
                }
            }

            job.id = format!("{}_{}", stage.stage, job.id);
            insert_unique(&mut pipeline, job)?;
        }
    }

    Ok(pipeline)
}

fn insert_unique(pipeline: &mut Pipeline, job: Job) -> ParseResult<()> {
    if pipeline.jobs.contains_key(&job.id) {
        return Err(ParseError::new(format!(
            "duplicate job identifier '{}'",
            job.id
        )));
    }
    pipeline.jobs.insert(job.id.clone(), job);
    Ok(())
}

fn map_job(
    az: AzJob,
    stage: Option<&AzStage>,
    pipeline_pool: Option<&AzPool>,
    stage_env: &HashMap<String, String>,
) -> ParseResult<Job> {
    let id = az
        .job
        .clone()
        .ok_or_else(|| ParseError::new("job with missing identifier")
            .with_suggestion("add 'job: MyJobName' to identify the job"))?;

    let mut job = Job::new(&id);
    job.name = az.display_name.clone().unwrap_or_else(|| id.clone());
    job.runs_on = resolve_pool(&[
        az.pool.as_ref(),
        stage.and_then(|s| s.pool.as_ref()),
        pipeline_pool,
    ]);
    job.depends_on = match &az.depends_on {
        AzDependsOn::Default | AzDependsOn::None => vec![],
        AzDependsOn::Single(s) => vec![s.clone()],
        AzDependsOn::Multiple(v) => v.clone(),
    };
    job.timeout = az.timeout_in_minutes.map(|m| Duration::from_secs(m * 60));

    // Stage condition AND-combines with the job condition.
    let stage_condition = stage.and_then(|s| s.condition.clone());
    job.condition = match (stage_condition, az.condition.clone()) {
        (Some(sc), Some(jc)) => Some(rewrite_variables(&format!("and({}, {})", sc, jc))),
        (Some(sc), None) => Some(rewrite_variables(&sc)),
        (None, Some(jc)) => Some(rewrite_variables(&jc)),
        (None, None) => None,
    };

    job.environment = stage_env.clone();
    collect_variables(&az.variables, &mut job.environment);

    job.steps = map_steps(az.steps)?;
    Ok(job)
}

/// Pool precedence: first entry wins; `vmImage` wins over `name` within a
/// pool; default is `ubuntu-latest`.
fn resolve_pool(candidates: &[Option<&AzPool>]) -> String {
    for pool in candidates.iter().flatten() {
        match pool {
            AzPool::Name(name) if !name.is_empty() => return name.clone(),
            AzPool::Spec(spec) => {
                if let Some(image) = spec.vm_image.as_ref().filter(|i| !i.is_empty()) {
                    return image.clone();
                }
                if let Some(name) = spec.name.as_ref().filter(|n| !n.is_empty()) {
                    return name.clone();
                }
            }
            _ => {}
        }
    }
    "ubuntu-latest".to_string()
}

fn map_steps(steps: Vec<AzStep>) -> ParseResult<Vec<Step>> {
    steps.into_iter().map(map_step).collect()
}

fn map_step(az: AzStep) -> ParseResult<Step> {
    let (kind, shell, script, working_directory, mut with) = match az.action {
        AzStepAction::Script(s) => (
            StepKind::Script,
            ShellHint::Default,
            Some(s.script),
            s.working_directory,
            HashMap::new(),
        ),
        AzStepAction::Bash(s) => (
            StepKind::Bash,
            ShellHint::Bash,
            Some(s.bash),
            s.working_directory,
            HashMap::new(),
        ),
        AzStepAction::Pwsh(s) => (
            StepKind::PowerShell,
            ShellHint::Pwsh,
            Some(s.pwsh),
            s.working_directory,
            HashMap::new(),
        ),
        AzStepAction::PowerShell(s) => (
            StepKind::PowerShell,
            ShellHint::PowerShell,
            Some(s.powershell),
            s.working_directory,
            HashMap::new(),
        ),
        AzStepAction::Checkout(s) => {
            let mut with = HashMap::new();
            with.insert("repository".to_string(), s.checkout);
            (StepKind::Checkout, ShellHint::Default, None, None, with)
        }
        AzStepAction::Task(task) => {
            let (task_name, version) = match task.task.split_once('@') {
                Some((name, version)) => (name.to_string(), version.to_string()),
                None => (task.task.clone(), String::new()),
            };
            let (kind, shell) = TaskMapper::classify(&task_name);

            let mut with: HashMap<String, String> = task
                .inputs
                .into_iter()
                .map(|(k, v)| (k, rewrite_variables(&yaml_scalar_to_string(&v))))
                .collect();
            with.insert("task".to_string(), task_name);
            if !version.is_empty() {
                with.insert("taskVersion".to_string(), version);
            }

            // Inline script tasks carry their payload in `inputs.script`.
            let script = if matches!(kind, StepKind::Script | StepKind::Bash | StepKind::PowerShell)
                && with.get("targetType").map(String::as_str) != Some("filePath")
            {
                with.remove("script")
            } else {
                None
            };
            let working_directory = with.remove("workingDirectory");
            (kind, shell, script, working_directory, with)
        }
    };

    let display_name = az.display_name.clone().unwrap_or_else(|| {
        with.get("task")
            .cloned()
            .or_else(|| az.name.clone())
            .unwrap_or_else(|| kind.to_string())
    });

    let mut step = Step::new(display_name, kind);
    step.id = az.name;
    step.script = script.map(|s| rewrite_variables(&s));
    step.shell = shell;
    step.with = with;
    step.environment = az
        .env
        .into_iter()
        .map(|(k, v)| (k, rewrite_variables(&v)))
        .collect();
    step.continue_on_error = az.continue_on_error.as_bool();
    step.condition = az.condition.map(|c| rewrite_variables(&c));
    step.working_directory = working_directory.map(|w| rewrite_variables(&w));
    step.timeout = az.timeout_in_minutes.map(|m| Duration::from_secs(m * 60));
    Ok(step)
}

/// Closed mapping from Azure task names to step kinds.
pub struct TaskMapper;

impl TaskMapper {
    pub fn classify(task_name: &str) -> (StepKind, ShellHint) {
        match task_name {
            "DotNetCoreCLI" => (StepKind::Dotnet, ShellHint::Default),
            "PowerShell" => (StepKind::PowerShell, ShellHint::PowerShell),
            "Bash" => (StepKind::Bash, ShellHint::Bash),
            "CmdLine" => (StepKind::Script, ShellHint::Default),
            "Docker" => (StepKind::Docker, ShellHint::Default),
            "Npm" => (StepKind::Npm, ShellHint::Default),
            "Maven" => (StepKind::Maven, ShellHint::Default),
            "Gradle" => (StepKind::Gradle, ShellHint::Default),
            "UsePythonVersion" | "PythonScript" => (StepKind::Python, ShellHint::Default),
            "CopyFiles" | "DeleteFiles" => (StepKind::FileOperation, ShellHint::Default),
            "PublishBuildArtifacts" | "PublishPipelineArtifact" => {
                (StepKind::UploadArtifact, ShellHint::Default)
            }
            "DownloadBuildArtifacts" | "DownloadPipelineArtifact" => {
                (StepKind::DownloadArtifact, ShellHint::Default)
            }
            _ => (StepKind::Unknown, ShellHint::Default),
        }
    }
}

/// Flatten parsed variables into a name→value mapping. Group references are
/// not resolvable locally and are logged and dropped.
fn collect_variables(variables: &[AzVariable], out: &mut HashMap<String, String>) {
    for variable in variables {
        match variable {
            AzVariable::KeyValue { name, value } => {
                out.insert(name.clone(), rewrite_variables(value));
            }
            AzVariable::Group { group } => {
                log::warn!("variable group '{}' cannot be resolved locally; skipping", group);
            }
        }
    }
}

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

// =============================================================================
// Provider-shaped intermediate
// =============================================================================

#[derive(Debug, Deserialize)]
struct AzPipeline {
    name: Option<String>,
    pool: Option<AzPool>,
    #[serde(default, deserialize_with = "deserialize_variables")]
    variables: Vec<AzVariable>,
    #[serde(default)]
    stages: Vec<AzStage>,
    #[serde(default)]
    jobs: Vec<AzJob>,
    #[serde(default)]
    steps: Vec<AzStep>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AzPool {
    Name(String),
    Spec(AzPoolSpec),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzPoolSpec {
    name: Option<String>,
    vm_image: Option<String>,
}

#[derive(Debug, Clone)]
enum AzVariable {
    KeyValue { name: String, value: String },
    Group { group: String },
}

/// Variables appear either as a mapping or as a list of `{name, value}` /
/// `{group}` entries; both unify into the same vector.
fn deserialize_variables<'de, D>(deserializer: D) -> Result<Vec<AzVariable>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{MapAccess, SeqAccess, Visitor};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListEntry {
        KeyValue {
            name: String,
            value: serde_yaml::Value,
        },
        Group {
            group: String,
        },
    }

    struct VariablesVisitor;

    impl<'de> Visitor<'de> for VariablesVisitor {
        type Value = Vec<AzVariable>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a mapping of variables or a list of variable entries")
        }

        fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
        where
            M: MapAccess<'de>,
        {
            let mut vars = Vec::new();
            while let Some((name, value)) = map.next_entry::<String, serde_yaml::Value>()? {
                vars.push(AzVariable::KeyValue {
                    name,
                    value: yaml_scalar_to_string(&value),
                });
            }
            Ok(vars)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut vars = Vec::new();
            while let Some(entry) = seq.next_element::<ListEntry>()? {
                vars.push(match entry {
                    ListEntry::KeyValue { name, value } => AzVariable::KeyValue {
                        name,
                        value: yaml_scalar_to_string(&value),
                    },
                    ListEntry::Group { group } => AzVariable::Group { group },
                });
            }
            Ok(vars)
        }
    }

    deserializer.deserialize_any(VariablesVisitor)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzStage {
    stage: String,
    #[allow(dead_code)]
    display_name: Option<String>,
    #[serde(default)]
    depends_on: AzDependsOn,
    condition: Option<String>,
    #[serde(default, deserialize_with = "deserialize_variables")]
    variables: Vec<AzVariable>,
    #[serde(default)]
    jobs: Vec<AzJob>,
    pool: Option<AzPool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzJob {
    job: Option<String>,
    display_name: Option<String>,
    #[serde(default)]
    depends_on: AzDependsOn,
    condition: Option<String>,
    pool: Option<AzPool>,
    #[serde(default, deserialize_with = "deserialize_variables")]
    variables: Vec<AzVariable>,
    #[serde(default)]
    steps: Vec<AzStep>,
    timeout_in_minutes: Option<u64>,
}

/// `dependsOn:` absent, explicit empty, a single name, or a list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
enum AzDependsOn {
    #[default]
    Default,
    None,
    Single(String),
    Multiple(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzStep {
    name: Option<String>,
    display_name: Option<String>,
    condition: Option<String>,
    #[serde(default)]
    continue_on_error: BoolOrExpression,
    timeout_in_minutes: Option<u64>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(flatten)]
    action: AzStepAction,
}

/// A literal bool or a runtime expression string; expressions evaluate to
/// false locally.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BoolOrExpression {
    Bool(bool),
    Expression(String),
}

impl Default for BoolOrExpression {
    fn default() -> Self {
        BoolOrExpression::Bool(false)
    }
}

impl BoolOrExpression {
    fn as_bool(&self) -> bool {
        match self {
            BoolOrExpression::Bool(b) => *b,
            BoolOrExpression::Expression(_) => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AzStepAction {
    Script(AzScriptStep),
    Bash(AzBashStep),
    Pwsh(AzPwshStep),
    PowerShell(AzPowerShellStep),
    Checkout(AzCheckoutStep),
    Task(AzTaskStep),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzScriptStep {
    script: String,
    working_directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzBashStep {
    bash: String,
    working_directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzPwshStep {
    pwsh: String,
    working_directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzPowerShellStep {
    powershell: String,
    working_directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AzCheckoutStep {
    checkout: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AzTaskStep {
    task: String,
    #[serde(default)]
    inputs: HashMap<String, serde_yaml::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ParseResult<Pipeline> {
        AzureParser.parse(content, Path::new("azure-pipelines.yml"))
    }

    #[test]
    fn test_parse_simple_shape() {
        let pipeline = parse(
            r#"
pool:
  vmImage: ubuntu-latest
steps:
  - script: echo Hello
    displayName: Greet
"#,
        )
        .unwrap();

        assert_eq!(pipeline.provider, Provider::Azure);
        assert_eq!(pipeline.jobs.len(), 1);
        let job = &pipeline.jobs["job"];
        assert_eq!(job.runs_on, "ubuntu-latest");
        assert_eq!(job.steps[0].name, "Greet");
        assert_eq!(job.steps[0].script.as_deref(), Some("echo Hello"));
    }

    #[test]
    fn test_parse_jobs_shape() {
        let pipeline = parse(
            r#"
pool:
  vmImage: ubuntu-latest
jobs:
  - job: Build
    steps:
      - script: cargo build
  - job: Test
    dependsOn: Build
    steps:
      - script: cargo test
"#,
        )
        .unwrap();

        assert_eq!(pipeline.jobs.len(), 2);
        assert_eq!(pipeline.jobs["Test"].depends_on, vec!["Build"]);
    }

    #[test]
    fn test_multi_stage_flatten_and_fan_out() {
        let pipeline = parse(
            r#"
stages:
  - stage: Build
    jobs:
      - job: compile
        steps:
          - script: make
      - job: lint
        steps:
          - script: make lint
  - stage: Deploy
    dependsOn: Build
    jobs:
      - job: ship
        steps:
          - script: make deploy
"#,
        )
        .unwrap();

        let ids: Vec<&str> = pipeline.jobs.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["Build_compile", "Build_lint", "Deploy_ship"]);

        let ship = &pipeline.jobs["Deploy_ship"];
        assert_eq!(ship.depends_on, vec!["Build_compile", "Build_lint"]);
    }

    #[test]
    fn test_stage_without_depends_on_follows_previous() {
        let pipeline = parse(
            r#"
stages:
  - stage: One
    jobs:
      - job: a
        steps: [{ script: echo a }]
  - stage: Two
    jobs:
      - job: b
        steps: [{ script: echo b }]
"#,
        )
        .unwrap();

        assert_eq!(pipeline.jobs["Two_b"].depends_on, vec!["One_a"]);
        assert!(pipeline.jobs["One_a"].depends_on.is_empty());
    }

    #[test]
    fn test_stage_with_explicit_empty_depends_on_follows_previous() {
        let pipeline = parse(
            r#"
stages:
  - stage: One
    jobs:
      - job: a
        steps: [{ script: echo a }]
  - stage: Two
    dependsOn: []
    jobs:
      - job: b
        steps: [{ script: echo b }]
"#,
        )
        .unwrap();
        assert_eq!(pipeline.jobs["Two_b"].depends_on, vec!["One_a"]);
    }

    #[test]
    fn test_same_stage_depends_on_is_prefixed() {
        let pipeline = parse(
            r#"
stages:
  - stage: Build
    jobs:
      - job: first
        steps: [{ script: echo 1 }]
      - job: second
        dependsOn: first
        steps: [{ script: echo 2 }]
"#,
        )
        .unwrap();

        assert_eq!(pipeline.jobs["Build_second"].depends_on, vec!["Build_first"]);
    }

    #[test]
    fn test_stage_condition_combined_with_job_condition() {
        let pipeline = parse(
            r#"
stages:
  - stage: Deploy
    condition: succeeded()
    jobs:
      - job: ship
        condition: eq(variables.branch, 'main')
        steps: [{ script: make deploy }]
"#,
        )
        .unwrap();

        assert_eq!(
            pipeline.jobs["Deploy_ship"].condition.as_deref(),
            Some("and(succeeded(), eq(variables.branch, 'main'))")
        );
    }

    #[test]
    fn test_pool_precedence_job_over_stage_over_pipeline() {
        let pipeline = parse(
            r#"
pool:
  vmImage: pipeline-image
stages:
  - stage: S
    pool:
      vmImage: stage-image
    jobs:
      - job: uses_job_pool
        pool:
          vmImage: job-image
        steps: [{ script: echo 1 }]
      - job: uses_stage_pool
        steps: [{ script: echo 2 }]
"#,
        )
        .unwrap();

        assert_eq!(pipeline.jobs["S_uses_job_pool"].runs_on, "job-image");
        assert_eq!(pipeline.jobs["S_uses_stage_pool"].runs_on, "stage-image");
    }

    #[test]
    fn test_vm_image_wins_over_pool_name() {
        let pipeline = parse(
            r#"
pool:
  name: MyAgents
  vmImage: ubuntu-22.04
steps:
  - script: echo hi
"#,
        )
        .unwrap();
        assert_eq!(pipeline.jobs["job"].runs_on, "ubuntu-22.04");
    }

    #[test]
    fn test_default_pool_is_ubuntu_latest() {
        let pipeline = parse(
            r#"
jobs:
  - job: Build
    steps:
      - task: Bash@3
        inputs:
          script: echo hi
"#,
        )
        .unwrap();
        assert_eq!(pipeline.jobs["Build"].runs_on, "ubuntu-latest");
    }

    #[test]
    fn test_azure_variable_syntax_rewritten_everywhere() {
        let pipeline = parse(
            r#"
variables:
  buildConfiguration: Release
pool:
  vmImage: ubuntu-latest
jobs:
  - job: Build
    condition: eq('$(buildConfiguration)', 'Release')
    steps:
      - script: echo $(buildConfiguration)
        workingDirectory: $(workDir)
        env:
          CONFIG: $(buildConfiguration)
      - task: DotNetCoreCLI@2
        inputs:
          command: build
          arguments: --configuration $(buildConfiguration)
"#,
        )
        .unwrap();

        let job = &pipeline.jobs["Build"];
        let script_step = &job.steps[0];
        assert_eq!(script_step.script.as_deref(), Some("echo ${buildConfiguration}"));
        assert_eq!(script_step.working_directory.as_deref(), Some("${workDir}"));
        assert_eq!(
            script_step.environment.get("CONFIG").map(String::as_str),
            Some("${buildConfiguration}")
        );
        assert_eq!(
            job.condition.as_deref(),
            Some("eq('${buildConfiguration}', 'Release')")
        );
        let task_step = &job.steps[1];
        assert_eq!(
            task_step.with.get("arguments").map(String::as_str),
            Some("--configuration ${buildConfiguration}")
        );

        // No `$(` survives in any mapped string field.
        assert!(!format!("{:?}", pipeline).contains("$("));
    }

    #[test]
    fn test_task_table_classification() {
        assert_eq!(TaskMapper::classify("DotNetCoreCLI").0, StepKind::Dotnet);
        assert_eq!(TaskMapper::classify("PowerShell").0, StepKind::PowerShell);
        assert_eq!(TaskMapper::classify("Bash").0, StepKind::Bash);
        assert_eq!(TaskMapper::classify("CmdLine").0, StepKind::Script);
        assert_eq!(TaskMapper::classify("Docker").0, StepKind::Docker);
        assert_eq!(TaskMapper::classify("Npm").0, StepKind::Npm);
        assert_eq!(TaskMapper::classify("Maven").0, StepKind::Maven);
        assert_eq!(TaskMapper::classify("Gradle").0, StepKind::Gradle);
        assert_eq!(TaskMapper::classify("UsePythonVersion").0, StepKind::Python);
        assert_eq!(TaskMapper::classify("CopyFiles").0, StepKind::FileOperation);
        assert_eq!(TaskMapper::classify("PublishBuildArtifacts").0, StepKind::UploadArtifact);
        assert_eq!(TaskMapper::classify("DownloadPipelineArtifact").0, StepKind::DownloadArtifact);
        assert_eq!(TaskMapper::classify("SomethingElse").0, StepKind::Unknown);
    }

    #[test]
    fn test_task_version_split() {
        let pipeline = parse(
            r#"
pool:
  vmImage: ubuntu-latest
steps:
  - task: DotNetCoreCLI@2
    inputs:
      command: build
"#,
        )
        .unwrap();
        let step = &pipeline.jobs["job"].steps[0];
        assert_eq!(step.kind, StepKind::Dotnet);
        assert_eq!(step.with.get("task").map(String::as_str), Some("DotNetCoreCLI"));
        assert_eq!(step.with.get("taskVersion").map(String::as_str), Some("2"));
        assert_eq!(step.with.get("command").map(String::as_str), Some("build"));
    }

    #[test]
    fn test_inline_bash_task_lifts_script() {
        let pipeline = parse(
            r#"
pool:
  vmImage: ubuntu-latest
steps:
  - task: Bash@3
    inputs:
      targetType: inline
      script: echo from task
"#,
        )
        .unwrap();
        let step = &pipeline.jobs["job"].steps[0];
        assert_eq!(step.kind, StepKind::Bash);
        assert_eq!(step.script.as_deref(), Some("echo from task"));
    }

    #[test]
    fn test_variables_as_mapping_and_list() {
        let pipeline = parse(
            r#"
variables:
  - name: FROM_LIST
    value: one
  - group: shared-secrets
pool:
  vmImage: ubuntu-latest
steps:
  - script: echo hi
"#,
        )
        .unwrap();
        assert_eq!(pipeline.variables.get("FROM_LIST").map(String::as_str), Some("one"));
        // Group references are not resolvable locally.
        assert_eq!(pipeline.variables.len(), 1);

        let mapped = parse(
            r#"
variables:
  A: "1"
  B: "2"
pool:
  vmImage: ubuntu-latest
steps:
  - script: echo hi
"#,
        )
        .unwrap();
        assert_eq!(mapped.variables.len(), 2);
    }

    #[test]
    fn test_mixed_hierarchy_rejected() {
        let err = parse(
            r#"
pool:
  vmImage: ubuntu-latest
jobs:
  - job: A
    steps: [{ script: echo a }]
steps:
  - script: echo b
"#,
        )
        .unwrap_err();
        assert!(err.message.contains("exactly one hierarchy"));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = parse(
            r#"
stages:
  - stage: Build
    jobs: [{ job: a, steps: [{ script: echo 1 }] }]
  - stage: Build
    jobs: [{ job: b, steps: [{ script: echo 2 }] }]
"#,
        )
        .unwrap_err();
        assert!(err.message.contains("duplicate stage identifier"));
    }

    #[test]
    fn test_job_missing_identifier_rejected() {
        let err = parse(
            r#"
jobs:
  - displayName: anonymous
    steps: [{ script: echo hi }]
"#,
        )
        .unwrap_err();
        assert!(err.message.contains("missing identifier"));
    }

    #[test]
    fn test_unknown_stage_dependency_rejected() {
        let err = parse(
            r#"
stages:
  - stage: Deploy
    dependsOn: Ghost
    jobs: [{ job: ship, steps: [{ script: echo hi }] }]
"#,
        )
        .unwrap_err();
        assert!(err.message.contains("unknown stage 'Ghost'"));
    }

    #[test]
    fn test_stage_cycle_rejected() {
        let err = parse(
            r#"
stages:
  - stage: A
    dependsOn: B
    jobs: [{ job: a, steps: [{ script: echo a }] }]
  - stage: B
    dependsOn: A
    jobs: [{ job: b, steps: [{ script: echo b }] }]
"#,
        )
        .unwrap_err();
        assert!(err.message.contains("circular dependency"));
    }

    #[test]
    fn test_continue_on_error_expression_treated_as_false() {
        let pipeline = parse(
            r#"
pool:
  vmImage: ubuntu-latest
steps:
  - script: flaky
    continueOnError: true
  - script: stable
    continueOnError: $[eq(variables.x, 'y')]
"#,
        )
        .unwrap();
        let steps = &pipeline.jobs["job"].steps;
        assert!(steps[0].continue_on_error);
        assert!(!steps[1].continue_on_error);
    }

    #[test]
    fn test_can_parse_markers() {
        let parser = AzureParser;
        assert!(parser.can_parse(Path::new("x.yml"), "pool:\n  vmImage: ubuntu-latest\nsteps: []\n"));
        assert!(parser.can_parse(Path::new("x.yml"), "stages:\n  - stage: Build\n"));
        assert!(parser.can_parse(Path::new("x.yml"), "steps:\n  - task: Bash@3\n"));
        assert!(!parser.can_parse(
            Path::new("x.yml"),
            "jobs:\n  build:\n    runs-on: ubuntu-latest\n"
        ));
    }

    #[test]
    fn test_rewrite_variables() {
        assert_eq!(rewrite_variables("echo $(A) $(B_2)"), "echo ${A} ${B_2}");
        assert_eq!(rewrite_variables("no vars"), "no vars");
        // Already-canonical references pass through.
        assert_eq!(rewrite_variables("${KEEP}"), "${KEEP}");
    }

    #[test]
    fn test_rewrite_dotted_variables() {
        assert_eq!(
            rewrite_variables("cd $(System.DefaultWorkingDirectory)"),
            "cd ${System.DefaultWorkingDirectory}"
        );
        assert_eq!(
            rewrite_variables("$(Build.SourcesDirectory)/out on $(Agent.OS)"),
            "${Build.SourcesDirectory}/out on ${Agent.OS}"
        );
    }

    #[test]
    fn test_dotted_variable_syntax_rewritten_in_all_fields() {
        let pipeline = parse(
            r#"
pool:
  vmImage: ubuntu-latest
jobs:
  - job: Build
    condition: eq('$(Agent.OS)', 'Linux')
    steps:
      - script: ls $(Build.SourcesDirectory)
        workingDirectory: $(System.DefaultWorkingDirectory)
        env:
          SRC: $(Build.SourcesDirectory)
      - task: DotNetCoreCLI@2
        inputs:
          command: publish
          arguments: --output $(Build.ArtifactStagingDirectory)
"#,
        )
        .unwrap();

        let job = &pipeline.jobs["Build"];
        let script_step = &job.steps[0];
        assert_eq!(
            script_step.script.as_deref(),
            Some("ls ${Build.SourcesDirectory}")
        );
        assert_eq!(
            script_step.working_directory.as_deref(),
            Some("${System.DefaultWorkingDirectory}")
        );
        assert_eq!(
            script_step.environment.get("SRC").map(String::as_str),
            Some("${Build.SourcesDirectory}")
        );
        assert_eq!(job.condition.as_deref(), Some("eq('${Agent.OS}', 'Linux')"));
        assert_eq!(
            job.steps[1].with.get("arguments").map(String::as_str),
            Some("--output ${Build.ArtifactStagingDirectory}")
        );

        // No `$(` survives in any string field of a parsed pipeline.
        assert!(!format!("{:?}", pipeline).contains("$("));
    }
}
