// Validation Pipeline
// Ordered phases over a parsed pipeline; each phase reports located issues
// and a fatal phase stops the rest.

use crate::model::{Pipeline, StepKind};
use crate::parser::graph;
use crate::variables::{self, VariableResolver};

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One finding, annotated with severity and location.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    pub job: Option<String>,
    pub step: Option<String>,
    pub line: Option<usize>,
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            job: None,
            step: None,
            line: None,
            suggestion: None,
        }
    }

    pub fn in_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    pub fn in_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.severity)?;
        match (&self.job, &self.step) {
            (Some(job), Some(step)) => write!(f, " [{} / {}]", job, step)?,
            (Some(job), None) => write!(f, " [{}]", job)?,
            _ => {}
        }
        write!(f, ": {}", self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Aggregated findings across the phases that ran.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    /// Phase that stopped validation, if any
    pub stopped_at: Option<&'static str>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }
}

/// Inputs a phase may consult beyond the pipeline itself.
pub struct ValidationContext<'a> {
    pub resolver: &'a VariableResolver,
    /// Step kinds with a registered executor for the chosen runner mode
    pub registered_kinds: Vec<StepKind>,
}

/// One validation phase. Phases run in registration order; a phase that
/// reports an `Error` stops the phases after it.
pub trait ValidationPhase: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, pipeline: &Pipeline, ctx: &ValidationContext) -> Vec<ValidationIssue>;
}

/// Ordered phase runner. Additional phases plug in without touching the
/// built-ins.
pub struct Validator {
    phases: Vec<Box<dyn ValidationPhase>>,
}

impl Validator {
    /// The built-in phase order: schema, executor, variable, dependency.
    pub fn with_default_phases() -> Self {
        Self {
            phases: vec![
                Box::new(SchemaPhase),
                Box::new(ExecutorPhase),
                Box::new(VariablePhase),
                Box::new(DependencyPhase),
            ],
        }
    }

    pub fn empty() -> Self {
        Self { phases: Vec::new() }
    }

    pub fn push_phase(&mut self, phase: Box<dyn ValidationPhase>) {
        self.phases.push(phase);
    }

    pub fn validate(&self, pipeline: &Pipeline, ctx: &ValidationContext) -> ValidationReport {
        let mut report = ValidationReport::default();
        for phase in &self.phases {
            let issues = phase.run(pipeline, ctx);
            let fatal = issues.iter().any(|i| i.severity == Severity::Error);
            report.issues.extend(issues);
            if fatal {
                report.stopped_at = Some(phase.name());
                log::debug!("validation stopped at the {} phase", phase.name());
                break;
            }
        }
        report
    }
}

/// Structural completeness: named jobs, non-empty step lists, payloads.
struct SchemaPhase;

impl ValidationPhase for SchemaPhase {
    fn name(&self) -> &'static str {
        "schema"
    }

    fn run(&self, pipeline: &Pipeline, _ctx: &ValidationContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if pipeline.jobs.is_empty() {
            issues.push(ValidationIssue::error("pipeline defines no jobs"));
        }
        for (id, job) in &pipeline.jobs {
            if job.steps.is_empty() {
                issues.push(ValidationIssue::error("job has no steps").in_job(id));
            }
            if job.runs_on.is_empty() {
                issues.push(
                    ValidationIssue::error("job has no runner selector")
                        .in_job(id)
                        .with_suggestion("set runs-on / pool to an image label or 'host'"),
                );
            }
            for step in &job.steps {
                if !step.has_payload() {
                    issues.push(
                        ValidationIssue::error("step has no executable payload")
                            .in_job(id)
                            .in_step(&step.name),
                    );
                }
            }
        }
        issues
    }
}

/// Every step kind must have a registered executor.
struct ExecutorPhase;

impl ValidationPhase for ExecutorPhase {
    fn name(&self) -> &'static str {
        "executor"
    }

    fn run(&self, pipeline: &Pipeline, ctx: &ValidationContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (id, job) in &pipeline.jobs {
            for step in &job.steps {
                if !ctx.registered_kinds.contains(&step.kind) {
                    let registered = ctx
                        .registered_kinds
                        .iter()
                        .map(|k| k.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    issues.push(
                        ValidationIssue::error(format!(
                            "no executor registered for step kind {}",
                            step.kind
                        ))
                        .in_job(id)
                        .in_step(&step.name)
                        .with_suggestion(format!("registered kinds: {}", registered)),
                    );
                }
            }
        }
        issues
    }
}

/// Every `${NAME}` reference should resolve against the current layers.
/// Unresolved references are warnings: they expand to empty at run time.
struct VariablePhase;

/// Bound by the runner between steps, so never present at validation time.
const RUNTIME_BUILTINS: [&str; 4] = ["WORKSPACE", "JOB_NAME", "STEP_NAME", "RUNNER"];

impl ValidationPhase for VariablePhase {
    fn name(&self) -> &'static str {
        "variable"
    }

    fn run(&self, pipeline: &Pipeline, ctx: &ValidationContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (id, job) in &pipeline.jobs {
            for step in &job.steps {
                let mut fields: Vec<&str> = Vec::new();
                if let Some(script) = &step.script {
                    fields.push(script);
                }
                if let Some(wd) = &step.working_directory {
                    fields.push(wd);
                }
                fields.extend(step.with.values().map(String::as_str));
                fields.extend(step.environment.values().map(String::as_str));

                for field in fields {
                    for name in variables::references(field) {
                        if RUNTIME_BUILTINS.contains(&name.as_str()) {
                            continue;
                        }
                        if !ctx.resolver.contains(&name) && !pipeline.variables.contains_key(&name)
                        {
                            issues.push(
                                ValidationIssue::warning(format!(
                                    "variable '{}' is not defined and will expand to empty",
                                    name
                                ))
                                .in_job(id)
                                .in_step(&step.name),
                            );
                        }
                    }
                }
            }
        }
        issues
    }
}

/// Graph integrity, re-checked as defense in depth behind the parser.
struct DependencyPhase;

impl ValidationPhase for DependencyPhase {
    fn name(&self) -> &'static str {
        "dependency"
    }

    fn run(&self, pipeline: &Pipeline, _ctx: &ValidationContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (id, job) in &pipeline.jobs {
            for dep in &job.depends_on {
                if !pipeline.jobs.contains_key(dep) {
                    issues.push(
                        ValidationIssue::error(format!("dependency on unknown job '{}'", dep))
                            .in_job(id),
                    );
                }
            }
        }
        if issues.is_empty() {
            if let Some(cycle) = graph::find_cycle(pipeline) {
                issues.push(ValidationIssue::error(format!(
                    "circular dependency: {}",
                    cycle.join(" -> ")
                )));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Job, Provider, Step};

    fn executable_kinds() -> Vec<StepKind> {
        vec![
            StepKind::Script,
            StepKind::Bash,
            StepKind::PowerShell,
            StepKind::Checkout,
        ]
    }

    fn script_step(name: &str, script: &str) -> Step {
        let mut step = Step::new(name, StepKind::Script);
        step.script = Some(script.to_string());
        step
    }

    fn valid_pipeline() -> Pipeline {
        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        let mut job = Job::new("build");
        job.runs_on = "ubuntu-latest".to_string();
        job.steps.push(script_step("compile", "make"));
        pipeline.jobs.insert("build".to_string(), job);
        pipeline
    }

    #[test]
    fn test_valid_pipeline_passes_all_phases() {
        let pipeline = valid_pipeline();
        let resolver = VariableResolver::new();
        let ctx = ValidationContext {
            resolver: &resolver,
            registered_kinds: executable_kinds(),
        };
        let report = Validator::with_default_phases().validate(&pipeline, &ctx);
        assert!(!report.has_errors());
        assert!(report.stopped_at.is_none());
    }

    #[test]
    fn test_schema_error_stops_later_phases() {
        let mut pipeline = valid_pipeline();
        // Introduce both a schema problem and a dependency problem; only the
        // schema phase should report.
        pipeline.jobs.get_mut("build").unwrap().steps.clear();
        pipeline
            .jobs
            .get_mut("build")
            .unwrap()
            .depends_on
            .push("ghost".to_string());

        let resolver = VariableResolver::new();
        let ctx = ValidationContext {
            resolver: &resolver,
            registered_kinds: executable_kinds(),
        };
        let report = Validator::with_default_phases().validate(&pipeline, &ctx);
        assert!(report.has_errors());
        assert_eq!(report.stopped_at, Some("schema"));
        assert!(report.issues.iter().all(|i| !i.message.contains("ghost")));
    }

    #[test]
    fn test_executor_phase_reports_unregistered_kind() {
        let mut pipeline = valid_pipeline();
        pipeline
            .jobs
            .get_mut("build")
            .unwrap()
            .steps
            .push(Step::new("mystery", StepKind::Unknown));

        let resolver = VariableResolver::new();
        let ctx = ValidationContext {
            resolver: &resolver,
            registered_kinds: executable_kinds(),
        };
        let report = Validator::with_default_phases().validate(&pipeline, &ctx);
        assert!(report.has_errors());
        assert_eq!(report.stopped_at, Some("executor"));
        let issue = report
            .issues
            .iter()
            .find(|i| i.message.contains("no executor"))
            .unwrap();
        assert_eq!(issue.job.as_deref(), Some("build"));
        assert!(issue.suggestion.as_deref().unwrap().contains("Script"));
    }

    #[test]
    fn test_variable_phase_warns_on_unresolved() {
        let mut pipeline = valid_pipeline();
        pipeline.jobs.get_mut("build").unwrap().steps[0].script =
            Some("echo ${UNDEFINED_VAR}".to_string());

        let resolver = VariableResolver::new();
        let ctx = ValidationContext {
            resolver: &resolver,
            registered_kinds: executable_kinds(),
        };
        let report = Validator::with_default_phases().validate(&pipeline, &ctx);
        assert!(!report.has_errors());
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == Severity::Warning && i.message.contains("UNDEFINED_VAR")));
    }

    #[test]
    fn test_variable_phase_accepts_runtime_builtins() {
        let mut pipeline = valid_pipeline();
        pipeline.jobs.get_mut("build").unwrap().steps[0].script = Some(
            "echo ${WORKSPACE} ${JOB_NAME} ${STEP_NAME} ${RUNNER}".to_string(),
        );

        let resolver = VariableResolver::new();
        let ctx = ValidationContext {
            resolver: &resolver,
            registered_kinds: executable_kinds(),
        };
        let report = Validator::with_default_phases().validate(&pipeline, &ctx);
        assert!(report.issues.is_empty(), "built-ins must not warn: {:?}", report.issues);
    }

    #[test]
    fn test_variable_phase_accepts_pipeline_variables() {
        let mut pipeline = valid_pipeline();
        pipeline
            .variables
            .insert("GREETING".to_string(), "hello".to_string());
        pipeline.jobs.get_mut("build").unwrap().steps[0].script =
            Some("echo ${GREETING}".to_string());

        let resolver = VariableResolver::new();
        let ctx = ValidationContext {
            resolver: &resolver,
            registered_kinds: executable_kinds(),
        };
        let report = Validator::with_default_phases().validate(&pipeline, &ctx);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_dependency_phase_catches_cycle() {
        let mut pipeline = valid_pipeline();
        let mut other = Job::new("test");
        other.runs_on = "ubuntu-latest".to_string();
        other.steps.push(script_step("run", "make test"));
        other.depends_on.push("build".to_string());
        pipeline.jobs.insert("test".to_string(), other);
        pipeline
            .jobs
            .get_mut("build")
            .unwrap()
            .depends_on
            .push("test".to_string());

        let resolver = VariableResolver::new();
        let ctx = ValidationContext {
            resolver: &resolver,
            registered_kinds: executable_kinds(),
        };
        let report = Validator::with_default_phases().validate(&pipeline, &ctx);
        assert!(report.has_errors());
        assert!(report
            .issues
            .iter()
            .any(|i| i.message.contains("circular dependency")));
    }

    #[test]
    fn test_custom_phase_plugs_in() {
        struct NamePolicy;
        impl ValidationPhase for NamePolicy {
            fn name(&self) -> &'static str {
                "name-policy"
            }
            fn run(&self, pipeline: &Pipeline, _ctx: &ValidationContext) -> Vec<ValidationIssue> {
                pipeline
                    .jobs
                    .keys()
                    .filter(|id| id.contains(' '))
                    .map(|id| ValidationIssue::warning("job identifier contains spaces").in_job(id))
                    .collect()
            }
        }

        let mut validator = Validator::with_default_phases();
        validator.push_phase(Box::new(NamePolicy));

        let mut pipeline = valid_pipeline();
        let mut spaced = Job::new("has space");
        spaced.runs_on = "host".to_string();
        spaced.steps.push(script_step("x", "true"));
        pipeline.jobs.insert("has space".to_string(), spaced);

        let resolver = VariableResolver::new();
        let ctx = ValidationContext {
            resolver: &resolver,
            registered_kinds: executable_kinds(),
        };
        let report = validator.validate(&pipeline, &ctx);
        assert!(report
            .issues
            .iter()
            .any(|i| i.message.contains("contains spaces")));
    }

    #[test]
    fn test_issue_display_includes_location() {
        let issue = ValidationIssue::error("bad thing")
            .in_job("build")
            .in_step("compile")
            .with_suggestion("fix it");
        let text = issue.to_string();
        assert!(text.contains("error [build / compile]: bad thing"));
        assert!(text.contains("(fix it)"));
    }
}
