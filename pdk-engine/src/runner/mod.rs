// Job Runners
// The runner contract, the factory that picks docker/host by policy, and the
// per-step execution loop both concrete runners share.

pub mod docker;
pub mod filter;
pub mod host;

pub use docker::DockerJobRunner;
pub use filter::FilteringRunner;
pub use host::HostJobRunner;

use crate::container::ContainerManager;
use crate::logging::CorrelationScope;
use crate::model::{
    ArtifactContext, ExecutionContext, ExecutionTarget, Job, JobExecutionResult, Step,
    StepExecutionResult,
};
use crate::progress::ProgressReporter;
use crate::secrets::global_masker;
use crate::steps::ExecutorRegistry;
use crate::variables::{self, VariableResolver};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The runner contract. Runners own their container/process resources for
/// the duration of one job and release them on every exit path; failures are
/// reported through the result, never thrown.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(
        &self,
        job: &Job,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> JobExecutionResult;
}

/// Runner selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunnerPolicy {
    Docker,
    Host,
    #[default]
    Auto,
}

impl std::str::FromStr for RunnerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(RunnerPolicy::Docker),
            "host" => Ok(RunnerPolicy::Host),
            "auto" => Ok(RunnerPolicy::Auto),
            other => Err(format!("unknown runner policy '{}'", other)),
        }
    }
}

/// Everything runners share; `create` picks the concrete runner by policy.
pub struct RunnerFactory {
    pub manager: Arc<dyn ContainerManager>,
    pub registry: Arc<ExecutorRegistry>,
    pub progress: Arc<ProgressReporter>,
    pub resolver: VariableResolver,
}

impl RunnerFactory {
    /// Select a runner. `Auto` probes the container daemon and falls back to
    /// the host with a visible warning.
    pub async fn create(&self, policy: RunnerPolicy) -> Arc<dyn JobRunner> {
        let resolved = match policy {
            RunnerPolicy::Auto => match self.manager.ping().await {
                Ok(()) => RunnerPolicy::Docker,
                Err(e) => {
                    log::warn!(
                        "container daemon unavailable ({}); falling back to host execution",
                        e
                    );
                    self.progress
                        .warning("container daemon unavailable, running jobs on the host");
                    RunnerPolicy::Host
                }
            },
            explicit => explicit,
        };

        match resolved {
            RunnerPolicy::Docker => Arc::new(DockerJobRunner::new(
                self.manager.clone(),
                self.registry.clone(),
                self.progress.clone(),
                self.resolver.clone(),
            )),
            _ => Arc::new(HostJobRunner::new(
                self.registry.clone(),
                self.progress.clone(),
                self.resolver.clone(),
            )),
        }
    }
}

/// Inputs for the shared per-step loop.
pub(crate) struct StepLoop<'a> {
    pub job: &'a Job,
    pub target: ExecutionTarget,
    pub workspace_host: PathBuf,
    /// Workspace as the step sees it (`/workspace` in containers)
    pub workspace_path: String,
    /// Job environment plus built-ins, already expanded
    pub base_env: HashMap<String, String>,
    pub run_id: String,
    pub registry: &'a ExecutorRegistry,
    pub resolver: VariableResolver,
    pub progress: &'a ProgressReporter,
}

/// Run the job's steps in order: per-step context, variable expansion,
/// executor dispatch, masking, and failure propagation.
pub(crate) async fn run_steps(mut env: StepLoop<'_>, cancel: &CancellationToken) -> JobExecutionResult {
    let job = env.job;
    let mut result = JobExecutionResult::new(&job.id, &job.name);
    let started = std::time::Instant::now();

    for (index, step) in job.steps.iter().enumerate() {
        if cancel.is_cancelled() {
            result.success = false;
            result.error_message = Some("cancelled".to_string());
            break;
        }

        let _step_scope = CorrelationScope::enter();
        env.resolver
            .update_context(&job.name, &step.name, &job.runs_on, &env.workspace_path);

        let expanded = expand_step(step, &env.resolver);
        let mut step_env = env.base_env.clone();
        for (k, v) in &expanded.environment {
            step_env.insert(k.clone(), v.clone());
        }

        let working_directory = match &expanded.working_directory {
            Some(wd) if Path::new(wd).is_absolute() => wd.clone(),
            Some(wd) => format!("{}/{}", env.workspace_path.trim_end_matches('/'), wd),
            None => env.workspace_path.clone(),
        };

        let ctx = ExecutionContext {
            target: env.target.clone(),
            workspace_host: env.workspace_host.clone(),
            workspace_path: env.workspace_path.clone(),
            environment: step_env,
            working_directory,
            job_name: job.name.clone(),
            job_id: job.id.clone(),
            runner: job.runs_on.clone(),
            artifact: ArtifactContext::new(&env.run_id, &job.name, index, &step.name),
        };

        env.progress.step_started(&job.id, index, &step.name);

        let step_result = match env.registry.resolve(step.kind) {
            Ok(executor) => {
                let mut step_result = executor.execute(&expanded, &ctx, cancel).await;
                // Secrets are masked before the result leaves the runner.
                step_result.output = global_masker().mask(&step_result.output);
                step_result.error_output = global_masker().mask(&step_result.error_output);
                step_result
            }
            Err(e) => StepExecutionResult::failed(&step.name, e.to_string(), chrono::Utc::now()),
        };

        if !step_result.success {
            if let Some(hint) = crate::container::exec_exit_hint(step_result.exit_code) {
                log::info!("step '{}' exited {}: {}", step.name, step_result.exit_code, hint);
            }
        }

        emit_output(env.progress, &job.id, index, &step_result);
        env.progress.step_completed(
            &job.id,
            index,
            &step.name,
            step_result.success,
            step_result.exit_code,
            step_result.duration,
        );

        let failed = !step_result.success;
        let was_cancelled = step_result.exit_code == crate::process::EXIT_CANCELLED;
        result.steps.push(step_result);

        if was_cancelled || cancel.is_cancelled() {
            result.success = false;
            result.error_message = Some("cancelled".to_string());
            break;
        }
        if failed && !step.continue_on_error {
            log::info!("step '{}' failed, stopping job '{}'", step.name, job.id);
            result.success = false;
            break;
        }
        if failed {
            log::warn!(
                "step '{}' failed but continueOnError is set, continuing",
                step.name
            );
        }
    }

    // Job success is the AND of step successes for steps that do not
    // continue on error.
    if result.error_message.is_none() {
        result.success = result
            .steps
            .iter()
            .zip(job.steps.iter())
            .all(|(r, step)| r.success || step.continue_on_error);
    }
    result.duration = started.elapsed();
    result
}

fn emit_output(progress: &ProgressReporter, job_id: &str, index: usize, result: &StepExecutionResult) {
    let stdout_lines: Vec<&str> = result.output.lines().collect();
    for (i, line) in stdout_lines.iter().enumerate() {
        let is_final = i + 1 == stdout_lines.len() && result.error_output.is_empty();
        progress.step_output(job_id, index, line, false, is_final);
    }
    let stderr_lines: Vec<&str> = result.error_output.lines().collect();
    for (i, line) in stderr_lines.iter().enumerate() {
        progress.step_output(job_id, index, line, true, i + 1 == stderr_lines.len());
    }
}

/// Expand all variable references in the step's executable fields.
fn expand_step(step: &Step, resolver: &VariableResolver) -> Step {
    let mut expanded = step.clone();
    expanded.script = step.script.as_ref().map(|s| variables::expand(s, resolver));
    expanded.working_directory = step
        .working_directory
        .as_ref()
        .map(|s| variables::expand(s, resolver));
    expanded.with = step
        .with
        .iter()
        .map(|(k, v)| (k.clone(), variables::expand(v, resolver)))
        .collect();
    expanded.environment = step
        .environment
        .iter()
        .map(|(k, v)| (k.clone(), variables::expand(v, resolver)))
        .collect();
    expanded
}

/// Expanded job environment plus the runner built-ins.
pub(crate) fn job_environment(
    job: &Job,
    resolver: &VariableResolver,
    workspace_path: &str,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = job
        .environment
        .iter()
        .map(|(k, v)| (k.clone(), variables::expand(v, resolver)))
        .collect();
    env.insert("WORKSPACE".to_string(), workspace_path.to_string());
    env.insert("JOB_NAME".to_string(), job.name.clone());
    env.insert("RUNNER".to_string(), job.runs_on.clone());
    env
}
