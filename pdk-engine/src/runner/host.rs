// Host Job Runner
// Runs one job directly on the developer machine. Same outer shape as the
// container runner, but the workspace is a host directory and steps go
// through the platform shell.

use crate::logging::CorrelationScope;
use crate::model::{ExecutionTarget, Job, JobExecutionResult};
use crate::process::Platform;
use crate::progress::ProgressReporter;
use crate::runner::{job_environment, run_steps, JobRunner, StepLoop};
use crate::steps::ExecutorRegistry;
use crate::variables::VariableResolver;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Once;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

static SECURITY_WARNING: Once = Once::new();

pub struct HostJobRunner {
    registry: Arc<ExecutorRegistry>,
    progress: Arc<ProgressReporter>,
    resolver: VariableResolver,
}

impl HostJobRunner {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        progress: Arc<ProgressReporter>,
        resolver: VariableResolver,
    ) -> Self {
        Self {
            registry,
            progress,
            resolver,
        }
    }
}

#[async_trait]
impl JobRunner for HostJobRunner {
    async fn run_job(
        &self,
        job: &Job,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> JobExecutionResult {
        let job_scope = CorrelationScope::enter();
        let run_id = job_scope.id();

        SECURITY_WARNING.call_once(|| {
            log::warn!(
                "host runner executes pipeline steps directly on this machine without isolation"
            );
        });

        // An empty caller path means a fresh temp workspace owned by this
        // job; the guard deletes it on every exit path.
        let mut temp_guard: Option<tempfile::TempDir> = None;
        let workspace_dir: PathBuf = if workspace.as_os_str().is_empty() {
            let suffix = Uuid::new_v4().simple().to_string();
            match tempfile::Builder::new()
                .prefix(&format!("pdk-host-{}", &suffix[..8]))
                .tempdir()
            {
                Ok(dir) => {
                    let path = dir.path().to_path_buf();
                    temp_guard = Some(dir);
                    path
                }
                Err(e) => {
                    return JobExecutionResult::failed(
                        &job.id,
                        &job.name,
                        format!("failed to create workspace: {}", e),
                    );
                }
            }
        } else {
            workspace.to_path_buf()
        };

        let workspace_path = workspace_dir.to_string_lossy().to_string();
        let platform = Platform::detect();
        log::info!(
            "job '{}' runs on the host ({}) in {}",
            job.id,
            platform,
            workspace_path
        );

        let mut resolver = self.resolver.snapshot();
        resolver.update_context(&job.name, "", &job.runs_on, &workspace_path);
        let env = job_environment(job, &resolver, &workspace_path);

        self.progress
            .job_started(&job.id, &job.name, "host", job.steps.len());

        let result = run_steps(
            StepLoop {
                job,
                target: ExecutionTarget::Host { platform },
                workspace_host: workspace_dir.clone(),
                workspace_path,
                base_env: env,
                run_id,
                registry: &self.registry,
                resolver,
                progress: &self.progress,
            },
            cancel,
        )
        .await;

        if let Some(temp) = temp_guard {
            if let Err(e) = temp.close() {
                log::warn!("failed to delete temp workspace: {}", e);
            }
        }

        self.progress
            .job_completed(&job.id, result.success, result.duration);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Step, StepKind};
    use crate::progress::{ProgressMode, ProgressReporter};

    fn runner() -> HostJobRunner {
        HostJobRunner::new(
            Arc::new(ExecutorRegistry::with_default_executors()),
            Arc::new(ProgressReporter::new(None, ProgressMode::Quiet)),
            VariableResolver::new(),
        )
    }

    fn script_job(id: &str, scripts: &[(&str, &str, bool)]) -> Job {
        let mut job = Job::new(id);
        job.runs_on = "host".to_string();
        for (name, script, continue_on_error) in scripts {
            let mut step = Step::new(*name, StepKind::Script);
            step.script = Some(script.to_string());
            step.continue_on_error = *continue_on_error;
            job.steps.push(step);
        }
        job
    }

    #[tokio::test]
    async fn test_happy_path_job() {
        let workspace = tempfile::tempdir().unwrap();
        let job = script_job("build", &[("hello", "echo hi", false)]);

        let result = runner()
            .run_job(&job, workspace.path(), &CancellationToken::new())
            .await;
        assert!(result.success);
        assert_eq!(result.steps.len(), 1);
        assert!(result.steps[0].output.contains("hi"));
    }

    #[tokio::test]
    async fn test_failure_stops_job_without_continue_on_error() {
        let workspace = tempfile::tempdir().unwrap();
        let job = script_job(
            "build",
            &[
                ("ok", "echo one", false),
                ("boom", "exit 3", false),
                ("never", "echo three", false),
            ],
        );

        let result = runner()
            .run_job(&job, workspace.path(), &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[1].exit_code, 3);
    }

    #[tokio::test]
    async fn test_continue_on_error_runs_all_steps() {
        let workspace = tempfile::tempdir().unwrap();
        let job = script_job(
            "build",
            &[
                ("one", "echo 1", false),
                ("flaky", "exit 9", true),
                ("three", "echo 3", false),
            ],
        );

        let result = runner()
            .run_job(&job, workspace.path(), &CancellationToken::new())
            .await;
        assert_eq!(result.steps.len(), 3);
        // The flaky step continues on error, so the job is green when the
        // final step passes.
        assert!(result.success);
        assert!(!result.steps[1].success);
        assert!(result.steps[2].success);
    }

    #[tokio::test]
    async fn test_temp_workspace_created_and_removed() {
        let job = script_job("build", &[("pwd", "pwd", false)]);
        let result = runner()
            .run_job(&job, Path::new(""), &CancellationToken::new())
            .await;
        assert!(result.success);

        let printed = result.steps[0].output.trim().to_string();
        assert!(printed.contains("pdk-host-"));
        assert!(!Path::new(&printed).exists(), "temp workspace should be deleted");
    }

    #[tokio::test]
    async fn test_variable_expansion_in_steps() {
        let workspace = tempfile::tempdir().unwrap();
        let mut resolver = VariableResolver::new();
        resolver.set(
            "GREETING",
            "hello",
            crate::variables::VariableSource::Pipeline,
        );
        let runner = HostJobRunner::new(
            Arc::new(ExecutorRegistry::with_default_executors()),
            Arc::new(ProgressReporter::new(None, ProgressMode::Quiet)),
            resolver,
        );

        let job = script_job("greet", &[("say", "echo ${GREETING}", false)]);
        let result = runner
            .run_job(&job, workspace.path(), &CancellationToken::new())
            .await;
        assert!(result.success);
        assert!(result.steps[0].output.contains("hello"));
    }

    #[tokio::test]
    async fn test_builtin_variables_available() {
        let workspace = tempfile::tempdir().unwrap();
        let job = script_job("ids", &[("names", "echo job=$JOB_NAME runner=$RUNNER", false)]);
        let result = runner()
            .run_job(&job, workspace.path(), &CancellationToken::new())
            .await;
        assert!(result.success);
        assert!(result.steps[0].output.contains("job=ids"));
        assert!(result.steps[0].output.contains("runner=host"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_following_steps() {
        let workspace = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let job = script_job(
            "long",
            &[("sleepy", "sleep 30", false), ("after", "echo after", false)],
        );
        let result = runner().run_job(&job, workspace.path(), &cancel).await;
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("cancelled"));
        // The cancelled step is recorded; the following one never ran.
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].exit_code, crate::process::EXIT_CANCELLED);
    }

    #[tokio::test]
    async fn test_secret_masked_in_step_output() {
        let workspace = tempfile::tempdir().unwrap();
        crate::secrets::global_masker().register("s3cr3t-value-masked");

        let job = script_job("leaky", &[("leak", "echo s3cr3t-value-masked", false)]);
        let result = runner()
            .run_job(&job, workspace.path(), &CancellationToken::new())
            .await;
        assert!(result.success);
        assert!(!result.steps[0].output.contains("s3cr3t-value-masked"));
        assert!(result.steps[0].output.contains("***"));
    }
}
