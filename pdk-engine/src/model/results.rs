// Execution Artifacts
// Live objects produced by the runner for each step: the execution context
// handed to executors and the results they hand back.

use crate::container::{ContainerError, ContainerManager, ExecResult};
use crate::process::{HostProcessExecutor, Platform};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where a step's commands actually run.
#[derive(Clone)]
pub enum ExecutionTarget {
    /// Inside a container owned by the enclosing job
    Container {
        manager: Arc<dyn ContainerManager>,
        container_id: String,
    },
    /// Directly on the developer machine
    Host { platform: Platform },
}

impl std::fmt::Debug for ExecutionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionTarget::Container { container_id, .. } => f
                .debug_struct("Container")
                .field("container_id", container_id)
                .finish(),
            ExecutionTarget::Host { platform } => {
                f.debug_struct("Host").field("platform", platform).finish()
            }
        }
    }
}

/// The tuple used to derive deterministic artifact paths for a running step.
#[derive(Debug, Clone)]
pub struct ArtifactContext {
    /// Identifier of the pipeline run
    pub run_id: String,
    /// Sanitized job name
    pub job_name: String,
    /// Zero-based index of the step within the job
    pub step_index: usize,
    /// Sanitized step name
    pub step_name: String,
}

impl ArtifactContext {
    pub fn new(run_id: impl Into<String>, job_name: &str, step_index: usize, step_name: &str) -> Self {
        Self {
            run_id: run_id.into(),
            job_name: sanitize_name(job_name),
            step_index,
            step_name: sanitize_name(step_name),
        }
    }

    /// Directory for a named artifact of this step:
    /// `{workspace}/.pdk-artifacts/{runId}/{job}/{stepIndex}-{step}/{name}`
    pub fn artifact_dir(&self, workspace: &Path, artifact_name: &str) -> PathBuf {
        workspace
            .join(".pdk-artifacts")
            .join(&self.run_id)
            .join(&self.job_name)
            .join(format!("{}-{}", self.step_index, self.step_name))
            .join(sanitize_name(artifact_name))
    }
}

/// Replace every path-invalid character with `_`.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Everything an executor needs to run one step.
///
/// Built fresh by the runner for every step and never mutated by executors.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Container or host handle
    pub target: ExecutionTarget,
    /// Workspace path on the host filesystem
    pub workspace_host: PathBuf,
    /// Workspace path as visible to the step (`/workspace` in containers)
    pub workspace_path: String,
    /// Merged environment for the step (job env + step env + built-ins), expanded
    pub environment: HashMap<String, String>,
    /// Working directory as visible to the step
    pub working_directory: String,
    /// Job display name
    pub job_name: String,
    /// Job identifier
    pub job_id: String,
    /// Runner selector the job was scheduled on
    pub runner: String,
    /// Artifact naming context for this step
    pub artifact: ArtifactContext,
}

impl ExecutionContext {
    /// Run a shell command line in the step's target and capture its output.
    ///
    /// In a container the line is dispatched through `sh -c`; on the host it
    /// goes through the platform shell (`bash -c` / `cmd.exe /c`). A timeout
    /// expiry yields exit code -1, an explicit cancel exit code -2.
    pub async fn run_command_line(
        &self,
        line: &str,
        extra_env: &HashMap<String, String>,
        workdir: Option<&str>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, ContainerError> {
        let mut env = self.environment.clone();
        for (k, v) in extra_env {
            env.insert(k.clone(), v.clone());
        }
        let workdir = workdir.unwrap_or(&self.working_directory);

        match &self.target {
            ExecutionTarget::Container {
                manager,
                container_id,
            } => {
                let cmd = vec!["sh".to_string(), "-c".to_string(), line.to_string()];
                // Timeout cancels a child token so the in-container exec is
                // torn down, not just abandoned.
                let exec_cancel = cancel.child_token();
                let exec = manager.exec(container_id, &cmd, &env, Some(workdir), &exec_cancel);
                match tokio::time::timeout(timeout, exec).await {
                    Ok(result) => result,
                    Err(_) => {
                        exec_cancel.cancel();
                        Ok(ExecResult {
                            stdout: String::new(),
                            stderr: format!("command timed out after {}s", timeout.as_secs()),
                            exit_code: -1,
                        })
                    }
                }
            }
            ExecutionTarget::Host { platform } => {
                let executor = HostProcessExecutor::with_platform(*platform);
                let result = executor
                    .run(line, &env, Path::new(workdir), timeout, cancel, None)
                    .await
                    .map_err(|e| ContainerError::ExecFailed(e.to_string()))?;
                Ok(result)
            }
        }
    }

    /// Materialize a file the step can reference, returning its path as
    /// visible to the step. Used for generated script files.
    pub async fn write_step_file(
        &self,
        file_name: &str,
        content: &str,
        executable: bool,
    ) -> Result<String, ContainerError> {
        match &self.target {
            ExecutionTarget::Container {
                manager,
                container_id,
            } => {
                let mode = if executable { 0o755 } else { 0o644 };
                let archive = crate::container::archive::pack_bytes(file_name, mode, content.as_bytes())?;
                manager.copy_in(container_id, archive, "/tmp").await?;
                Ok(format!("/tmp/{}", file_name))
            }
            ExecutionTarget::Host { .. } => {
                let path = std::env::temp_dir().join(file_name);
                tokio::fs::write(&path, content).await?;
                #[cfg(unix)]
                if executable {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = std::fs::Permissions::from_mode(0o755);
                    tokio::fs::set_permissions(&path, perms).await?;
                }
                Ok(path.to_string_lossy().to_string())
            }
        }
    }

    /// Best-effort removal of a file created via [`write_step_file`].
    pub async fn remove_step_file(&self, path: &str) {
        match &self.target {
            ExecutionTarget::Container {
                manager,
                container_id,
            } => {
                let cmd = vec!["rm".to_string(), "-f".to_string(), path.to_string()];
                let cancel = CancellationToken::new();
                if let Err(e) = manager
                    .exec(container_id, &cmd, &HashMap::new(), None, &cancel)
                    .await
                {
                    log::debug!("failed to remove step file {}: {}", path, e);
                }
            }
            ExecutionTarget::Host { .. } => {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    log::debug!("failed to remove step file {}: {}", path, e);
                }
            }
        }
    }

    /// Whether the step's workspace is a bind-mounted host directory.
    pub fn workspace_is_mounted(&self) -> bool {
        matches!(self.target, ExecutionTarget::Container { .. })
            || self.workspace_path == self.workspace_host.to_string_lossy()
    }
}

/// Outcome of one step.
#[derive(Debug, Clone)]
pub struct StepExecutionResult {
    pub name: String,
    pub success: bool,
    pub exit_code: i32,
    pub output: String,
    pub error_output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

impl StepExecutionResult {
    /// Result for a step that completed (successfully or not) with captured output.
    pub fn completed(
        name: impl Into<String>,
        exec: &ExecResult,
        started_at: DateTime<Utc>,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            name: name.into(),
            success: exec.exit_code == 0,
            exit_code: exec.exit_code,
            output: exec.stdout.clone(),
            error_output: exec.stderr.clone(),
            started_at,
            finished_at,
            duration: (finished_at - started_at).to_std().unwrap_or_default(),
        }
    }

    /// Result for a step that failed before producing a process exit code.
    pub fn failed(name: impl Into<String>, message: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        let finished_at = Utc::now();
        Self {
            name: name.into(),
            success: false,
            exit_code: -1,
            output: String::new(),
            error_output: message.into(),
            started_at,
            finished_at,
            duration: (finished_at - started_at).to_std().unwrap_or_default(),
        }
    }

    /// Placeholder result for a step the filter excluded.
    pub fn skipped(name: impl Into<String>, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            success: true,
            exit_code: 0,
            output: format!("[SKIPPED] {}", reason),
            error_output: String::new(),
            started_at: now,
            finished_at: now,
            duration: Duration::ZERO,
        }
    }
}

/// Outcome of one job: its step results plus job-level success.
#[derive(Debug, Clone)]
pub struct JobExecutionResult {
    pub job_id: String,
    pub job_name: String,
    pub success: bool,
    pub steps: Vec<StepExecutionResult>,
    pub error_message: Option<String>,
    pub duration: Duration,
}

impl JobExecutionResult {
    pub fn new(job_id: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job_name: job_name.into(),
            success: true,
            steps: Vec::new(),
            error_message: None,
            duration: Duration::ZERO,
        }
    }

    pub fn failed(job_id: impl Into<String>, job_name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Self::new(job_id, job_name);
        result.success = false;
        result.error_message = Some(message.into());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Build & Test"), "Build___Test");
        assert_eq!(sanitize_name("job/with:bad*chars"), "job_with_bad_chars");
        assert_eq!(sanitize_name("ok-name_1.2"), "ok-name_1.2");
        assert_eq!(sanitize_name(""), "_");
    }

    #[test]
    fn test_artifact_dir_layout() {
        let ctx = ArtifactContext::new("pdk-20260801-abc", "Build Job", 2, "Upload Results");
        let dir = ctx.artifact_dir(Path::new("/work"), "logs");
        assert_eq!(
            dir,
            PathBuf::from("/work/.pdk-artifacts/pdk-20260801-abc/Build_Job/2-Upload_Results/logs")
        );
    }

    #[test]
    fn test_step_result_skipped_shape() {
        let result = StepExecutionResult::skipped("build", "name filter");
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.duration, Duration::ZERO);
        assert!(result.output.starts_with("[SKIPPED]"));
    }

    #[test]
    fn test_step_result_completed_maps_exit_code() {
        let exec = ExecResult {
            stdout: "hi".to_string(),
            stderr: String::new(),
            exit_code: 0,
        };
        let result = StepExecutionResult::completed("echo", &exec, Utc::now());
        assert!(result.success);

        let exec = ExecResult {
            stdout: String::new(),
            stderr: "boom".to_string(),
            exit_code: 3,
        };
        let result = StepExecutionResult::completed("echo", &exec, Utc::now());
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
    }
}
