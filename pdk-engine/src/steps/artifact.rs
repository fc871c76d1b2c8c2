// Artifact Step Executors
// Upload and download against the deterministic artifact layout
// `{workspace}/.pdk-artifacts/{runId}/{job}/{stepIndex}-{step}/{name}`,
// using the container tar API or direct filesystem copy in host mode.

use crate::container::archive;
use crate::model::{ExecutionContext, ExecutionTarget, Step, StepExecutionResult, StepKind};
use crate::steps::StepExecutor;

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

fn artifact_name(step: &Step) -> String {
    step.with
        .get("name")
        .or_else(|| step.with.get("artifactName"))
        .or_else(|| step.with.get("artifact"))
        .cloned()
        .unwrap_or_else(|| "artifact".to_string())
}

/// Resolve a step-visible path against the step-visible workspace root.
fn resolve_step_path(ctx: &ExecutionContext, path: &str) -> String {
    if Path::new(path).is_absolute() {
        path.to_string()
    } else {
        format!("{}/{}", ctx.workspace_path.trim_end_matches('/'), path)
    }
}

/// Recursive copy on the host filesystem.
fn copy_recursive(source: &Path, dest: &Path) -> std::io::Result<u64> {
    let mut copied = 0;
    if source.is_dir() {
        std::fs::create_dir_all(dest)?;
        for entry in std::fs::read_dir(source)? {
            let entry = entry?;
            copied += copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, dest)?;
        copied += 1;
    }
    Ok(copied)
}

pub struct UploadArtifactExecutor;

#[async_trait]
impl StepExecutor for UploadArtifactExecutor {
    fn kind(&self) -> StepKind {
        StepKind::UploadArtifact
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> StepExecutionResult {
        let started_at = Utc::now();
        let name = artifact_name(step);
        let source = step
            .with
            .get("path")
            .or_else(|| step.with.get("pathToPublish"))
            .or_else(|| step.with.get("targetPath"))
            .cloned()
            .unwrap_or_else(|| ctx.workspace_path.clone());

        let dest_dir = ctx.artifact.artifact_dir(&ctx.workspace_host, &name);
        if let Err(e) = std::fs::create_dir_all(&dest_dir) {
            return StepExecutionResult::failed(
                &step.name,
                format!("failed to create artifact directory: {}", e),
                started_at,
            );
        }

        let outcome: Result<String, String> = match &ctx.target {
            ExecutionTarget::Container {
                manager,
                container_id,
            } => {
                let source = resolve_step_path(ctx, &source);
                match manager.copy_out(container_id, &source).await {
                    Ok(tar) => archive::unpack(&tar, &dest_dir)
                        .map(|_| format!("uploaded '{}' from {}", name, source))
                        .map_err(|e| format!("failed to unpack artifact: {}", e)),
                    Err(e) => Err(format!("failed to copy out of container: {}", e)),
                }
            }
            ExecutionTarget::Host { .. } => {
                let source_path = if Path::new(&source).is_absolute() {
                    PathBuf::from(&source)
                } else {
                    ctx.workspace_host.join(&source)
                };
                if !source_path.exists() {
                    Err(format!("artifact source '{}' does not exist", source_path.display()))
                } else {
                    let target = match source_path.file_name() {
                        Some(file_name) => dest_dir.join(file_name),
                        None => dest_dir.clone(),
                    };
                    copy_recursive(&source_path, &target)
                        .map(|files| format!("uploaded '{}' ({} files)", name, files))
                        .map_err(|e| format!("failed to copy artifact: {}", e))
                }
            }
        };

        match outcome {
            Ok(message) => {
                let exec = crate::container::ExecResult {
                    stdout: format!("{} -> {}", message, dest_dir.display()),
                    stderr: String::new(),
                    exit_code: 0,
                };
                StepExecutionResult::completed(&step.name, &exec, started_at)
            }
            Err(message) => StepExecutionResult::failed(&step.name, message, started_at),
        }
    }
}

pub struct DownloadArtifactExecutor;

#[async_trait]
impl StepExecutor for DownloadArtifactExecutor {
    fn kind(&self) -> StepKind {
        StepKind::DownloadArtifact
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> StepExecutionResult {
        let started_at = Utc::now();
        let name = artifact_name(step);

        // Search this run's artifact tree for the named artifact; earlier
        // steps of any job may have produced it.
        let run_root = ctx
            .workspace_host
            .join(".pdk-artifacts")
            .join(&ctx.artifact.run_id);
        let Some(source_dir) = find_artifact(&run_root, &name) else {
            return StepExecutionResult::failed(
                &step.name,
                format!("artifact '{}' not found under {}", name, run_root.display()),
                started_at,
            );
        };

        let dest = step
            .with
            .get("path")
            .cloned()
            .unwrap_or_else(|| format!("{}/{}", ctx.workspace_path.trim_end_matches('/'), name));

        let outcome: Result<String, String> = match &ctx.target {
            ExecutionTarget::Container {
                manager,
                container_id,
            } => match archive::pack_path(&source_dir, &name) {
                Ok(tar) => {
                    let dest_parent = Path::new(&dest)
                        .parent()
                        .map(|p| p.to_string_lossy().to_string())
                        .filter(|p| !p.is_empty())
                        .unwrap_or_else(|| ctx.workspace_path.clone());
                    manager
                        .copy_in(container_id, tar, &dest_parent)
                        .await
                        .map(|_| format!("downloaded '{}' to {}", name, dest_parent))
                        .map_err(|e| format!("failed to copy into container: {}", e))
                }
                Err(e) => Err(format!("failed to pack artifact: {}", e)),
            },
            ExecutionTarget::Host { .. } => {
                let dest_path = if Path::new(&dest).is_absolute() {
                    PathBuf::from(&dest)
                } else {
                    ctx.workspace_host.join(&dest)
                };
                copy_recursive(&source_dir, &dest_path)
                    .map(|files| format!("downloaded '{}' ({} files) to {}", name, files, dest_path.display()))
                    .map_err(|e| format!("failed to copy artifact: {}", e))
            }
        };

        match outcome {
            Ok(message) => {
                let exec = crate::container::ExecResult {
                    stdout: message,
                    stderr: String::new(),
                    exit_code: 0,
                };
                StepExecutionResult::completed(&step.name, &exec, started_at)
            }
            Err(message) => StepExecutionResult::failed(&step.name, message, started_at),
        }
    }
}

/// Locate `{run_root}/{job}/{stepIndex}-{step}/{name}` for any job/step.
fn find_artifact(run_root: &Path, name: &str) -> Option<PathBuf> {
    let jobs = std::fs::read_dir(run_root).ok()?;
    for job in jobs.filter_map(|e| e.ok()) {
        let steps = std::fs::read_dir(job.path()).ok();
        for step in steps.into_iter().flatten().filter_map(|e| e.ok()) {
            let candidate = step.path().join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactContext;
    use crate::process::Platform;
    use std::collections::HashMap;

    fn host_ctx(workspace: &Path, step_index: usize, step_name: &str) -> ExecutionContext {
        ExecutionContext {
            target: ExecutionTarget::Host {
                platform: Platform::detect(),
            },
            workspace_host: workspace.to_path_buf(),
            workspace_path: workspace.to_string_lossy().to_string(),
            environment: HashMap::new(),
            working_directory: workspace.to_string_lossy().to_string(),
            job_name: "build".to_string(),
            job_id: "build".to_string(),
            runner: "host".to_string(),
            artifact: ArtifactContext::new("pdk-20260801-feedfeedfeedfeed", "build", step_index, step_name),
        }
    }

    fn upload_step(name: &str, path: &str) -> Step {
        let mut step = Step::new("upload", StepKind::UploadArtifact);
        step.with.insert("name".to_string(), name.to_string());
        step.with.insert("path".to_string(), path.to_string());
        step
    }

    #[tokio::test]
    async fn test_upload_then_download_round_trip() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::create_dir(workspace.path().join("out")).unwrap();
        std::fs::write(workspace.path().join("out/report.txt"), "report body").unwrap();

        let ctx = host_ctx(workspace.path(), 1, "publish");
        let step = upload_step("reports", "out");
        let result = UploadArtifactExecutor
            .execute(&step, &ctx, &CancellationToken::new())
            .await;
        assert!(result.success, "upload failed: {}", result.error_output);

        let stored = workspace
            .path()
            .join(".pdk-artifacts/pdk-20260801-feedfeedfeedfeed/build/1-publish/reports/out/report.txt");
        assert!(stored.exists(), "expected stored artifact at {}", stored.display());

        // Download into a fresh location from a later step.
        let ctx = host_ctx(workspace.path(), 2, "fetch");
        let mut step = Step::new("download", StepKind::DownloadArtifact);
        step.with.insert("name".to_string(), "reports".to_string());
        step.with.insert("path".to_string(), "incoming".to_string());

        let result = DownloadArtifactExecutor
            .execute(&step, &ctx, &CancellationToken::new())
            .await;
        assert!(result.success, "download failed: {}", result.error_output);
        assert!(workspace.path().join("incoming/out/report.txt").exists());
    }

    #[tokio::test]
    async fn test_upload_missing_source_fails_cleanly() {
        let workspace = tempfile::tempdir().unwrap();
        let ctx = host_ctx(workspace.path(), 0, "publish");
        let step = upload_step("reports", "nonexistent-dir");

        let result = UploadArtifactExecutor
            .execute(&step, &ctx, &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.error_output.contains("does not exist"));
    }

    #[tokio::test]
    async fn test_download_missing_artifact_fails_cleanly() {
        let workspace = tempfile::tempdir().unwrap();
        let ctx = host_ctx(workspace.path(), 0, "fetch");
        let mut step = Step::new("download", StepKind::DownloadArtifact);
        step.with.insert("name".to_string(), "ghost".to_string());

        let result = DownloadArtifactExecutor
            .execute(&step, &ctx, &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert!(result.error_output.contains("not found"));
    }

    #[test]
    fn test_artifact_name_fallbacks() {
        let mut step = Step::new("x", StepKind::UploadArtifact);
        assert_eq!(artifact_name(&step), "artifact");
        step.with.insert("artifactName".to_string(), "named".to_string());
        assert_eq!(artifact_name(&step), "named");
    }
}
