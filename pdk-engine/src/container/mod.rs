// Container Manager
// Owns all interaction with the container daemon: image pull, container
// lifecycle, exec, and tar-based file copy. Shells out to the `docker` CLI.

pub mod archive;

use crate::progress::ProgressReporter;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Errors from the container subsystem, classified so the CLI can attach
/// remediation hints.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container daemon is not installed (docker command not found)")]
    DaemonNotInstalled,

    #[error("container daemon is not running: {0}")]
    DaemonNotRunning(String),

    #[error("permission denied talking to the container daemon: {0}")]
    PermissionDenied(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("failed to pull image: {0}")]
    PullFailed(String),

    #[error("failed to create container: {0}")]
    CreateFailed(String),

    #[error("container execution failed: {0}")]
    ExecFailed(String),

    #[error("failed to copy files: {0}")]
    CopyFailed(String),

    #[error("failed to remove container: {0}")]
    RemoveFailed(String),

    #[error("invalid image reference '{0}'")]
    InvalidImage(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    /// A short remediation hint for user-facing error rendering.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ContainerError::DaemonNotInstalled => {
                Some("install Docker Desktop or the docker engine, or run with --runner host")
            }
            ContainerError::DaemonNotRunning(_) => {
                Some("start the docker daemon (e.g. `systemctl start docker`)")
            }
            ContainerError::PermissionDenied(_) => {
                Some("add your user to the docker group or run with elevated permissions")
            }
            ContainerError::ImageNotFound(_) => {
                Some("check the image name and tag, and that you are logged in to the registry")
            }
            _ => None,
        }
    }
}

/// Remediation hint for well-known container exec exit codes.
pub fn exec_exit_hint(exit_code: i32) -> Option<&'static str> {
    match exit_code {
        127 => Some("command not found inside the container; is the tool installed in the image?"),
        137 => Some("process was killed (exit 137), usually out-of-memory"),
        143 => Some("process was terminated (exit 143)"),
        _ => None,
    }
}

/// Captured output of one exec.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Options for container creation.
#[derive(Debug, Clone)]
pub struct CreateContainerOptions {
    /// Unique container name
    pub name: String,
    pub image: String,
    /// Host directory bind-mounted at `/workspace`
    pub workspace: PathBuf,
    pub env: HashMap<String, String>,
    pub working_dir: String,
}

/// The container operations the runner depends on. Mocked in tests.
#[async_trait]
pub trait ContainerManager: Send + Sync {
    /// Probe daemon availability.
    async fn ping(&self) -> Result<(), ContainerError>;

    /// Pull the image if it is not already present, reporting progress as
    /// human-readable messages.
    async fn pull_image(&self, image: &str, progress: &ProgressReporter)
        -> Result<(), ContainerError>;

    /// Create and start a container; returns its identifier.
    async fn create_container(&self, opts: &CreateContainerOptions)
        -> Result<String, ContainerError>;

    async fn exec(
        &self,
        container_id: &str,
        cmd: &[String],
        env: &HashMap<String, String>,
        workdir: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, ContainerError>;

    /// Unpack a tar stream into `target_path` inside the container.
    async fn copy_in(
        &self,
        container_id: &str,
        tar: Vec<u8>,
        target_path: &str,
    ) -> Result<(), ContainerError>;

    /// Pack `source_path` inside the container into a tar stream.
    async fn copy_out(&self, container_id: &str, source_path: &str)
        -> Result<Vec<u8>, ContainerError>;

    /// Stop and remove the container.
    async fn remove_container(&self, container_id: &str) -> Result<(), ContainerError>;
}

// =============================================================================
// Image name mapping
// =============================================================================

static IMAGE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?:[a-zA-Z0-9]+(?:[.-][a-zA-Z0-9]+)*(?::[0-9]+)?)/)?[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*(?::[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127})?(?:@sha256:[a-fA-F0-9]{64})?$",
    )
    .expect("image reference pattern")
});

/// Whether `name` is a syntactically valid `[registry/]repository[:tag][@digest]`.
pub fn is_valid_image_reference(name: &str) -> bool {
    !name.is_empty() && IMAGE_REFERENCE.is_match(name)
}

/// Map a runner selector to a container image: known hosted labels go
/// through the table, anything matching the image grammar passes unchanged.
pub fn map_runs_on(runs_on: &str) -> Result<String, ContainerError> {
    let image = match runs_on {
        "ubuntu-latest" => "ubuntu:latest",
        "ubuntu-24.04" => "ubuntu:24.04",
        "ubuntu-22.04" => "ubuntu:22.04",
        "ubuntu-20.04" => "ubuntu:20.04",
        "windows-latest" | "windows-2022" => "mcr.microsoft.com/windows/servercore:ltsc2022",
        "windows-2019" => "mcr.microsoft.com/windows/servercore:ltsc2019",
        other => {
            if is_valid_image_reference(other) {
                other
            } else {
                return Err(ContainerError::InvalidImage(other.to_string()));
            }
        }
    };
    Ok(image.to_string())
}

// =============================================================================
// Docker CLI implementation
// =============================================================================

/// Container manager backed by the `docker` command-line client.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(Stdio::null());
        cmd
    }

    async fn run_docker(&self, args: &[String]) -> Result<std::process::Output, ContainerError> {
        self.command()
            .args(args)
            .output()
            .await
            .map_err(|e| self.classify_spawn_error(e))
    }

    fn classify_spawn_error(&self, err: std::io::Error) -> ContainerError {
        if err.kind() == std::io::ErrorKind::NotFound {
            ContainerError::DaemonNotInstalled
        } else {
            ContainerError::Io(err)
        }
    }

    fn classify_stderr(stderr: &str) -> Option<ContainerError> {
        let lower = stderr.to_lowercase();
        if lower.contains("cannot connect to the docker daemon")
            || lower.contains("is the docker daemon running")
        {
            Some(ContainerError::DaemonNotRunning(stderr.trim().to_string()))
        } else if lower.contains("permission denied") {
            Some(ContainerError::PermissionDenied(stderr.trim().to_string()))
        } else if lower.contains("no such image")
            || lower.contains("pull access denied")
            || lower.contains("manifest unknown")
            || lower.contains("not found: manifest")
        {
            Some(ContainerError::ImageNotFound(stderr.trim().to_string()))
        } else {
            None
        }
    }

    async fn image_present(&self, image: &str) -> Result<bool, ContainerError> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            image.to_string(),
        ];
        let output = self.run_docker(&args).await?;
        Ok(output.status.success())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerManager for DockerCli {
    async fn ping(&self) -> Result<(), ContainerError> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        let output = self.run_docker(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        Err(Self::classify_stderr(&stderr)
            .unwrap_or(ContainerError::DaemonNotRunning(stderr.trim().to_string())))
    }

    async fn pull_image(
        &self,
        image: &str,
        progress: &ProgressReporter,
    ) -> Result<(), ContainerError> {
        if self.image_present(image).await? {
            log::debug!("image {} already present, skipping pull", image);
            return Ok(());
        }

        progress.image_pull(&format!("pulling image {}", image));
        log::info!("pulling image {}", image);

        let mut child = self
            .command()
            .args(["pull", image])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.classify_spawn_error(e))?;

        // Forward pull progress lines as they arrive.
        if let Some(stdout) = child.stdout.take() {
            use tokio::io::AsyncBufReadExt;
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                progress.image_pull(&line);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(ContainerError::Io)?;
        if output.status.success() {
            progress.image_pull(&format!("image {} ready", image));
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(Self::classify_stderr(&stderr)
                .unwrap_or_else(|| ContainerError::PullFailed(stderr.trim().to_string())))
        }
    }

    async fn create_container(
        &self,
        opts: &CreateContainerOptions,
    ) -> Result<String, ContainerError> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            opts.name.clone(),
            "-w".to_string(),
            opts.working_dir.clone(),
            "-v".to_string(),
            format!("{}:/workspace", opts.workspace.display()),
        ];
        for (key, value) in &opts.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(opts.image.clone());
        // Keep the container alive for exec sessions.
        args.push("tail".to_string());
        args.push("-f".to_string());
        args.push("/dev/null".to_string());

        let output = self.run_docker(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(Self::classify_stderr(&stderr)
                .unwrap_or_else(|| ContainerError::CreateFailed(stderr.trim().to_string())));
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let start_args = vec!["start".to_string(), opts.name.clone()];
        let start = self.run_docker(&start_args).await?;
        if !start.status.success() {
            let stderr = String::from_utf8_lossy(&start.stderr).to_string();
            return Err(ContainerError::CreateFailed(stderr.trim().to_string()));
        }

        log::debug!("created container {} ({})", opts.name, container_id);
        Ok(container_id)
    }

    async fn exec(
        &self,
        container_id: &str,
        cmd: &[String],
        env: &HashMap<String, String>,
        workdir: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, ContainerError> {
        let mut args = vec!["exec".to_string()];
        if let Some(workdir) = workdir {
            args.push("-w".to_string());
            args.push(workdir.to_string());
        }
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(container_id.to_string());
        args.extend(cmd.iter().cloned());

        let mut child = self
            .command()
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The exec client dies with its future, e.g. on step timeout.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.classify_spawn_error(e))?;

        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdout_pipe.read_to_string(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf).await;
            buf
        });

        // The wait future's borrow of `child` ends with the select, so the
        // cancel path below can still reach the child to kill it.
        let waited = {
            let wait = child.wait();
            tokio::select! {
                status = wait => Some(status),
                _ = cancel.cancelled() => None,
            }
        };
        let status = match waited {
            Some(status) => status.map_err(ContainerError::Io)?,
            None => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ContainerError::Cancelled);
            }
        };

        Ok(ExecResult {
            stdout: stdout_task.await.unwrap_or_default(),
            stderr: stderr_task.await.unwrap_or_default(),
            exit_code: status.code().unwrap_or(-1),
        })
    }

    async fn copy_in(
        &self,
        container_id: &str,
        tar: Vec<u8>,
        target_path: &str,
    ) -> Result<(), ContainerError> {
        let mut child = Command::new(&self.binary)
            .args(["cp", "-", &format!("{}:{}", container_id, target_path)])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.classify_spawn_error(e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&tar)
                .await
                .map_err(|e| ContainerError::CopyFailed(e.to_string()))?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(ContainerError::Io)?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(ContainerError::CopyFailed(stderr.trim().to_string()))
        }
    }

    async fn copy_out(
        &self,
        container_id: &str,
        source_path: &str,
    ) -> Result<Vec<u8>, ContainerError> {
        let output = self
            .command()
            .args(["cp", &format!("{}:{}", container_id, source_path), "-"])
            .output()
            .await
            .map_err(|e| self.classify_spawn_error(e))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(ContainerError::CopyFailed(stderr.trim().to_string()))
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), ContainerError> {
        // Graceful stop first, then force removal.
        let stop_args = vec![
            "stop".to_string(),
            "--time".to_string(),
            "5".to_string(),
            container_id.to_string(),
        ];
        let _ = self.run_docker(&stop_args).await;

        let rm_args = vec!["rm".to_string(), "-f".to_string(), container_id.to_string()];
        let output = self.run_docker(&rm_args).await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(ContainerError::RemoveFailed(stderr.trim().to_string()))
        }
    }
}
