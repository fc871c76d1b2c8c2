// Host Process Executor
// Shell-dispatched command execution on the developer machine: platform
// shell selection, output capture, timeouts, and process-tree kill.

use crate::container::ExecResult;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Default per-step timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Exit code reported when a step times out.
pub const EXIT_TIMEOUT: i32 = -1;

/// Exit code reported when a step is cancelled.
pub const EXIT_CANCELLED: i32 = -2;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("shell '{0}' not found on PATH")]
    ShellNotFound(String),

    #[error("required tool '{0}' not found on PATH")]
    ToolNotFound(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The platform a host step executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
    Unknown,
}

impl Platform {
    pub fn detect() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::Linux => write!(f, "linux"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Unknown => write!(f, "unknown"),
        }
    }
}

/// Escape content for embedding inside a double-quoted shell string.
/// Backslashes and quotes are escaped everywhere; `$` and backtick only
/// under bash, where they would otherwise expand.
pub fn escape_for_shell(platform: Platform, content: &str) -> String {
    let mut escaped = String::with_capacity(content.len());
    for c in content.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '$' if platform != Platform::Windows => escaped.push_str("\\$"),
            '`' if platform != Platform::Windows => escaped.push_str("\\`"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Quote a path or argument for the platform shell.
pub fn quote_argument(platform: Platform, argument: &str) -> String {
    format!("\"{}\"", escape_for_shell(platform, argument))
}

/// Fail with a typed precondition error when a tool is missing from PATH.
pub fn require_tool(name: &str) -> Result<PathBuf, ProcessError> {
    which::which(name).map_err(|_| ProcessError::ToolNotFound(name.to_string()))
}

/// Callback receiving `(line, is_stderr)` as output arrives.
pub type OutputCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Runs command lines through the platform shell.
#[derive(Debug, Clone, Copy)]
pub struct HostProcessExecutor {
    platform: Platform,
}

impl HostProcessExecutor {
    pub fn new() -> Self {
        Self {
            platform: Platform::detect(),
        }
    }

    pub fn with_platform(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// The shell invocation for a command line: `cmd.exe /c "..."` on
    /// Windows, `bash -c "..."` elsewhere.
    pub fn shell_invocation(&self, line: &str) -> (String, Vec<String>) {
        match self.platform {
            Platform::Windows => (
                "cmd.exe".to_string(),
                vec!["/c".to_string(), line.to_string()],
            ),
            _ => ("bash".to_string(), vec!["-c".to_string(), line.to_string()]),
        }
    }

    /// Run a command line and capture its output. Timeout expiry reports
    /// exit code -1 and cancellation -2; in both cases the whole process
    /// tree is killed.
    pub async fn run(
        &self,
        line: &str,
        env: &HashMap<String, String>,
        workdir: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
        on_line: Option<OutputCallback>,
    ) -> Result<ExecResult, ProcessError> {
        let (shell, args) = self.shell_invocation(line);

        let mut cmd = Command::new(&shell);
        cmd.args(&args);
        cmd.envs(env);
        cmd.current_dir(workdir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::ShellNotFound(shell.clone())
            } else {
                ProcessError::SpawnFailed(e.to_string())
            }
        })?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let stdout_cb = on_line.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(cb) = &stdout_cb {
                    cb(&line, false);
                }
                if !collected.is_empty() {
                    collected.push('\n');
                }
                collected.push_str(&line);
            }
            collected
        });

        let stderr_cb = on_line;
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(cb) = &stderr_cb {
                    cb(&line, true);
                }
                if !collected.is_empty() {
                    collected.push('\n');
                }
                collected.push_str(&line);
            }
            collected
        });

        // Whether the process finished, was cancelled, or ran out of time.
        // The wait future's borrow of `child` ends with this block, so the
        // kill paths below can reach the child again.
        enum Waited {
            Done(std::io::Result<std::process::ExitStatus>),
            Cancelled,
            TimedOut,
        }

        let waited = {
            let wait = child.wait();
            tokio::select! {
                status = wait => Waited::Done(status),
                _ = cancel.cancelled() => Waited::Cancelled,
                _ = tokio::time::sleep(timeout) => Waited::TimedOut,
            }
        };

        let exit_code = match waited {
            Waited::Done(status) => status?.code().unwrap_or(EXIT_TIMEOUT),
            Waited::Cancelled => {
                kill_process_tree(&mut child).await;
                let stdout = stdout_task.await.unwrap_or_default();
                let mut stderr = stderr_task.await.unwrap_or_default();
                if !stderr.is_empty() {
                    stderr.push('\n');
                }
                stderr.push_str("process cancelled");
                return Ok(ExecResult { stdout, stderr, exit_code: EXIT_CANCELLED });
            }
            Waited::TimedOut => {
                kill_process_tree(&mut child).await;
                let stdout = stdout_task.await.unwrap_or_default();
                let mut stderr = stderr_task.await.unwrap_or_default();
                if !stderr.is_empty() {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("process timed out after {}s", timeout.as_secs()));
                return Ok(ExecResult { stdout, stderr, exit_code: EXIT_TIMEOUT });
            }
        };

        Ok(ExecResult {
            stdout: stdout_task.await.unwrap_or_default(),
            stderr: stderr_task.await.unwrap_or_default(),
            exit_code,
        })
    }
}

impl Default for HostProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Kill the child and everything it spawned.
async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // The child leads its own process group (process_group(0) at spawn),
        // so a negative pid signal reaches the whole tree.
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> HostProcessExecutor {
        HostProcessExecutor::new()
    }

    #[test]
    fn test_platform_detect_is_stable() {
        assert_eq!(Platform::detect(), Platform::detect());
    }

    #[test]
    fn test_escape_for_shell_bash() {
        let escaped = escape_for_shell(Platform::Linux, r#"say "hi" $HOME `id` c:\tmp"#);
        assert_eq!(escaped, r#"say \"hi\" \$HOME \`id\` c:\\tmp"#);
    }

    #[test]
    fn test_escape_for_shell_windows_keeps_dollar() {
        let escaped = escape_for_shell(Platform::Windows, r#"echo "$env:USER""#);
        assert_eq!(escaped, r#"echo \"$env:USER\""#);
    }

    #[test]
    fn test_shell_invocation_per_platform() {
        let (shell, args) = HostProcessExecutor::with_platform(Platform::Linux)
            .shell_invocation("echo hi");
        assert_eq!(shell, "bash");
        assert_eq!(args, vec!["-c", "echo hi"]);

        let (shell, args) = HostProcessExecutor::with_platform(Platform::Windows)
            .shell_invocation("echo hi");
        assert_eq!(shell, "cmd.exe");
        assert_eq!(args, vec!["/c", "echo hi"]);
    }

    #[test]
    fn test_require_tool() {
        // `sh` exists on any unix test machine; a nonsense name does not.
        assert!(require_tool("definitely-not-a-real-tool-xyz").is_err());
    }

    #[tokio::test]
    async fn test_run_captures_stdout_and_exit_code() {
        let result = executor()
            .run(
                "echo hello",
                &HashMap::new(),
                &std::env::current_dir().unwrap(),
                DEFAULT_STEP_TIMEOUT,
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_reports_nonzero_exit() {
        let result = executor()
            .run(
                "exit 42",
                &HashMap::new(),
                &std::env::current_dir().unwrap(),
                DEFAULT_STEP_TIMEOUT,
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, 42);
    }

    #[tokio::test]
    async fn test_run_passes_environment() {
        let mut env = HashMap::new();
        env.insert("PDK_TEST_VALUE".to_string(), "from-env".to_string());
        let result = executor()
            .run(
                "echo $PDK_TEST_VALUE",
                &env,
                &std::env::current_dir().unwrap(),
                DEFAULT_STEP_TIMEOUT,
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert!(result.stdout.contains("from-env"));
    }

    #[tokio::test]
    async fn test_run_captures_stderr() {
        let result = executor()
            .run(
                "echo oops >&2",
                &HashMap::new(),
                &std::env::current_dir().unwrap(),
                DEFAULT_STEP_TIMEOUT,
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reports_minus_one() {
        let result = executor()
            .run(
                "sleep 30",
                &HashMap::new(),
                &std::env::current_dir().unwrap(),
                Duration::from_millis(200),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, EXIT_TIMEOUT);
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancel_kills_and_reports_minus_two() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = executor()
            .run(
                "sleep 30",
                &HashMap::new(),
                &std::env::current_dir().unwrap(),
                DEFAULT_STEP_TIMEOUT,
                &cancel,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, EXIT_CANCELLED);
        assert!(result.stderr.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_output_callback_receives_lines() {
        use std::sync::Mutex;
        let lines: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let callback: OutputCallback = Arc::new(move |line, is_err| {
            sink.lock().unwrap().push((line.to_string(), is_err));
        });

        let _ = executor()
            .run(
                "echo one; echo two >&2",
                &HashMap::new(),
                &std::env::current_dir().unwrap(),
                DEFAULT_STEP_TIMEOUT,
                &CancellationToken::new(),
                Some(callback),
            )
            .await
            .unwrap();

        let seen = lines.lock().unwrap();
        assert!(seen.iter().any(|(l, e)| l == "one" && !*e));
        assert!(seen.iter().any(|(l, e)| l == "two" && *e));
    }
}
