// Toolchain Step Executors
// Compose tool command lines (dotnet, npm, python, maven, gradle) from
// structured inputs using a closed per-tool grammar.

use crate::model::{ExecutionContext, ExecutionTarget, Step, StepExecutionResult, StepKind};
use crate::process::{require_tool, DEFAULT_STEP_TIMEOUT};
use crate::steps::{run_outcome_to_result, StepExecutor};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Executor for toolchain kinds; the registered kind picks the grammar.
pub struct ToolchainExecutor {
    kind: StepKind,
}

impl ToolchainExecutor {
    pub fn new(kind: StepKind) -> Self {
        debug_assert!(matches!(
            kind,
            StepKind::Dotnet | StepKind::Npm | StepKind::Python | StepKind::Maven | StepKind::Gradle
        ));
        Self { kind }
    }

    /// Compose the command line for this step, or a typed grammar error.
    pub fn compose(&self, step: &Step) -> Result<String, String> {
        let command = step.with.get("command").map(String::as_str);
        let arguments = step
            .with
            .get("arguments")
            .or_else(|| step.with.get("args"))
            .map(String::as_str)
            .unwrap_or("");

        let line = match self.kind {
            StepKind::Dotnet => {
                const COMMANDS: &[&str] =
                    &["build", "test", "publish", "restore", "run", "pack", "clean"];
                let command = match command {
                    // A bare setup step just proves the toolchain is present.
                    None => return Ok("dotnet --version".to_string()),
                    Some(c) if COMMANDS.contains(&c) => c,
                    Some(other) => {
                        return Err(grammar_error("dotnet", other, COMMANDS));
                    }
                };
                let projects = step.with.get("projects").map(String::as_str).unwrap_or("");
                join_line(&["dotnet", command, projects, arguments])
            }
            StepKind::Npm => {
                const COMMANDS: &[&str] = &["install", "ci", "test", "run", "publish", "audit"];
                let command = match command {
                    None => return Ok("npm --version".to_string()),
                    Some(c) if COMMANDS.contains(&c) => c,
                    Some(other) => return Err(grammar_error("npm", other, COMMANDS)),
                };
                let script = if command == "run" {
                    step.with.get("script").map(String::as_str).unwrap_or("")
                } else {
                    ""
                };
                join_line(&["npm", command, script, arguments])
            }
            StepKind::Python => {
                const COMMANDS: &[&str] = &["script", "module", "pip"];
                let command = match command {
                    None => {
                        // PythonScript tasks carry the target without a command.
                        if let Some(target) = step
                            .with
                            .get("scriptPath")
                            .or_else(|| step.with.get("script"))
                        {
                            return Ok(join_line(&["python", target, arguments]));
                        }
                        return Ok("python --version".to_string());
                    }
                    Some(c) if COMMANDS.contains(&c) => c,
                    Some(other) => return Err(grammar_error("python", other, COMMANDS)),
                };
                match command {
                    "script" => {
                        let target = step
                            .with
                            .get("scriptPath")
                            .or_else(|| step.with.get("script"))
                            .or_else(|| step.with.get("target"))
                            .map(String::as_str)
                            .ok_or_else(|| "python script command needs a scriptPath".to_string())?;
                        join_line(&["python", target, arguments])
                    }
                    "module" => {
                        let module = step
                            .with
                            .get("module")
                            .or_else(|| step.with.get("target"))
                            .map(String::as_str)
                            .ok_or_else(|| "python module command needs a module name".to_string())?;
                        join_line(&["python", "-m", module, arguments])
                    }
                    _ => {
                        let packages = step
                            .with
                            .get("packages")
                            .map(String::as_str)
                            .unwrap_or(arguments);
                        join_line(&["pip", "install", packages])
                    }
                }
            }
            StepKind::Maven => {
                const GOALS: &[&str] = &[
                    "clean", "compile", "test", "package", "install", "verify", "deploy",
                ];
                let goals = step
                    .with
                    .get("goals")
                    .map(String::as_str)
                    .or(command)
                    .unwrap_or("");
                if goals.is_empty() {
                    return Ok("mvn --version".to_string());
                }
                for goal in goals.split_whitespace() {
                    if !GOALS.contains(&goal) {
                        return Err(grammar_error("maven", goal, GOALS));
                    }
                }
                let options = step.with.get("options").map(String::as_str).unwrap_or("");
                join_line(&["mvn", goals, options, arguments])
            }
            StepKind::Gradle => {
                const TASKS: &[&str] = &["build", "test", "assemble", "check", "clean"];
                let tasks = step
                    .with
                    .get("tasks")
                    .map(String::as_str)
                    .or(command)
                    .unwrap_or("");
                if tasks.is_empty() {
                    return Ok("gradle --version".to_string());
                }
                for task in tasks.split_whitespace() {
                    if !TASKS.contains(&task) {
                        return Err(grammar_error("gradle", task, TASKS));
                    }
                }
                join_line(&["gradle", tasks, arguments])
            }
            other => return Err(format!("not a toolchain step kind: {}", other)),
        };
        Ok(line)
    }
}

fn grammar_error(tool: &str, got: &str, expected: &[&str]) -> String {
    format!(
        "unknown {} command '{}' (expected one of: {})",
        tool,
        got,
        expected.join(", ")
    )
}

fn join_line(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl StepExecutor for ToolchainExecutor {
    fn kind(&self) -> StepKind {
        self.kind
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepExecutionResult {
        let started_at = Utc::now();
        let line = match self.compose(step) {
            Ok(line) => line,
            Err(message) => return StepExecutionResult::failed(&step.name, message, started_at),
        };

        // On the host, a missing tool is a precondition failure, not a
        // shell "command not found" late in the run.
        if matches!(ctx.target, ExecutionTarget::Host { .. }) {
            let program = line.split_whitespace().next().unwrap_or("");
            if let Err(e) = require_tool(program) {
                return StepExecutionResult::failed(&step.name, e.to_string(), started_at);
            }
        }

        log::debug!("toolchain step '{}' runs: {}", step.name, line);
        let timeout = step.timeout.unwrap_or(DEFAULT_STEP_TIMEOUT);
        let outcome = ctx
            .run_command_line(
                &line,
                &HashMap::new(),
                step.working_directory.as_deref(),
                timeout,
                cancel,
            )
            .await;
        run_outcome_to_result(&step.name, outcome, started_at)
    }
}
