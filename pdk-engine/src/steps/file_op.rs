// File Operation Step Executor
// Copy, move, delete, and mkdir composed as shell commands in the target.

use crate::model::{ExecutionContext, ExecutionTarget, Step, StepExecutionResult, StepKind};
use crate::process::{Platform, DEFAULT_STEP_TIMEOUT};
use crate::steps::{run_outcome_to_result, StepExecutor};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub struct FileOperationExecutor;

const OPERATIONS: &[&str] = &["copy", "move", "delete", "mkdir"];

impl FileOperationExecutor {
    pub fn compose(step: &Step, platform: Platform) -> Result<String, String> {
        let operation = step
            .with
            .get("operation")
            .map(String::as_str)
            // CopyFiles / DeleteFiles tasks imply their operation.
            .or_else(|| match step.with.get("task").map(String::as_str) {
                Some("CopyFiles") => Some("copy"),
                Some("DeleteFiles") => Some("delete"),
                _ => None,
            })
            .ok_or_else(|| "file operation step needs an 'operation' input".to_string())?;

        if !OPERATIONS.contains(&operation) {
            return Err(format!(
                "unknown file operation '{}' (expected one of: {})",
                operation,
                OPERATIONS.join(", ")
            ));
        }

        let source = step
            .with
            .get("source")
            .or_else(|| step.with.get("sourceFolder"))
            .map(String::as_str);
        let target = step
            .with
            .get("destination")
            .or_else(|| step.with.get("targetFolder"))
            .or_else(|| step.with.get("target"))
            .map(String::as_str);

        let windows = platform == Platform::Windows;
        let line = match operation {
            "copy" => {
                let source = source.ok_or("copy needs a 'source' input")?;
                let target = target.ok_or("copy needs a 'destination' input")?;
                if windows {
                    format!("xcopy /E /I /Y \"{}\" \"{}\"", source, target)
                } else {
                    format!("cp -r \"{}\" \"{}\"", source, target)
                }
            }
            "move" => {
                let source = source.ok_or("move needs a 'source' input")?;
                let target = target.ok_or("move needs a 'destination' input")?;
                if windows {
                    format!("move /Y \"{}\" \"{}\"", source, target)
                } else {
                    format!("mv \"{}\" \"{}\"", source, target)
                }
            }
            "delete" => {
                let target = target.or(source).ok_or("delete needs a target")?;
                if windows {
                    format!("rmdir /S /Q \"{}\"", target)
                } else {
                    format!("rm -rf \"{}\"", target)
                }
            }
            _ => {
                let target = target.or(source).ok_or("mkdir needs a target")?;
                if windows {
                    format!("mkdir \"{}\"", target)
                } else {
                    format!("mkdir -p \"{}\"", target)
                }
            }
        };
        Ok(line)
    }
}

#[async_trait]
impl StepExecutor for FileOperationExecutor {
    fn kind(&self) -> StepKind {
        StepKind::FileOperation
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepExecutionResult {
        let started_at = Utc::now();
        let platform = match &ctx.target {
            ExecutionTarget::Host { platform } => *platform,
            ExecutionTarget::Container { .. } => Platform::Linux,
        };
        let line = match Self::compose(step, platform) {
            Ok(line) => line,
            Err(message) => return StepExecutionResult::failed(&step.name, message, started_at),
        };

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
