// Script Step Executors
// Writes the expanded script payload to a unique file, invokes the right
// interpreter, and removes the file whatever the outcome.

use crate::model::{ExecutionContext, ExecutionTarget, ShellHint, Step, StepExecutionResult, StepKind};
use crate::process::{quote_argument, Platform, DEFAULT_STEP_TIMEOUT};
use crate::steps::{run_outcome_to_result, StepExecutor};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Executor for `Script`, `Bash`, and `PowerShell` steps; the registered
/// kind tag decides the interpreter family.
pub struct ScriptExecutor {
    kind: StepKind,
}

impl ScriptExecutor {
    pub fn new(kind: StepKind) -> Self {
        debug_assert!(matches!(
            kind,
            StepKind::Script | StepKind::Bash | StepKind::PowerShell
        ));
        Self { kind }
    }

    /// Interpreter program and script extension for this step in this
    /// context. `None` means the file is invoked directly (cmd scripts).
    fn interpreter(&self, step: &Step, ctx: &ExecutionContext) -> (Option<&'static str>, &'static str) {
        let host_platform = match &ctx.target {
            ExecutionTarget::Host { platform } => Some(*platform),
            ExecutionTarget::Container { .. } => None,
        };

        let hint = match self.kind {
            StepKind::Bash => ShellHint::Bash,
            StepKind::PowerShell if step.shell == ShellHint::Default => ShellHint::Pwsh,
            _ => step.shell,
        };

        match hint {
            ShellHint::Bash => (Some("bash"), "sh"),
            ShellHint::Pwsh => (Some("pwsh"), "ps1"),
            ShellHint::PowerShell => match host_platform {
                Some(Platform::Windows) => (Some("powershell.exe"), "ps1"),
                _ => (Some("pwsh"), "ps1"),
            },
            ShellHint::Default => match host_platform {
                Some(Platform::Windows) => (None, "cmd"),
                Some(_) => (Some("bash"), "sh"),
                None => (Some("sh"), "sh"),
            },
        }
    }
}

#[async_trait]
impl StepExecutor for ScriptExecutor {
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

        let Some(script) = step
            .script
            .as_deref()
            .or_else(|| step.with.get("script").map(String::as_str))
        else {
            return StepExecutionResult::failed(&step.name, "step has no script payload", started_at);
        };

        let (interpreter, extension) = self.interpreter(step, ctx);
        let file_name = format!(
            "pdk-step-{}-{}.{}",
            ctx.artifact.step_index,
            &Uuid::new_v4().simple().to_string()[..8],
            extension
        );

        let path = match ctx.write_step_file(&file_name, script, true).await {
            Ok(path) => path,
            Err(e) => {
                return StepExecutionResult::failed(
                    &step.name,
                    format!("failed to stage script file: {}", e),
                    started_at,
                )
            }
        };

        let quote_platform = match &ctx.target {
            ExecutionTarget::Host { platform } => *platform,
            ExecutionTarget::Container { .. } => Platform::Linux,
        };
        let quoted = quote_argument(quote_platform, &path);
        let line = match interpreter {
            Some(program) => format!("{} {}", program, quoted),
            None => quoted,
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

        ctx.remove_step_file(&path).await;

        run_outcome_to_result(&step.name, outcome, started_at)
    }
}
