// Checkout Step Executor
// The workspace is already bind-mounted (or is the host directory), so a
// checkout is a no-op; a missing workspace would be a runner bug.

use crate::model::{ExecutionContext, Step, StepExecutionResult, StepKind};
use crate::steps::StepExecutor;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

pub struct CheckoutExecutor;

#[async_trait]
impl StepExecutor for CheckoutExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Checkout
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> StepExecutionResult {
        let started_at = Utc::now();
        if !ctx.workspace_is_mounted() {
            // Cloning a remote repository is outside local execution.
            return StepExecutionResult::failed(
                &step.name,
                "no workspace mounted and repository cloning is not supported",
                started_at,
            );
        }
        let exec = crate::container::ExecResult {
            stdout: format!("workspace already available at {}", ctx.workspace_path),
            stderr: String::new(),
            exit_code: 0,
        };
        log::debug!(
            "checkout step '{}' is a no-op, workspace mounted at {}",
            step.name,
            ctx.workspace_path
        );
        StepExecutionResult::completed(&step.name, &exec, started_at)
    }
}
