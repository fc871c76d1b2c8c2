// Step Executors
// Kind-specific components that turn a step into a concrete command
// invocation. Lookup is a total function over the registered kinds.

pub mod artifact;
pub mod checkout;
pub mod docker_step;
pub mod file_op;
pub mod script;
pub mod toolchain;

pub use artifact::{DownloadArtifactExecutor, UploadArtifactExecutor};
pub use checkout::CheckoutExecutor;
pub use docker_step::DockerStepExecutor;
pub use file_op::FileOperationExecutor;
pub use script::ScriptExecutor;
pub use toolchain::ToolchainExecutor;

use crate::error::EngineError;
use crate::model::{ExecutionContext, Step, StepExecutionResult, StepKind};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A step executor. Executors never mutate the context, must respect
/// cancellation, and always return a result: internal failures become
/// `success=false, exit_code=-1` with the message in the error output.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn kind(&self) -> StepKind;

    async fn execute(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepExecutionResult;
}

impl std::fmt::Debug for dyn StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor").field("kind", &self.kind()).finish()
    }
}

/// Explicit kind → executor table.
pub struct ExecutorRegistry {
    executors: HashMap<StepKind, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registry with every built-in executor.
    pub fn with_default_executors() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ScriptExecutor::new(StepKind::Script)));
        registry.register(Arc::new(ScriptExecutor::new(StepKind::Bash)));
        registry.register(Arc::new(ScriptExecutor::new(StepKind::PowerShell)));
        registry.register(Arc::new(CheckoutExecutor));
        registry.register(Arc::new(ToolchainExecutor::new(StepKind::Dotnet)));
        registry.register(Arc::new(ToolchainExecutor::new(StepKind::Npm)));
        registry.register(Arc::new(ToolchainExecutor::new(StepKind::Python)));
        registry.register(Arc::new(ToolchainExecutor::new(StepKind::Maven)));
        registry.register(Arc::new(ToolchainExecutor::new(StepKind::Gradle)));
        registry.register(Arc::new(DockerStepExecutor));
        registry.register(Arc::new(FileOperationExecutor));
        registry.register(Arc::new(UploadArtifactExecutor));
        registry.register(Arc::new(DownloadArtifactExecutor));
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(executor.kind(), executor);
    }

    /// Resolve the executor for a step kind, or fail with the typed
    /// "no executor" error listing what is registered.
    pub fn resolve(&self, kind: StepKind) -> Result<Arc<dyn StepExecutor>, EngineError> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::NoExecutor {
                kind,
                registered: self.kind_names().join(", "),
            })
    }

    pub fn kinds(&self) -> Vec<StepKind> {
        let mut kinds: Vec<StepKind> = self.executors.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    fn kind_names(&self) -> Vec<String> {
        self.kinds().iter().map(|k| k.to_string()).collect()
    }
}

/// Fold a command outcome into a step result. Errors never cross the
/// executor boundary; cancellation reports exit code -2.
pub(crate) fn run_outcome_to_result(
    name: &str,
    outcome: Result<crate::container::ExecResult, crate::container::ContainerError>,
    started_at: chrono::DateTime<chrono::Utc>,
) -> StepExecutionResult {
    match outcome {
        Ok(exec) => StepExecutionResult::completed(name, &exec, started_at),
        Err(crate::container::ContainerError::Cancelled) => {
            let mut result = StepExecutionResult::failed(name, "cancelled", started_at);
            result.exit_code = crate::process::EXIT_CANCELLED;
            result
        }
        Err(err) => StepExecutionResult::failed(name, err.to_string(), started_at),
    }
}
