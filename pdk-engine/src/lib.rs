// PDK Engine
// Local pipeline execution: parses GitHub Actions and Azure DevOps YAML into
// a common model and runs the jobs in containers or on the host.

pub mod config;
pub mod container;
pub mod error;
pub mod exec;
pub mod filter;
pub mod logging;
pub mod model;
pub mod parser;
pub mod planner;
pub mod process;
pub mod progress;
pub mod runner;
pub mod secrets;
pub mod steps;
pub mod validation;
pub mod variables;

// Re-export commonly used types
pub use error::{EngineError, EngineResult};

// Re-export model types
pub use model::{
    ExecutionContext, Job, JobExecutionResult, Pipeline, Provider, Step, StepExecutionResult,
    StepKind,
};

// Re-export parser types
pub use parser::{AzureParser, GitHubParser, ParseError, ParseResult, ParserFactory, PipelineParser};

// Re-export execution types
pub use exec::{ExecutorConfig, PipelineExecutionResult, PipelineExecutor};
pub use progress::{progress_channel, ProgressEvent, ProgressMode, ProgressReceiver, ProgressSender};
pub use runner::{DockerJobRunner, FilteringRunner, HostJobRunner, JobRunner, RunnerPolicy};

// Re-export validation and support types
pub use config::PdkConfig;
pub use filter::{CompositeFilter, FilterResult, StepFilter};
pub use secrets::{SecretManager, SecretStore};
pub use validation::{Severity, ValidationIssue, ValidationReport, Validator};
pub use variables::{VariableResolver, VariableSource};
