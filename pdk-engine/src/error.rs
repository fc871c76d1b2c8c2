// Engine Error Types
// Top-level error taxonomy; container and host process errors live next to
// their subsystems and convert into this type at the seams.

use crate::container::ContainerError;
use crate::model::StepKind;
use crate::parser::error::ParseError;
use crate::process::ProcessError;

use thiserror::Error;

/// Errors surfaced by the engine outside of step results.
///
/// Step failures are reported through `StepExecutionResult`, never through
/// this type; runners also keep cleanup failures out of it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("no parser for {path}: registered parsers: {registered}")]
    NoParser { path: String, registered: String },

    #[error("no executor registered for step kind {kind} (registered: {registered})")]
    NoExecutor { kind: StepKind, registered: String },

    #[error("internal invariant violation: {0}")]
    Invariant(String),

    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
