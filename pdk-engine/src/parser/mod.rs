// Parser Framework
// Provider detection and dispatch: the factory asks each registered parser
// whether it recognizes a file and hands parsing to the first that does.

pub mod azure;
pub mod error;
pub mod github;
pub mod graph;

pub use azure::AzureParser;
pub use error::{ParseError, ParseErrorKind, ParseResult};
pub use github::GitHubParser;

use crate::error::{EngineError, EngineResult};
use crate::model::Pipeline;

use std::path::Path;

/// One provider's parser. `can_parse` must be cheap enough to probe every
/// registered parser against a candidate file.
pub trait PipelineParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this parser recognizes the file (by extension and content markers).
    fn can_parse(&self, path: &Path, content: &str) -> bool;

    /// Parse the content into the common model, running parse-time validation.
    fn parse(&self, content: &str, path: &Path) -> ParseResult<Pipeline>;
}

impl<'a> std::fmt::Debug for dyn PipelineParser + 'a {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineParser").field("name", &self.name()).finish()
    }
}

/// Ordered collection of parsers; first match wins.
pub struct ParserFactory {
    parsers: Vec<Box<dyn PipelineParser>>,
}

impl ParserFactory {
    /// Factory with the built-in parsers (GitHub before Azure: a GitHub
    /// workflow is the more specific shape).
    pub fn new() -> Self {
        Self {
            parsers: vec![Box::new(GitHubParser), Box::new(AzureParser)],
        }
    }

    /// Factory with no parsers registered; use `register` to populate.
    pub fn empty() -> Self {
        Self { parsers: Vec::new() }
    }

    pub fn register(&mut self, parser: Box<dyn PipelineParser>) {
        self.parsers.push(parser);
    }

    pub fn registered_names(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    /// Select the first parser whose `can_parse` accepts the file.
    pub fn select(&self, path: &Path, content: &str) -> EngineResult<&dyn PipelineParser> {
        self.parsers
            .iter()
            .find(|p| p.can_parse(path, content))
            .map(|p| p.as_ref())
            .ok_or_else(|| EngineError::NoParser {
                path: path.display().to_string(),
                registered: self.registered_names().join(", "),
            })
    }

    /// Read, detect, and parse a pipeline file.
    pub fn parse_file(&self, path: &Path) -> EngineResult<Pipeline> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ParseError::io(format!("failed to read {}: {}", path.display(), e))
        })?;
        let parser = self.select(path, &content)?;
        log::debug!("parsing {} with the {} parser", path.display(), parser.name());
        let pipeline = parser.parse(&content, path)?;
        Ok(pipeline)
    }
}

impl Default for ParserFactory {
    fn default() -> Self {
        Self::new()
    }
}
