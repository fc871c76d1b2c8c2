// Parser Error Types
// Parse failures carry file/line context, a source excerpt, and a suggestion
// where a common mistake is recognizable.

use std::fmt;
use std::path::Path;

/// Detailed parse error with location and context.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    /// Source file, when parsing from disk
    pub file: Option<String>,
    /// Line number (1-indexed, 0 when unknown)
    pub line: usize,
    /// Column number (1-indexed, 0 when unknown)
    pub column: usize,
    /// A few source lines around the error
    pub context: String,
    pub suggestion: Option<String>,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// YAML syntax error
    YamlSyntax,
    /// Structurally invalid pipeline (wrong types, missing fields)
    InvalidSchema,
    /// Semantic error: duplicate identifier, bad reference, cycle
    InvalidPipeline,
    /// File could not be read
    IoError,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: 0,
            column: 0,
            context: String::new(),
            suggestion: None,
            kind: ParseErrorKind::InvalidPipeline,
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ParseErrorKind::IoError)
    }

    pub fn with_location(mut self, line: usize, column: usize) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_file(mut self, path: &Path) -> Self {
        self.file = Some(path.display().to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attach an excerpt of the source around the error line.
    pub fn with_source_context(mut self, source: &str, context_lines: usize) -> Self {
        if self.line == 0 {
            return self;
        }
        let lines: Vec<&str> = source.lines().collect();
        let start = self.line.saturating_sub(context_lines + 1);
        let end = (self.line + context_lines).min(lines.len());

        let mut context = String::new();
        for (i, line) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = i + 1;
            let prefix = if line_num == self.line { ">" } else { " " };
            context.push_str(&format!("{} {:4} | {}\n", prefix, line_num, line));
        }
        self.context = context;
        self
    }

    /// Build from a serde_yaml error, mining it for a usable message and a
    /// suggestion for the common mistakes.
    pub fn from_yaml(err: &serde_yaml::Error, source: &str) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((0, 0));

        let message = readable_yaml_message(err);
        let suggestion = suggest_fix(&message, source, line);

        let mut parsed = ParseError::new(message)
            .with_kind(ParseErrorKind::YamlSyntax)
            .with_location(line, column)
            .with_source_context(source, 2);
        parsed.suggestion = suggestion;
        parsed
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {}", self.message)?;
        match (&self.file, self.line) {
            (Some(file), 0) => write!(f, "\n  --> {}", file)?,
            (Some(file), line) => write!(f, "\n  --> {}:{}:{}", file, line, self.column)?,
            (None, 0) => {}
            (None, line) => write!(f, "\n  --> line {}:{}", line, self.column)?,
        }
        if !self.context.is_empty() {
            write!(f, "\n\n{}", self.context)?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nhelp: {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Clean up the raw serde_yaml message into something readable.
fn readable_yaml_message(err: &serde_yaml::Error) -> String {
    let msg = err.to_string();

    if let Some(field) = extract_between(&msg, "missing field `", "`") {
        return format!("missing required field '{}'", field);
    }
    if let Some(field) = extract_between(&msg, "unknown field `", "`") {
        return format!("unknown field '{}'", field);
    }
    if msg.contains("invalid type") {
        if let (Some(expected), Some(found)) = (
            extract_between(&msg, "expected ", ","),
            extract_between(&msg, "found ", " at"),
        ) {
            return format!("expected {}, but found {}", expected, found);
        }
    }
    msg
}

fn extract_between(msg: &str, prefix: &str, suffix: &str) -> Option<String> {
    let start = msg.find(prefix)? + prefix.len();
    let end = msg[start..].find(suffix)? + start;
    Some(msg[start..end].to_string())
}

/// Suggest fixes for common authoring mistakes.
fn suggest_fix(message: &str, source: &str, line: usize) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    let error_line = lines.get(line.saturating_sub(1)).copied().unwrap_or("");

    if message.contains("missing required field 'steps'") {
        return Some("every job needs a 'steps:' list defining what it does".to_string());
    }

    if error_line.starts_with('\t') {
        return Some("YAML requires spaces for indentation, not tabs".to_string());
    }

    let typo_suggestions = [
        ("dependson", "dependsOn"),
        ("displayname", "displayName"),
        ("vmimage", "vmImage"),
        ("workingdirectory", "workingDirectory"),
        ("runson", "runs-on"),
        ("continueonerror", "continueOnError"),
    ];
    let lower_line = error_line.to_lowercase().replace([' ', '-', '_'], "");
    for (typo, correct) in typo_suggestions {
        if lower_line.contains(typo) && !error_line.contains(correct) {
            return Some(format!("did you mean '{}'?", correct));
        }
    }

    None
}

/// Result type for parser operations.
pub type ParseResult<T> = Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_file_and_location() {
        let err = ParseError::new("duplicate job identifier 'build'")
            .with_file(Path::new("ci.yml"))
            .with_location(12, 3);
        let text = format!("{}", err);
        assert!(text.contains("duplicate job identifier"));
        assert!(text.contains("ci.yml:12:3"));
    }

    #[test]
    fn test_display_with_suggestion() {
        let err = ParseError::new("job 'test' has no steps")
            .with_suggestion("add a 'steps:' list to the job");
        let text = format!("{}", err);
        assert!(text.contains("help: add a 'steps:'"));
    }

    #[test]
    fn test_source_context_marks_error_line() {
        let source = "jobs:\n  build:\n    runs-on: ubuntu-latest\n";
        let err = ParseError::new("boom").with_location(2, 3).with_source_context(source, 1);
        assert!(err.context.contains(">    2 |   build:"));
        assert!(err.context.contains("     1 | jobs:"));
    }

    #[test]
    fn test_from_yaml_missing_field() {
        let yaml = "jobs:\n  - job: Build\n";
        let err = serde_yaml::from_str::<serde_yaml::Value>("a: [")
            .expect_err("invalid yaml must fail");
        let parsed = ParseError::from_yaml(&err, yaml);
        assert_eq!(parsed.kind, ParseErrorKind::YamlSyntax);
        assert!(!parsed.message.is_empty());
    }

    #[test]
    fn test_tab_indentation_suggestion() {
        let source = "jobs:\n\tbuild: x\n";
        let suggestion = suggest_fix("expected mapping", source, 2);
        assert!(suggestion.unwrap().contains("spaces"));
    }
}
