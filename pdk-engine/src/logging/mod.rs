// Logging Pipeline
// Structured logging behind the `log` facade: correlation-tagged records,
// masked messages, console + optional file sink with a bounded buffer.

pub mod correlation;

pub use correlation::{current as current_correlation_id, new_id as new_correlation_id, CorrelationScope};

use crate::secrets::global_masker;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// On-disk record format for the file sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Parse a configured level name (`trace|debug|information|warning|error`).
pub fn parse_level(s: &str) -> Option<LevelFilter> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "information" | "info" => Some(LevelFilter::Info),
        "warning" | "warn" => Some(LevelFilter::Warn),
        "error" => Some(LevelFilter::Error),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub file: Option<PathBuf>,
    pub format: LogFormat,
    /// Maximum buffered records per sink; oldest are dropped beyond this.
    pub buffer_limit: usize,
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file: None,
            format: LogFormat::Text,
            buffer_limit: 8192,
            color: std::env::var_os("NO_COLOR").is_none(),
        }
    }
}

/// A record after masking and correlation stamping, ready for any sink.
#[derive(Debug, Clone)]
pub struct FormattedRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub correlation_id: Option<String>,
    pub message: String,
    pub target: String,
}

/// `{ISO8601} [{LVL}] [{correlationId}] {message}`
pub fn text_line(record: &FormattedRecord) -> String {
    format!(
        "{} [{}] [{}] {}",
        record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        record.level.as_str().to_uppercase(),
        record.correlation_id.as_deref().unwrap_or("-"),
        record.message
    )
}

/// One JSON object per line.
pub fn json_line(record: &FormattedRecord) -> String {
    serde_json::json!({
        "timestamp": record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        "level": record.level.as_str().to_lowercase(),
        "correlationId": record.correlation_id,
        "message": record.message,
        "properties": { "target": record.target },
    })
    .to_string()
}

trait LogSink: Send + Sync {
    fn write(&self, record: &FormattedRecord);
    fn flush(&self);
}

struct ConsoleSink {
    color: bool,
}

impl LogSink for ConsoleSink {
    fn write(&self, record: &FormattedRecord) {
        let line = if self.color {
            let code = match record.level {
                Level::Error => "\x1b[1;31m",
                Level::Warn => "\x1b[33m",
                Level::Info => "\x1b[36m",
                Level::Debug | Level::Trace => "\x1b[2m",
            };
            format!(
                "{}{:>5}\x1b[0m {}",
                code,
                record.level.as_str().to_lowercase(),
                record.message
            )
        } else {
            format!("{:>5} {}", record.level.as_str().to_lowercase(), record.message)
        };
        eprintln!("{}", line);
    }

    fn flush(&self) {}
}

struct FileSinkInner {
    buffer: VecDeque<String>,
    writer: Option<BufWriter<File>>,
}

struct FileSink {
    path: PathBuf,
    format: LogFormat,
    limit: usize,
    inner: Mutex<FileSinkInner>,
}

/// Buffered records are written out once this many accumulate.
const FLUSH_EVERY: usize = 64;

impl FileSink {
    fn new(path: PathBuf, format: LogFormat, limit: usize) -> Self {
        Self {
            path,
            format,
            limit,
            inner: Mutex::new(FileSinkInner {
                buffer: VecDeque::new(),
                writer: None,
            }),
        }
    }

    fn flush_locked(&self, inner: &mut FileSinkInner) {
        if inner.writer.is_none() {
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(file) => inner.writer = Some(BufWriter::new(file)),
                Err(_) => return,
            }
        }
        let FileSinkInner { buffer, writer } = inner;
        if let Some(writer) = writer.as_mut() {
            while let Some(line) = buffer.pop_front() {
                let _ = writeln!(writer, "{}", line);
            }
            let _ = writer.flush();
        }
    }
}

impl LogSink for FileSink {
    fn write(&self, record: &FormattedRecord) {
        let line = match self.format {
            LogFormat::Text => text_line(record),
            LogFormat::Json => json_line(record),
        };
        let mut inner = self.inner.lock();
        inner.buffer.push_back(line);
        while inner.buffer.len() > self.limit {
            inner.buffer.pop_front();
        }
        if inner.buffer.len() >= FLUSH_EVERY {
            self.flush_locked(&mut inner);
        }
    }

    fn flush(&self) {
        let mut inner = self.inner.lock();
        self.flush_locked(&mut inner);
    }
}

/// The installed logger: masks every message, stamps the innermost
/// correlation identifier, and fans out to the configured sinks.
pub struct PdkLogger {
    level: LevelFilter,
    sinks: Vec<Box<dyn LogSink>>,
}

impl PdkLogger {
    fn from_config(config: &LogConfig) -> Self {
        let mut sinks: Vec<Box<dyn LogSink>> = vec![Box::new(ConsoleSink { color: config.color })];
        if let Some(path) = &config.file {
            sinks.push(Box::new(FileSink::new(
                path.clone(),
                config.format,
                config.buffer_limit,
            )));
        }
        Self {
            level: config.level,
            sinks,
        }
    }

    fn flush_all(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}

struct LoggerHandle(Arc<PdkLogger>);

impl log::Log for LoggerHandle {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.0.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = global_masker().mask(&record.args().to_string());
        let formatted = FormattedRecord {
            timestamp: Utc::now(),
            level: record.level(),
            correlation_id: correlation::current(),
            message,
            target: record.target().to_string(),
        };
        for sink in &self.0.sinks {
            sink.write(&formatted);
        }
    }

    fn flush(&self) {
        self.0.flush_all();
    }
}

static INSTALLED: OnceCell<Arc<PdkLogger>> = OnceCell::new();

/// Install the process logger. A second call (e.g. from tests) is a no-op.
pub fn init(config: &LogConfig) {
    let logger = Arc::new(PdkLogger::from_config(config));
    if INSTALLED.set(logger.clone()).is_err() {
        return;
    }
    if log::set_boxed_logger(Box::new(LoggerHandle(logger))).is_ok() {
        log::set_max_level(config.level);
    }
}

/// Flush all sinks. Call once on process exit.
pub fn shutdown() {
    if let Some(logger) = INSTALLED.get() {
        logger.flush_all();
    }
}
