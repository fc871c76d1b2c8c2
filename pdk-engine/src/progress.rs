// Progress Reporting
// Execution events with per-step output coalescing

use crate::logging::correlation;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// How much per-line output the reporter forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    /// Coalesce output lines to at most one per 50ms per step
    #[default]
    Normal,
    /// Forward every output line
    Verbose,
    /// Suppress per-line output entirely
    Quiet,
}

/// Events emitted during pipeline execution. Every event carries the
/// correlation identifier that was innermost when it was emitted.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    PipelineStarted {
        pipeline_name: String,
        total_jobs: usize,
        correlation_id: Option<String>,
    },
    PipelineCompleted {
        pipeline_name: String,
        success: bool,
        duration: Duration,
        correlation_id: Option<String>,
    },
    JobStarted {
        job_id: String,
        job_name: String,
        runner: String,
        total_steps: usize,
        correlation_id: Option<String>,
    },
    JobCompleted {
        job_id: String,
        success: bool,
        duration: Duration,
        correlation_id: Option<String>,
    },
    JobSkipped {
        job_id: String,
        reason: String,
        correlation_id: Option<String>,
    },
    StepStarted {
        job_id: String,
        step_index: usize,
        step_name: String,
        correlation_id: Option<String>,
    },
    StepOutput {
        job_id: String,
        step_index: usize,
        line: String,
        is_error: bool,
        correlation_id: Option<String>,
    },
    StepCompleted {
        job_id: String,
        step_index: usize,
        step_name: String,
        success: bool,
        exit_code: i32,
        duration: Duration,
        correlation_id: Option<String>,
    },
    StepSkipped {
        job_id: String,
        step_index: usize,
        step_name: String,
        reason: String,
        correlation_id: Option<String>,
    },
    /// Human-readable image pull progress
    ImagePull {
        message: String,
        correlation_id: Option<String>,
    },
    Warning {
        message: String,
        correlation_id: Option<String>,
    },
}

/// Minimum interval between forwarded output lines per step in normal mode.
const COALESCE_INTERVAL: Duration = Duration::from_millis(50);

/// Fire-and-forget progress emission with output coalescing.
///
/// The reporter is owned by the execution side; a missing channel means the
/// caller did not ask for progress and every emission is a no-op.
pub struct ProgressReporter {
    tx: Option<ProgressSender>,
    mode: ProgressMode,
    last_output: Mutex<HashMap<(String, usize), Instant>>,
}

impl ProgressReporter {
    pub fn new(tx: Option<ProgressSender>, mode: ProgressMode) -> Self {
        Self {
            tx,
            mode,
            last_output: Mutex::new(HashMap::new()),
        }
    }

    /// A reporter that drops everything.
    pub fn disabled() -> Self {
        Self::new(None, ProgressMode::Quiet)
    }

    pub fn mode(&self) -> ProgressMode {
        self.mode
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn pipeline_started(&self, pipeline_name: &str, total_jobs: usize) {
        self.send(ProgressEvent::PipelineStarted {
            pipeline_name: pipeline_name.to_string(),
            total_jobs,
            correlation_id: correlation::current(),
        });
    }

    pub fn pipeline_completed(&self, pipeline_name: &str, success: bool, duration: Duration) {
        self.send(ProgressEvent::PipelineCompleted {
            pipeline_name: pipeline_name.to_string(),
            success,
            duration,
            correlation_id: correlation::current(),
        });
    }

    pub fn job_started(&self, job_id: &str, job_name: &str, runner: &str, total_steps: usize) {
        self.send(ProgressEvent::JobStarted {
            job_id: job_id.to_string(),
            job_name: job_name.to_string(),
            runner: runner.to_string(),
            total_steps,
            correlation_id: correlation::current(),
        });
    }

    pub fn job_completed(&self, job_id: &str, success: bool, duration: Duration) {
        self.send(ProgressEvent::JobCompleted {
            job_id: job_id.to_string(),
            success,
            duration,
            correlation_id: correlation::current(),
        });
    }

    pub fn job_skipped(&self, job_id: &str, reason: &str) {
        self.send(ProgressEvent::JobSkipped {
            job_id: job_id.to_string(),
            reason: reason.to_string(),
            correlation_id: correlation::current(),
        });
    }

    pub fn step_started(&self, job_id: &str, step_index: usize, step_name: &str) {
        self.send(ProgressEvent::StepStarted {
            job_id: job_id.to_string(),
            step_index,
            step_name: step_name.to_string(),
            correlation_id: correlation::current(),
        });
    }

    /// Forward one output line, subject to coalescing. The final line of a
    /// step must be sent with `is_final = true` and is never dropped.
    pub fn step_output(&self, job_id: &str, step_index: usize, line: &str, is_error: bool, is_final: bool) {
        match self.mode {
            ProgressMode::Quiet => return,
            ProgressMode::Verbose => {}
            ProgressMode::Normal => {
                if !is_final {
                    let key = (job_id.to_string(), step_index);
                    let mut last = self.last_output.lock();
                    let now = Instant::now();
                    let throttled = last
                        .get(&key)
                        .is_some_and(|prev| now.duration_since(*prev) < COALESCE_INTERVAL);
                    if throttled {
                        return;
                    }
                    last.insert(key, now);
                }
            }
        }
        self.send(ProgressEvent::StepOutput {
            job_id: job_id.to_string(),
            step_index,
            line: line.to_string(),
            is_error,
            correlation_id: correlation::current(),
        });
    }

    pub fn step_completed(
        &self,
        job_id: &str,
        step_index: usize,
        step_name: &str,
        success: bool,
        exit_code: i32,
        duration: Duration,
    ) {
        self.last_output
            .lock()
            .remove(&(job_id.to_string(), step_index));
        self.send(ProgressEvent::StepCompleted {
            job_id: job_id.to_string(),
            step_index,
            step_name: step_name.to_string(),
            success,
            exit_code,
            duration,
            correlation_id: correlation::current(),
        });
    }

    pub fn step_skipped(&self, job_id: &str, step_index: usize, step_name: &str, reason: &str) {
        self.send(ProgressEvent::StepSkipped {
            job_id: job_id.to_string(),
            step_index,
            step_name: step_name.to_string(),
            reason: reason.to_string(),
            correlation_id: correlation::current(),
        });
    }

    pub fn image_pull(&self, message: &str) {
        self.send(ProgressEvent::ImagePull {
            message: message.to_string(),
            correlation_id: correlation::current(),
        });
    }

    pub fn warning(&self, message: &str) {
        self.send(ProgressEvent::Warning {
            message: message.to_string(),
            correlation_id: correlation::current(),
        });
    }
}
