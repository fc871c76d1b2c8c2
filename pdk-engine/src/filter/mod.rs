// Step Filter Engine
// Composable include/skip filters over steps; skip always wins.

use crate::config::Preset;
use crate::model::{Job, Step};

/// Outcome of a filter decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterResult {
    pub should_execute: bool,
    pub reason: String,
}

impl FilterResult {
    pub fn execute(reason: impl Into<String>) -> Self {
        Self {
            should_execute: true,
            reason: reason.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_execute: false,
            reason: reason.into(),
        }
    }
}

/// A single filter. Built-in filters answer "does this step match my
/// specification"; the composite decides what a match means (include or
/// skip).
pub trait StepFilter: Send + Sync {
    fn describe(&self) -> String;

    /// `should_execute` is true when the step matches this filter's
    /// specification; `reason` explains the match or mismatch.
    fn should_execute(&self, step: &Step, index: usize, job: &Job) -> FilterResult;
}

/// Match by step display name, exact or with `*` wildcards.
pub struct NameFilter {
    patterns: Vec<String>,
}

impl NameFilter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }
}

impl StepFilter for NameFilter {
    fn describe(&self) -> String {
        format!("step name filter [{}]", self.patterns.join(", "))
    }

    fn should_execute(&self, step: &Step, _index: usize, _job: &Job) -> FilterResult {
        for pattern in &self.patterns {
            if wildcard_match(pattern, &step.name) {
                return FilterResult::execute(format!("step name matches '{}'", pattern));
            }
        }
        FilterResult::skip(format!("step name '{}' matches no pattern", step.name))
    }
}

/// Match by 1-based step index.
pub struct IndexFilter {
    indices: Vec<usize>,
}

impl IndexFilter {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }
}

impl StepFilter for IndexFilter {
    fn describe(&self) -> String {
        format!(
            "step index filter [{}]",
            self.indices
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    fn should_execute(&self, _step: &Step, index: usize, _job: &Job) -> FilterResult {
        let position = index + 1;
        if self.indices.contains(&position) {
            FilterResult::execute(format!("step index {} selected", position))
        } else {
            FilterResult::skip(format!("step index {} not selected", position))
        }
    }
}

/// Match every step of the named jobs.
pub struct JobNameFilter {
    jobs: Vec<String>,
}

impl JobNameFilter {
    pub fn new(jobs: Vec<String>) -> Self {
        Self { jobs }
    }
}

impl StepFilter for JobNameFilter {
    fn describe(&self) -> String {
        format!("job filter [{}]", self.jobs.join(", "))
    }

    fn should_execute(&self, _step: &Step, _index: usize, job: &Job) -> FilterResult {
        if self
            .jobs
            .iter()
            .any(|j| wildcard_match(j, &job.id) || wildcard_match(j, &job.name))
        {
            FilterResult::execute(format!("job '{}' selected", job.id))
        } else {
            FilterResult::skip(format!("job '{}' not selected", job.id))
        }
    }
}

/// Ordered composition: skip filters take priority over includes, and an
/// empty include set means "include all".
#[derive(Default)]
pub struct CompositeFilter {
    includes: Vec<Box<dyn StepFilter>>,
    skips: Vec<Box<dyn StepFilter>>,
}

impl CompositeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A composite built from a configured preset: `steps` are includes,
    /// `skipSteps` are skips, both matched by name.
    pub fn from_preset(preset: &Preset) -> Self {
        let mut composite = Self::new();
        if !preset.steps.is_empty() {
            composite.include(Box::new(NameFilter::new(preset.steps.clone())));
        }
        if !preset.skip_steps.is_empty() {
            composite.skip(Box::new(NameFilter::new(preset.skip_steps.clone())));
        }
        composite
    }

    pub fn include(&mut self, filter: Box<dyn StepFilter>) -> &mut Self {
        self.includes.push(filter);
        self
    }

    pub fn skip(&mut self, filter: Box<dyn StepFilter>) -> &mut Self {
        self.skips.push(filter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.skips.is_empty()
    }

    /// Decide whether a step executes. Any matching skip filter wins; with no
    /// includes declared, everything else executes.
    pub fn evaluate(&self, step: &Step, index: usize, job: &Job) -> FilterResult {
        for filter in &self.skips {
            let result = filter.should_execute(step, index, job);
            if result.should_execute {
                return FilterResult::skip(format!(
                    "skipped by {}: {}",
                    filter.describe(),
                    result.reason
                ));
            }
        }

        if self.includes.is_empty() {
            return FilterResult::execute("no include filters declared");
        }
        for filter in &self.includes {
            let result = filter.should_execute(step, index, job);
            if result.should_execute {
                return FilterResult::execute(result.reason);
            }
        }
        FilterResult::skip("not matched by any include filter")
    }
}

/// Glob-lite matching: `*` matches any run of characters.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let mut remaining = text;
    let mut first = true;
    let parts: Vec<&str> = pattern.split('*').collect();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            first = false;
            continue;
        }
        if first {
            if !remaining.starts_with(part) {
                return false;
            }
            remaining = &remaining[part.len()..];
            first = false;
        } else if i == parts.len() - 1 {
            return remaining.ends_with(part);
        } else {
            match remaining.find(part) {
                Some(pos) => remaining = &remaining[pos + part.len()..],
                None => return false,
            }
        }
    }
    parts.last().map(|p| p.is_empty()).unwrap_or(true) || remaining.is_empty()
}
