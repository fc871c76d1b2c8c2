// Filtering Runner
// Decorator over any job runner: pre-categorizes steps through the filter,
// delegates a reduced job, and merges skipped placeholders back into their
// original positions.

use crate::filter::CompositeFilter;
use crate::model::{Job, JobExecutionResult, StepExecutionResult};
use crate::runner::JobRunner;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct FilteringRunner {
    inner: Arc<dyn JobRunner>,
    filter: Arc<CompositeFilter>,
}

impl FilteringRunner {
    pub fn new(inner: Arc<dyn JobRunner>, filter: Arc<CompositeFilter>) -> Self {
        Self { inner, filter }
    }
}

#[async_trait]
impl JobRunner for FilteringRunner {
    async fn run_job(
        &self,
        job: &Job,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> JobExecutionResult {
        // Categorize every step up front, keeping original indices.
        let mut execute_indices = Vec::new();
        let mut skipped: Vec<(usize, String)> = Vec::new();
        for (index, step) in job.steps.iter().enumerate() {
            let decision = self.filter.evaluate(step, index, job);
            if decision.should_execute {
                execute_indices.push(index);
            } else {
                log::debug!("step '{}' skipped: {}", step.name, decision.reason);
                skipped.push((index, decision.reason));
            }
        }

        if execute_indices.len() == job.steps.len() {
            return self.inner.run_job(job, workspace, cancel).await;
        }

        let mut result = if execute_indices.is_empty() {
            // Nothing to execute; no reason to spin up the inner runner.
            JobExecutionResult::new(&job.id, &job.name)
        } else {
            let mut reduced = job.clone();
            reduced.steps = execute_indices
                .iter()
                .map(|i| job.steps[*i].clone())
                .collect();
            self.inner.run_job(&reduced, workspace, cancel).await
        };

        // Merge: executed results keep their relative order; skipped steps
        // reappear at their original positions as successful placeholders.
        let mut executed = result.steps.drain(..);
        let mut merged: Vec<StepExecutionResult> = Vec::with_capacity(job.steps.len());
        for (index, step) in job.steps.iter().enumerate() {
            if let Some((_, reason)) = skipped.iter().find(|(i, _)| *i == index) {
                merged.push(StepExecutionResult::skipped(&step.name, reason));
            } else if let Some(step_result) = executed.next() {
                merged.push(step_result);
            }
        }
        drop(executed);
        result.steps = merged;
        result
    }
}
