// Planner
// Topological job ordering over a validated pipeline. Insertion order from
// the parser breaks ties, so independent jobs keep their definition order.

use crate::error::{EngineError, EngineResult};
use crate::model::Pipeline;

use std::collections::HashMap;

/// A job scheduled into the plan with its frozen execution defaults.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub id: String,
    /// Environment snapshot at planning time (job env over pipeline variables)
    pub environment: HashMap<String, String>,
    /// Identifiers this job waits for, as planned
    pub depends_on: Vec<String>,
}

/// The ordered execution plan.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub jobs: Vec<PlannedJob>,
}

impl ExecutionPlan {
    pub fn order(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.id.as_str()).collect()
    }
}

/// Produce a topological ordering of the pipeline's jobs.
///
/// The pipeline must already have passed validation; a cycle here indicates a
/// validator bug and surfaces as an internal invariant violation.
pub fn plan(pipeline: &Pipeline) -> EngineResult<ExecutionPlan> {
    let mut emitted: Vec<String> = Vec::with_capacity(pipeline.jobs.len());
    let mut done: HashMap<&str, bool> =
        pipeline.jobs.keys().map(|k| (k.as_str(), false)).collect();

    // Kahn-style: repeatedly take the first job in definition order whose
    // dependencies are all emitted. Stable by construction.
    while emitted.len() < pipeline.jobs.len() {
        let next = pipeline.jobs.iter().find(|(id, job)| {
            !done[id.as_str()]
                && job
                    .depends_on
                    .iter()
                    .all(|dep| done.get(dep.as_str()).copied().unwrap_or(false))
        });

        match next {
            Some((id, _)) => {
                done.insert(id.as_str(), true);
                emitted.push(id.clone());
            }
            None => {
                let stuck: Vec<&str> = done
                    .iter()
                    .filter(|(_, emitted)| !**emitted)
                    .map(|(id, _)| *id)
                    .collect();
                return Err(EngineError::Invariant(format!(
                    "planner found an unresolvable dependency cycle among: {} (validation should have rejected this pipeline)",
                    stuck.join(", ")
                )));
            }
        }
    }

    let jobs = emitted
        .into_iter()
        .map(|id| {
            let job = &pipeline.jobs[&id];
            let mut environment = pipeline.variables.clone();
            for (k, v) in &job.environment {
                environment.insert(k.clone(), v.clone());
            }
            PlannedJob {
                id,
                environment,
                depends_on: job.depends_on.clone(),
            }
        })
        .collect();

    Ok(ExecutionPlan { jobs })
}
