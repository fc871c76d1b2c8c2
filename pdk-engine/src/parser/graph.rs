// Dependency Graph Checks
// Reference integrity and cycle detection shared by both provider parsers
// and re-run by the validator as defense in depth.

use crate::model::Pipeline;
use crate::parser::error::{ParseError, ParseResult};

use std::collections::HashMap;

/// Verify that every `depends_on` target exists and the graph is acyclic.
pub fn check_dependencies(pipeline: &Pipeline) -> ParseResult<()> {
    for (id, job) in &pipeline.jobs {
        for dep in &job.depends_on {
            if !pipeline.jobs.contains_key(dep) {
                let available: Vec<&str> = pipeline.jobs.keys().map(String::as_str).collect();
                return Err(ParseError::new(format!(
                    "job '{}' depends on unknown job '{}'",
                    id, dep
                ))
                .with_suggestion(format!("available jobs: {}", available.join(", "))));
            }
        }
    }

    if let Some(cycle) = find_cycle(pipeline) {
        return Err(ParseError::new(format!(
            "circular dependency detected: {}",
            cycle.join(" -> ")
        )));
    }
    Ok(())
}

/// DFS with a recursion-stack marker; returns the offending path on a cycle.
pub fn find_cycle(pipeline: &Pipeline) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Unvisited,
        Visiting,
        Visited,
    }

    fn visit(
        node: &str,
        pipeline: &Pipeline,
        states: &mut HashMap<String, State>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match states.get(node) {
            Some(State::Visiting) => {
                let mut cycle = path.clone();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            Some(State::Visited) => return None,
            _ => {}
        }

        states.insert(node.to_string(), State::Visiting);
        path.push(node.to_string());

        if let Some(job) = pipeline.jobs.get(node) {
            for dep in &job.depends_on {
                if let Some(cycle) = visit(dep, pipeline, states, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        states.insert(node.to_string(), State::Visited);
        None
    }

    let mut states: HashMap<String, State> = pipeline
        .jobs
        .keys()
        .map(|k| (k.clone(), State::Unvisited))
        .collect();
    let mut path = Vec::new();

    for id in pipeline.jobs.keys() {
        if let Some(cycle) = visit(id, pipeline, &mut states, &mut path) {
            return Some(cycle);
        }
    }
    None
}

/// Structural checks every parsed pipeline must pass before it leaves the
/// parser: non-empty, identified jobs with at least one step each.
pub fn check_structure(pipeline: &Pipeline) -> ParseResult<()> {
    if pipeline.jobs.is_empty() {
        return Err(ParseError::new("pipeline defines no jobs")
            .with_suggestion("add a 'jobs:' section with at least one job"));
    }

    for (id, job) in &pipeline.jobs {
        if id.is_empty() {
            return Err(ParseError::new("job with empty identifier"));
        }
        if job.steps.is_empty() {
            return Err(ParseError::new(format!("job '{}' has no steps", id))
                .with_suggestion("add a 'steps:' list defining what the job should do"));
        }
        for (index, step) in job.steps.iter().enumerate() {
            if !step.has_payload() {
                return Err(ParseError::new(format!(
                    "step {} ('{}') in job '{}' has no executable payload",
                    index + 1,
                    step.name,
                    id
                ))
                .with_suggestion("a step needs a script, a task, or an action reference"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Job, Provider, Step, StepKind};

    fn pipeline_with(jobs: &[(&str, &[&str])]) -> Pipeline {
        let mut pipeline = Pipeline::new("test", Provider::GitHub);
        for (id, deps) in jobs {
            let mut job = Job::new(*id);
            job.depends_on = deps.iter().map(|d| d.to_string()).collect();
            let mut step = Step::new("run", StepKind::Script);
            step.script = Some("true".to_string());
            job.steps.push(step);
            pipeline.jobs.insert(id.to_string(), job);
        }
        pipeline
    }

    #[test]
    fn test_valid_graph_passes() {
        let pipeline = pipeline_with(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        assert!(check_dependencies(&pipeline).is_ok());
        assert!(check_structure(&pipeline).is_ok());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let pipeline = pipeline_with(&[("a", &["ghost"])]);
        let err = check_dependencies(&pipeline).unwrap_err();
        assert!(err.message.contains("unknown job 'ghost'"));
    }

    #[test]
    fn test_two_node_cycle_names_both_jobs() {
        let pipeline = pipeline_with(&[("a", &["b"]), ("b", &["a"])]);
        let err = check_dependencies(&pipeline).unwrap_err();
        assert!(err.message.contains("circular dependency"));
        assert!(err.message.contains('a') && err.message.contains('b'));
    }

    #[test]
    fn test_self_cycle_detected() {
        let pipeline = pipeline_with(&[("solo", &["solo"])]);
        assert!(find_cycle(&pipeline).is_some());
    }

    #[test]
    fn test_longer_cycle_detected() {
        let pipeline = pipeline_with(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
        assert!(find_cycle(&pipeline).is_some());
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let pipeline = Pipeline::new("empty", Provider::Azure);
        assert!(check_structure(&pipeline).is_err());
    }

    #[test]
    fn test_job_without_steps_rejected() {
        let mut pipeline = Pipeline::new("test", Provider::GitHub);
        pipeline.jobs.insert("empty".to_string(), Job::new("empty"));
        let err = check_structure(&pipeline).unwrap_err();
        assert!(err.message.contains("has no steps"));
    }

    #[test]
    fn test_step_without_payload_rejected() {
        let mut pipeline = Pipeline::new("test", Provider::GitHub);
        let mut job = Job::new("build");
        job.steps.push(Step::new("bare", StepKind::Script));
        pipeline.jobs.insert("build".to_string(), job);
        let err = check_structure(&pipeline).unwrap_err();
        assert!(err.message.contains("no executable payload"));
    }
}
