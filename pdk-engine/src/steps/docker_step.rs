// Docker Step Executor
// Composes `docker {subcommand} ...` lines from structured inputs.

use crate::model::{ExecutionContext, Step, StepExecutionResult, StepKind};
use crate::process::DEFAULT_STEP_TIMEOUT;
use crate::steps::{run_outcome_to_result, StepExecutor};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub struct DockerStepExecutor;

const COMMANDS: &[&str] = &["build", "push", "run", "tag", "login"];

impl DockerStepExecutor {
    /// Compose the docker command line, or a typed grammar error.
    pub fn compose(step: &Step) -> Result<String, String> {
        let command = step
            .with
            .get("command")
            .map(String::as_str)
            .unwrap_or("build");
        if !COMMANDS.contains(&command) {
            return Err(format!(
                "unknown docker command '{}' (expected one of: {})",
                command,
                COMMANDS.join(", ")
            ));
        }

        let mut parts: Vec<String> = vec!["docker".to_string(), command.to_string()];
        match command {
            "build" => {
                if let Some(dockerfile) = step
                    .with
                    .get("Dockerfile")
                    .or_else(|| step.with.get("dockerfile"))
                {
                    parts.push("-f".to_string());
                    parts.push(dockerfile.clone());
                }
                for tag in split_tags(step) {
                    parts.push("-t".to_string());
                    parts.push(tag);
                }
                let context = step
                    .with
                    .get("context")
                    .or_else(|| step.with.get("buildContext"))
                    .map(String::as_str)
                    .unwrap_or(".");
                parts.push(context.to_string());
            }
            "push" => {
                let tags = split_tags(step);
                if tags.is_empty() {
                    return Err("docker push needs at least one tag".to_string());
                }
                parts.extend(tags);
            }
            "run" => {
                let image = step
                    .with
                    .get("image")
                    .ok_or_else(|| "docker run needs an image".to_string())?;
                parts.push("--rm".to_string());
                parts.push(image.clone());
            }
            "tag" => {
                let source = step
                    .with
                    .get("source")
                    .ok_or_else(|| "docker tag needs a source image".to_string())?;
                let tags = split_tags(step);
                let target = tags
                    .first()
                    .ok_or_else(|| "docker tag needs a target tag".to_string())?;
                parts.push(source.clone());
                parts.push(target.clone());
            }
            _ => {}
        }

        if let Some(arguments) = step.with.get("arguments").or_else(|| step.with.get("args")) {
            parts.push(arguments.clone());
        }
        Ok(parts.join(" "))
    }
}

/// `tags` is a comma- or newline-separated list.
fn split_tags(step: &Step) -> Vec<String> {
    step.with
        .get("tags")
        .map(|tags| {
            tags.split([',', '\n'])
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl StepExecutor for DockerStepExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Docker
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepExecutionResult {
        let started_at = Utc::now();
        let line = match Self::compose(step) {
            Ok(line) => line,
            Err(message) => return StepExecutionResult::failed(&step.name, message, started_at),
        };

        log::debug!("docker step '{}' runs: {}", step.name, line);
        let timeout = step.timeout.unwrap_or(DEFAULT_STEP_TIMEOUT);
        let outcome = ctx
            .run_command_line(
                &line,
                &HashMap::new(),
                step.working_directory.as_deref(),
                timeout,
                cancel,
            )
            .await;
        run_outcome_to_result(&step.name, outcome, started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_with(inputs: &[(&str, &str)]) -> Step {
        let mut step = Step::new("docker step", StepKind::Docker);
        for (k, v) in inputs {
            step.with.insert(k.to_string(), v.to_string());
        }
        step
    }

    #[test]
    fn test_build_line_with_dockerfile_and_tags() {
        let step = step_with(&[
            ("command", "build"),
            ("Dockerfile", "deploy/Dockerfile"),
            ("tags", "app:latest, app:1.2"),
            ("context", "."),
        ]);
        assert_eq!(
            DockerStepExecutor::compose(&step).unwrap(),
            "docker build -f deploy/Dockerfile -t app:latest -t app:1.2 ."
        );
    }

    #[test]
    fn test_build_is_default_command() {
        let step = step_with(&[("tags", "app:dev")]);
        assert_eq!(
            DockerStepExecutor::compose(&step).unwrap(),
            "docker build -t app:dev ."
        );
    }

    #[test]
    fn test_push_requires_tags() {
        let step = step_with(&[("command", "push")]);
        assert!(DockerStepExecutor::compose(&step).unwrap_err().contains("tag"));

        let step = step_with(&[("command", "push"), ("tags", "app:latest")]);
        assert_eq!(
            DockerStepExecutor::compose(&step).unwrap(),
            "docker push app:latest"
        );
    }

    #[test]
    fn test_unknown_command_rejected() {
        let step = step_with(&[("command", "levitate")]);
        let err = DockerStepExecutor::compose(&step).unwrap_err();
        assert!(err.contains("unknown docker command 'levitate'"));
    }

    #[test]
    fn test_tag_command() {
        let step = step_with(&[
            ("command", "tag"),
            ("source", "app:latest"),
            ("tags", "registry.example.com/app:latest"),
        ]);
        assert_eq!(
            DockerStepExecutor::compose(&step).unwrap(),
            "docker tag app:latest registry.example.com/app:latest"
        );
    }
}
