// Pipeline Executor
// The re-runnable execution entry point: validate, plan, then drive jobs
// through the selected runner — sequentially by default, or dispatching
// ready jobs in parallel up to a configured bound.

use crate::container::{ContainerManager, DockerCli};
use crate::error::EngineResult;
use crate::filter::CompositeFilter;
use crate::logging::CorrelationScope;
use crate::model::{JobExecutionResult, Pipeline};
use crate::planner;
use crate::progress::{ProgressMode, ProgressReporter, ProgressSender};
use crate::runner::{FilteringRunner, JobRunner, RunnerFactory, RunnerPolicy};
use crate::steps::ExecutorRegistry;
use crate::validation::{ValidationContext, ValidationReport, Validator};
use crate::variables::{VariableResolver, VariableSource};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Configuration for one execution entry point.
pub struct ExecutorConfig {
    pub policy: RunnerPolicy,
    /// 0 means strictly sequential in planner order
    pub max_parallel_jobs: usize,
    /// Workspace for all jobs; `None` lets the host runner create temp
    /// directories and the docker runner mount the current directory
    pub workspace: Option<PathBuf>,
    /// Step filter; `None` executes everything
    pub filter: Option<Arc<CompositeFilter>>,
    pub progress_mode: ProgressMode,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            policy: RunnerPolicy::Auto,
            max_parallel_jobs: 0,
            workspace: None,
            filter: None,
            progress_mode: ProgressMode::Normal,
        }
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineExecutionResult {
    pub jobs: Vec<JobExecutionResult>,
    pub success: bool,
    pub duration: Duration,
}

/// Orchestrates parse results into job executions. Reusable across runs.
pub struct PipelineExecutor {
    config: ExecutorConfig,
    manager: Arc<dyn ContainerManager>,
    registry: Arc<ExecutorRegistry>,
    progress_tx: Option<ProgressSender>,
}

impl PipelineExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            manager: Arc::new(DockerCli::new()),
            registry: Arc::new(ExecutorRegistry::with_default_executors()),
            progress_tx: None,
        }
    }

    /// Substitute the container manager (tests use a scripted mock).
    pub fn with_container_manager(mut self, manager: Arc<dyn ContainerManager>) -> Self {
        self.manager = manager;
        self
    }

    pub fn with_registry(mut self, registry: Arc<ExecutorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Validate a pipeline against this executor's registry and resolver.
    pub fn validate(&self, pipeline: &Pipeline, resolver: &VariableResolver) -> ValidationReport {
        let ctx = ValidationContext {
            resolver,
            registered_kinds: self.registry.kinds(),
        };
        Validator::with_default_phases().validate(pipeline, &ctx)
    }

    /// Execute a validated pipeline. The resolver carries the config, env,
    /// and CLI layers; pipeline variables are layered on top here.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        mut resolver: VariableResolver,
        cancel: CancellationToken,
    ) -> EngineResult<PipelineExecutionResult> {
        let _run_scope = CorrelationScope::enter();
        let started = Instant::now();

        resolver.set_all(&pipeline.variables, VariableSource::Pipeline);

        let plan = planner::plan(pipeline)?;
        log::info!(
            "pipeline '{}': {} jobs planned as [{}]",
            pipeline.name,
            plan.jobs.len(),
            plan.order().join(", ")
        );

        let progress = Arc::new(ProgressReporter::new(
            self.progress_tx.clone(),
            self.config.progress_mode,
        ));
        progress.pipeline_started(&pipeline.name, plan.jobs.len());

        let factory = RunnerFactory {
            manager: self.manager.clone(),
            registry: self.registry.clone(),
            progress: progress.clone(),
            resolver: resolver.clone(),
        };
        // Jobs selecting the literal `host` runner bypass the policy runner;
        // everything else goes wherever the policy decided.
        let mut policy_runner: Arc<dyn JobRunner> = factory.create(self.config.policy).await;
        let mut host_runner: Arc<dyn JobRunner> = factory.create(RunnerPolicy::Host).await;
        if let Some(filter) = &self.config.filter {
            policy_runner = Arc::new(FilteringRunner::new(policy_runner, filter.clone()));
            host_runner = Arc::new(FilteringRunner::new(host_runner, filter.clone()));
        }
        let runners = JobRunners {
            policy: policy_runner,
            host: host_runner,
        };

        let workspace = self
            .config
            .workspace
            .clone()
            .unwrap_or_else(|| match self.config.policy {
                RunnerPolicy::Host => PathBuf::new(),
                _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            });

        let results = if self.config.max_parallel_jobs > 1 {
            self.run_parallel(pipeline, &plan, &runners, &workspace, &cancel, &progress)
                .await
        } else {
            self.run_sequential(pipeline, &plan, &runners, &workspace, &cancel, &progress)
                .await
        };

        let success = !cancel.is_cancelled() && results.iter().all(|r| r.success);
        let duration = started.elapsed();
        progress.pipeline_completed(&pipeline.name, success, duration);

        Ok(PipelineExecutionResult {
            jobs: results,
            success,
            duration,
        })
    }

    async fn run_sequential(
        &self,
        pipeline: &Pipeline,
        plan: &planner::ExecutionPlan,
        runners: &JobRunners,
        workspace: &PathBuf,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Vec<JobExecutionResult> {
        let mut results: Vec<JobExecutionResult> = Vec::with_capacity(plan.jobs.len());
        let mut completed: HashMap<String, bool> = HashMap::new();

        for planned in &plan.jobs {
            if cancel.is_cancelled() {
                break;
            }
            let job = &pipeline.jobs[&planned.id];

            let failed_dep = planned
                .depends_on
                .iter()
                .find(|dep| !completed.get(dep.as_str()).copied().unwrap_or(false));
            if let Some(dep) = failed_dep {
                let reason = format!("dependency '{}' did not succeed", dep);
                log::info!("skipping job '{}': {}", planned.id, reason);
                progress.job_skipped(&planned.id, &reason);
                completed.insert(planned.id.clone(), false);
                results.push(JobExecutionResult::failed(&planned.id, &job.name, reason));
                continue;
            }

            let result = runners.for_job(job).run_job(job, workspace, cancel).await;
            completed.insert(planned.id.clone(), result.success);
            results.push(result);
        }
        results
    }

    /// Dispatch jobs whose dependencies are satisfied, bounded by the
    /// configured degree. Each job gets an independent resolver snapshot via
    /// the runner construction, so parallel jobs never share mutable state.
    async fn run_parallel(
        &self,
        pipeline: &Pipeline,
        plan: &planner::ExecutionPlan,
        runners: &JobRunners,
        workspace: &PathBuf,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Vec<JobExecutionResult> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_parallel_jobs));
        let mut results: HashMap<String, JobExecutionResult> = HashMap::new();
        let mut pending: Vec<&planner::PlannedJob> = plan.jobs.iter().collect();
        let mut running: tokio::task::JoinSet<(String, JobExecutionResult)> =
            tokio::task::JoinSet::new();
        let mut succeeded: HashSet<String> = HashSet::new();
        let mut finished: HashSet<String> = HashSet::new();

        loop {
            // Launch every ready job.
            let mut index = 0;
            while index < pending.len() {
                let planned = pending[index];
                let deps_finished = planned.depends_on.iter().all(|d| finished.contains(d));
                if !deps_finished || cancel.is_cancelled() {
                    index += 1;
                    continue;
                }
                let planned = pending.remove(index);

                let deps_ok = planned.depends_on.iter().all(|d| succeeded.contains(d));
                if !deps_ok {
                    let job = &pipeline.jobs[&planned.id];
                    let reason = "a dependency did not succeed".to_string();
                    progress.job_skipped(&planned.id, &reason);
                    finished.insert(planned.id.clone());
                    results.insert(
                        planned.id.clone(),
                        JobExecutionResult::failed(&planned.id, &job.name, reason),
                    );
                    // The skip may unblock entries earlier in the scan.
                    index = 0;
                    continue;
                }

                let job = pipeline.jobs[&planned.id].clone();
                let id = planned.id.clone();
                let runner = runners.for_job(&job).clone();
                let workspace = workspace.clone();
                let cancel = cancel.clone();
                let semaphore = semaphore.clone();
                running.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = runner.run_job(&job, &workspace, &cancel).await;
                    (id, result)
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            if let Ok((id, result)) = joined {
                if result.success {
                    succeeded.insert(id.clone());
                }
                finished.insert(id.clone());
                results.insert(id, result);
            }
        }

        // Report in planner order.
        plan.jobs
            .iter()
            .filter_map(|planned| results.remove(&planned.id))
            .collect()
    }
}

/// The policy-selected runner plus the host runner for jobs that name
/// `host` as their selector.
struct JobRunners {
    policy: Arc<dyn JobRunner>,
    host: Arc<dyn JobRunner>,
}

impl JobRunners {
    fn for_job(&self, job: &crate::model::Job) -> &Arc<dyn JobRunner> {
        if job.runs_on == "host" {
            &self.host
        } else {
            &self.policy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Job, Provider, Step, StepKind};

    fn host_pipeline(jobs: &[(&str, &[&str], &[&str])]) -> Pipeline {
        let mut pipeline = Pipeline::new("test", Provider::GitHub);
        for (id, deps, scripts) in jobs {
            let mut job = Job::new(*id);
            job.runs_on = "host".to_string();
            job.depends_on = deps.iter().map(|d| d.to_string()).collect();
            for script in *scripts {
                let mut step = Step::new(format!("run {}", script), StepKind::Script);
                step.script = Some(script.to_string());
                job.steps.push(step);
            }
            pipeline.jobs.insert(id.to_string(), job);
        }
        pipeline
    }

    fn host_executor() -> PipelineExecutor {
        PipelineExecutor::new(ExecutorConfig {
            policy: RunnerPolicy::Host,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_sequential_execution_in_plan_order() {
        let pipeline = host_pipeline(&[
            ("b", &["a"], &["echo b"]),
            ("a", &[], &["echo a"]),
        ]);
        let result = host_executor()
            .execute(&pipeline, VariableResolver::new(), CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        let order: Vec<&str> = result.jobs.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_dependent_job_skipped_after_failure() {
        let pipeline = host_pipeline(&[
            ("a", &[], &["exit 1"]),
            ("b", &["a"], &["echo b"]),
        ]);
        let result = host_executor()
            .execute(&pipeline, VariableResolver::new(), CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.jobs.len(), 2);
        assert!(!result.jobs[0].success);
        assert!(!result.jobs[1].success);
        assert!(result.jobs[1]
            .error_message
            .as_deref()
            .unwrap()
            .contains("dependency"));
        // The skipped job ran no steps.
        assert!(result.jobs[1].steps.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_variables_reach_steps() {
        let mut pipeline = host_pipeline(&[("greet", &[], &["echo ${GREETING}"])]);
        pipeline
            .variables
            .insert("GREETING".to_string(), "hello".to_string());

        let result = host_executor()
            .execute(&pipeline, VariableResolver::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.jobs[0].steps[0].output.contains("hello"));
    }

    #[tokio::test]
    async fn test_parallel_execution_completes_all_jobs() {
        let pipeline = host_pipeline(&[
            ("a", &[], &["echo a"]),
            ("b", &[], &["echo b"]),
            ("c", &["a", "b"], &["echo c"]),
        ]);
        let executor = PipelineExecutor::new(ExecutorConfig {
            policy: RunnerPolicy::Host,
            max_parallel_jobs: 2,
            ..Default::default()
        });

        let result = executor
            .execute(&pipeline, VariableResolver::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.jobs.len(), 3);
        // Reported in planner order regardless of completion order.
        let order: Vec<&str> = result.jobs.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_validate_reports_through_registry() {
        let mut pipeline = host_pipeline(&[("a", &[], &["echo a"])]);
        pipeline
            .jobs
            .get_mut("a")
            .unwrap()
            .steps
            .push(Step::new("mystery", StepKind::Unknown));

        let executor = host_executor();
        let report = executor.validate(&pipeline, &VariableResolver::new());
        assert!(report.has_errors());
    }
}
