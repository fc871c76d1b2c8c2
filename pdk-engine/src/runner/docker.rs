// Docker Job Runner
// Runs one job inside a container: image mapping and pull, container
// lifecycle, the shared step loop, and removal on every exit path.

use crate::container::{map_runs_on, ContainerManager, CreateContainerOptions};
use crate::logging::CorrelationScope;
use crate::model::{sanitize_name, ExecutionTarget, Job, JobExecutionResult};
use crate::progress::ProgressReporter;
use crate::runner::{job_environment, run_steps, JobRunner, StepLoop};
use crate::secrets::global_masker;
use crate::steps::ExecutorRegistry;
use crate::variables::VariableResolver;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Path at which the host workspace is mounted inside job containers.
const CONTAINER_WORKSPACE: &str = "/workspace";

pub struct DockerJobRunner {
    manager: Arc<dyn ContainerManager>,
    registry: Arc<ExecutorRegistry>,
    progress: Arc<ProgressReporter>,
    resolver: VariableResolver,
}

impl DockerJobRunner {
    pub fn new(
        manager: Arc<dyn ContainerManager>,
        registry: Arc<ExecutorRegistry>,
        progress: Arc<ProgressReporter>,
        resolver: VariableResolver,
    ) -> Self {
        Self {
            manager,
            registry,
            progress,
            resolver,
        }
    }
}

#[async_trait]
impl JobRunner for DockerJobRunner {
    async fn run_job(
        &self,
        job: &Job,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> JobExecutionResult {
        let job_scope = CorrelationScope::enter();
        let run_id = job_scope.id();

        let image = match map_runs_on(&job.runs_on) {
            Ok(image) => image,
            Err(e) => {
                return JobExecutionResult::failed(&job.id, &job.name, global_masker().mask(&e.to_string()))
            }
        };
        log::info!("job '{}' runs on image {}", job.id, image);

        if let Err(e) = self.manager.pull_image(&image, &self.progress).await {
            let mut message = e.to_string();
            if let Some(hint) = e.hint() {
                message = format!("{} ({})", message, hint);
            }
            return JobExecutionResult::failed(&job.id, &job.name, global_masker().mask(&message));
        }

        let mut resolver = self.resolver.snapshot();
        resolver.update_context(&job.name, "", &job.runs_on, CONTAINER_WORKSPACE);
        let env = job_environment(job, &resolver, CONTAINER_WORKSPACE);

        let container_name = format!(
            "pdk-job-{}-{}",
            sanitize_name(&job.id),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let opts = CreateContainerOptions {
            name: container_name.clone(),
            image,
            workspace: workspace.to_path_buf(),
            env: env.clone(),
            working_dir: CONTAINER_WORKSPACE.to_string(),
        };

        let container_id = match self.manager.create_container(&opts).await {
            Ok(id) => id,
            Err(e) => {
                return JobExecutionResult::failed(&job.id, &job.name, global_masker().mask(&e.to_string()))
            }
        };

        self.progress
            .job_started(&job.id, &job.name, &job.runs_on, job.steps.len());

        let result = run_steps(
            StepLoop {
                job,
                target: ExecutionTarget::Container {
                    manager: self.manager.clone(),
                    container_id: container_id.clone(),
                },
                workspace_host: workspace.to_path_buf(),
                workspace_path: CONTAINER_WORKSPACE.to_string(),
                base_env: env,
                run_id,
                registry: &self.registry,
                resolver,
                progress: &self.progress,
            },
            cancel,
        )
        .await;

        // Removal happens on every exit path; a failure here is logged,
        // never propagated.
        if let Err(e) = self.manager.remove_container(&container_id).await {
            log::warn!("failed to remove container {}: {}", container_name, e);
        }

        self.progress
            .job_completed(&job.id, result.success, result.duration);
        result
    }
}
