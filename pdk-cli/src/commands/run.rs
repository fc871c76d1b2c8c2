use crate::commands::{init_logging, parse_pairs};
use crate::output;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;

use pdk_engine::filter::{CompositeFilter, IndexFilter, JobNameFilter, NameFilter};
use pdk_engine::progress::{progress_channel, ProgressEvent, ProgressMode};
use pdk_engine::secrets::{global_masker, SecretManager};
use pdk_engine::{
    ExecutorConfig, ParserFactory, PdkConfig, PipelineExecutor, RunnerPolicy, VariableResolver,
    VariableSource,
};
use tokio_util::sync::CancellationToken;

/// Run a pipeline locally
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// Set a variable (can be repeated, format: NAME=VALUE)
    #[arg(long = "var", short = 'v', value_name = "NAME=VALUE")]
    pub variables: Vec<String>,

    /// Supply a secret (can be repeated, format: NAME=VALUE; always masked)
    #[arg(long = "secret", value_name = "NAME=VALUE")]
    pub secrets: Vec<String>,

    /// Runner backend: docker, host, or auto
    #[arg(long, value_name = "RUNNER")]
    pub runner: Option<String>,

    /// Workspace directory mounted into jobs
    #[arg(long, short = 'w', value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Run only steps with this display name (can be repeated, `*` wildcards)
    #[arg(long = "step", value_name = "NAME")]
    pub steps: Vec<String>,

    /// Skip steps with this display name (can be repeated, `*` wildcards)
    #[arg(long = "skip-step", value_name = "NAME")]
    pub skip_steps: Vec<String>,

    /// Run only steps at these 1-based indices (can be repeated)
    #[arg(long = "step-index", value_name = "N")]
    pub step_indices: Vec<usize>,

    /// Run only the named jobs (can be repeated, `*` wildcards)
    #[arg(long = "job", value_name = "JOB")]
    pub jobs: Vec<String>,

    /// Apply a configured preset of include/skip steps
    #[arg(long, value_name = "PRESET")]
    pub preset: Option<String>,

    /// Run independent jobs in parallel up to this many at once
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Forward every output line immediately
    #[arg(long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress per-line step output
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

pub async fn execute(args: RunArgs) -> Result<bool> {
    if !args.pipeline.exists() {
        color_eyre::eyre::bail!("pipeline file not found: {}", args.pipeline.display());
    }

    let cwd = std::env::current_dir()?;
    let config = PdkConfig::load(&cwd)?;
    init_logging(&config, args.verbose, args.quiet);
    global_masker().set_enabled(config.masking.enabled);

    // Secrets register with the masker before anything can print them.
    let secret_manager = SecretManager::from_environment();
    for (name, value) in parse_pairs(&args.secrets, "secret")? {
        secret_manager.put(&name, &value)?;
    }

    let mut resolver = VariableResolver::new();
    resolver.load_environment();
    resolver.set_all(&config.variables, VariableSource::ConfigFile);
    for (name, value) in parse_pairs(&args.variables, "variable")? {
        resolver.set(name, value, VariableSource::Cli);
    }
    // Secrets reach steps like CLI variables, but masked on the way out.
    for (name, value) in secret_manager.resolve_all()? {
        resolver.set(name, value, VariableSource::Cli);
    }

    output::status("Parsing", &args.pipeline.display().to_string());
    let factory = ParserFactory::new();
    let pipeline = match factory.parse_file(&args.pipeline) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            // Everything user-visible goes through the masker.
            output::error(&global_masker().mask(&e.to_string()));
            return Ok(false);
        }
    };
    output::info(&format!(
        "pipeline '{}' ({}): {} jobs, {} steps",
        pipeline.name,
        pipeline.provider,
        pipeline.jobs.len(),
        pipeline.step_count()
    ));

    let policy = match args.runner.as_deref().or(config.runner.as_deref()) {
        Some(policy) => policy
            .parse::<RunnerPolicy>()
            .map_err(|e| color_eyre::eyre::eyre!(e))?,
        None => RunnerPolicy::Auto,
    };

    let filter = build_filter(&args, &config)?;
    let progress_mode = if args.quiet {
        ProgressMode::Quiet
    } else if args.verbose {
        ProgressMode::Verbose
    } else {
        ProgressMode::Normal
    };

    let executor = PipelineExecutor::new(ExecutorConfig {
        policy,
        max_parallel_jobs: args.parallel.unwrap_or(0),
        workspace: args.workspace.clone(),
        filter,
        progress_mode,
    });

    // Validation gate: nothing runs past an error report.
    let report = executor.validate(&pipeline, &resolver);
    for issue in &report.issues {
        let rendered = global_masker().mask(&issue.to_string());
        match issue.severity {
            pdk_engine::Severity::Error => output::error(&rendered),
            pdk_engine::Severity::Warning => output::warning(&rendered),
            pdk_engine::Severity::Info => output::info(&rendered),
        }
    }
    if report.has_errors() {
        output::failure(&format!(
            "validation failed with {} error(s)",
            report.error_count()
        ));
        return Ok(false);
    }

    // Ctrl-C cancels everything in flight.
    let cancel = CancellationToken::new();
    let ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc.cancel();
        }
    });

    // The executor owns the progress sender; moving it into the task means
    // the channel closes (and the render loop below ends) when the run does.
    let (tx, mut rx) = progress_channel();
    let executor = executor.with_progress(tx);
    let exec_handle = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { executor.execute(&pipeline, resolver, cancel).await })
    };

    while let Some(event) = rx.recv().await {
        render_event(&event);
    }

    let result = exec_handle.await??;
    Ok(result.success)
}

fn build_filter(args: &RunArgs, config: &PdkConfig) -> Result<Option<Arc<CompositeFilter>>> {
    let mut filter = match &args.preset {
        Some(name) => {
            let preset = config.presets.get(name).ok_or_else(|| {
                color_eyre::eyre::eyre!(
                    "unknown preset '{}' (configured: {})",
                    name,
                    config.presets.keys().cloned().collect::<Vec<_>>().join(", ")
                )
            })?;
            CompositeFilter::from_preset(preset)
        }
        None => CompositeFilter::new(),
    };

    if !args.steps.is_empty() {
        filter.include(Box::new(NameFilter::new(args.steps.clone())));
    }
    if !args.step_indices.is_empty() {
        filter.include(Box::new(IndexFilter::new(args.step_indices.clone())));
    }
    if !args.jobs.is_empty() {
        filter.include(Box::new(JobNameFilter::new(args.jobs.clone())));
    }
    if !args.skip_steps.is_empty() {
        filter.skip(Box::new(NameFilter::new(args.skip_steps.clone())));
    }

    if filter.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Arc::new(filter)))
    }
}

fn render_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::PipelineStarted {
            pipeline_name,
            total_jobs,
            ..
        } => {
            eprintln!();
            output::header(&format!("pipeline '{}' ({} jobs)", pipeline_name, total_jobs));
        }
        ProgressEvent::PipelineCompleted {
            success, duration, ..
        } => {
            eprintln!();
            if *success {
                output::success(&format!(
                    "pipeline completed in {:.2}s",
                    duration.as_secs_f64()
                ));
            } else {
                output::failure(&format!(
                    "pipeline failed after {:.2}s",
                    duration.as_secs_f64()
                ));
            }
        }
        ProgressEvent::JobStarted {
            job_name,
            runner,
            total_steps,
            ..
        } => {
            output::running(&format!(
                "job '{}' on {} ({} steps)",
                job_name, runner, total_steps
            ));
        }
        ProgressEvent::JobCompleted {
            job_id,
            success,
            duration,
            ..
        } => {
            let line = format!("job '{}' ({:.2}s)", job_id, duration.as_secs_f64());
            if *success {
                output::success(&line);
            } else {
                output::failure(&line);
            }
        }
        ProgressEvent::JobSkipped { job_id, reason, .. } => {
            output::skipped(&format!("job '{}': {}", job_id, reason));
        }
        ProgressEvent::StepStarted {
            step_index,
            step_name,
            ..
        } => {
            output::running(&format!("  step {} '{}'", step_index + 1, step_name));
        }
        ProgressEvent::StepOutput { line, is_error, .. } => {
            if *is_error {
                output::step_error(line);
            } else {
                output::step_output(line);
            }
        }
        ProgressEvent::StepCompleted {
            step_name,
            success,
            exit_code,
            duration,
            ..
        } => {
            let line = format!(
                "  step '{}' exit {} ({:.2}s)",
                step_name,
                exit_code,
                duration.as_secs_f64()
            );
            if *success {
                output::success(&line);
            } else {
                output::failure(&line);
            }
        }
        ProgressEvent::StepSkipped {
            step_name, reason, ..
        } => {
            output::skipped(&format!("  step '{}': {}", step_name, reason));
        }
        ProgressEvent::ImagePull { message, .. } => {
            output::info(message);
        }
        ProgressEvent::Warning { message, .. } => {
            output::warning(message);
        }
    }
}
