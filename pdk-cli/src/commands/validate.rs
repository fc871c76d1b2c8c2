use crate::commands::init_logging;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use pdk_engine::{
    ExecutorConfig, ParserFactory, PdkConfig, PipelineExecutor, Severity, VariableResolver,
    VariableSource,
};

/// Parse and validate a pipeline file without running it
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<bool> {
    if !args.pipeline.exists() {
        color_eyre::eyre::bail!("pipeline file not found: {}", args.pipeline.display());
    }

    let cwd = std::env::current_dir()?;
    let config = PdkConfig::load(&cwd)?;
    init_logging(&config, false, false);

    output::status("Validating", &args.pipeline.display().to_string());
    let factory = ParserFactory::new();
    let pipeline = match factory.parse_file(&args.pipeline) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            output::error(&pdk_engine::secrets::global_masker().mask(&e.to_string()));
            return Ok(false);
        }
    };

    let mut resolver = VariableResolver::new();
    resolver.load_environment();
    resolver.set_all(&config.variables, VariableSource::ConfigFile);

    let executor = PipelineExecutor::new(ExecutorConfig::default());
    let report = executor.validate(&pipeline, &resolver);

    for issue in &report.issues {
        match issue.severity {
            Severity::Error => output::error(&issue.to_string()),
            Severity::Warning => output::warning(&issue.to_string()),
            Severity::Info => output::info(&issue.to_string()),
        }
    }

    if report.has_errors() {
        output::failure(&format!(
            "{}: {} error(s)",
            args.pipeline.display(),
            report.error_count()
        ));
        Ok(false)
    } else {
        output::success(&format!(
            "{}: {} jobs, {} steps, no errors",
            args.pipeline.display(),
            pipeline.jobs.len(),
            pipeline.step_count()
        ));
        Ok(true)
    }
}
