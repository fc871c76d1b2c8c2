use color_eyre::Result;

mod commands;
mod output;

use clap::{Parser, Subcommand};

/// PDK - run CI/CD pipelines on your own machine
///
/// Parses GitHub Actions and Azure DevOps pipeline YAML and executes the
/// jobs locally, in containers or directly on the host.
#[derive(Parser, Debug)]
#[command(name = "pdk", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a pipeline locally
    Run(commands::run::RunArgs),

    /// Parse and validate a pipeline file without running it
    Validate(commands::validate::ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let ok = match cli.command {
        Commands::Run(args) => commands::run::execute(args).await?,
        Commands::Validate(args) => commands::validate::execute(args)?,
    };

    pdk_engine::logging::shutdown();
    if !ok {
        // Execution and validation failures map to exit code 1; clap handles
        // usage errors with exit code 2.
        std::process::exit(1);
    }
    Ok(())
}
