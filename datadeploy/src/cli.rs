//! # datadeploy CLI interface
//!
//! Command parsing and orchestration glue for the `datadeploy` binary. Job
//! execution, record normalization and the failure policy all live in
//! `datadeploy-core`; this module resolves the working directory, loads the
//! job file and connection settings, runs a driver and prints the summary.
//!
//! For programmatic or integration use, call [`run`] with a constructed [`Cli`].

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use datadeploy_core::config::load_deployment_config;
use datadeploy_core::deploy::deploy;
use datadeploy_core::paths::{absolute_path, PathFilter};
use datadeploy_core::retrieve::retrieve;
use datadeploy_core::run::RunOptions;

use crate::connection::HttpConnection;
use crate::load_config::ConnectionSettings;
use crate::summary::print_summary;

/// CLI for datadeploy: move record data files in and out of an org through bulk jobs.
#[derive(Parser)]
#[clap(
    name = "datadeploy",
    version,
    about = "Deploy and retrieve record data files listed in datadeploy.json"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy every data file listed in datadeploy.json through bulk insert/upsert jobs
    Deploy(RunArgs),
    /// Query every job's entity and write the normalized records to its data file
    Retrieve(RunArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Directory containing datadeploy.json (defaults to the current directory)
    #[clap(short = 'd', long)]
    pub deploydir: Option<PathBuf>,

    /// Only process these data files, relative to the directory (comma separated)
    #[clap(long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Never process these data files, relative to the directory (comma separated)
    #[clap(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Print the run result as JSON instead of a table
    #[clap(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Deploy,
    Retrieve,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Deploy => f.write_str("deploy"),
            Mode::Retrieve => f.write_str("retrieve"),
        }
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Deploy(args) => execute(Mode::Deploy, args).await,
        Commands::Retrieve(args) => execute(Mode::Retrieve, args).await,
    }
}

async fn execute(mode: Mode, args: RunArgs) -> Result<()> {
    let base_directory = absolute_path(&args.deploydir.unwrap_or_default())
        .context("Failed to resolve the deployment directory")?;
    tracing::info!(command = %mode, deployment_directory = %base_directory.display(), "Resolved deployment directory");

    let config = load_deployment_config(&base_directory)?;
    let settings = ConnectionSettings::from_env()?;
    let connection = HttpConnection::new(settings)?;

    let options = RunOptions::new(base_directory)
        .with_filter(PathFilter::new(args.include, args.exclude));

    let outcome = match mode {
        Mode::Deploy => deploy(&connection, &config, &options).await,
        Mode::Retrieve => retrieve(&connection, &config, &options).await,
    };

    match outcome {
        Ok(result) => {
            tracing::info!(
                command = %mode,
                succeeded = result.total_succeeded(),
                failed = result.total_failed(),
                "Run complete"
            );
            print_summary(&result, args.json)
        }
        Err(failure) => {
            tracing::error!(command = %mode, error = %failure.error, "Run aborted");
            print_summary(&failure.result, args.json)?;
            Err(anyhow::Error::new(failure.error).context(format!("{mode} aborted")))
        }
    }
}
