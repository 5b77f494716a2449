//! Pipeforge CLI
//!
//! Checks, compiles and runs pipelines over data tables, and inspects the
//! results of earlier runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod commands;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipeforge")]
#[command(about = "Compile typed pipelines into per-row build scripts and run them", long_about = None)]
struct Cli {
    /// Log level for pipeforge crates (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Toolbox, pipeline and table of an analysis
#[derive(Args, Debug, Clone)]
pub(crate) struct InputArgs {
    /// Toolbox directory
    #[arg(short, long)]
    pub toolbox: PathBuf,
    /// Pipeline document
    #[arg(short, long)]
    pub pipeline: PathBuf,
    /// Data table
    #[arg(long)]
    pub table: PathBuf,
    /// Analysis name (defaults to the pipeline file stem)
    #[arg(short, long)]
    pub name: Option<String>,
}

/// Build tool settings; flags override the config file
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct DriverArgs {
    /// JSON driver config file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Build tool executable
    #[arg(long)]
    pub make: Option<String>,
    /// Run recipes in parallel (default 8 jobs)
    #[arg(long, num_args = 0..=1, default_missing_value = "8", conflicts_with = "delegate")]
    pub parallel: Option<usize>,
    /// Wrapper command that runs make elsewhere, e.g. "qmake -cwd -v PATH --"
    #[arg(long)]
    pub delegate: Option<String>,
    /// Continue past failed recipes
    #[arg(short, long)]
    pub keep_going: bool,
    /// Seconds between progress polls
    #[arg(long)]
    pub poll_interval: Option<f64>,
    /// Seconds before a progress poll gives up
    #[arg(long)]
    pub poll_timeout: Option<f64>,
    /// Seconds before the main build is stopped
    #[arg(long)]
    pub run_timeout: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the table provides every column the pipeline binds
    Check {
        #[command(flatten)]
        inputs: InputArgs,
    },
    /// Write the build script and descriptor
    Compile {
        #[command(flatten)]
        inputs: InputArgs,
        /// Output root (defaults to <toolbox>/data/<name>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the script instead of writing it
        #[arg(long)]
        stdout: bool,
        /// Generate catch clauses that let failed recipes pass
        #[arg(short, long)]
        keep_going: bool,
        /// Recipe shell
        #[arg(long)]
        shell: Option<String>,
    },
    /// Compile and run an analysis
    Run {
        #[command(flatten)]
        inputs: InputArgs,
        /// Output root (defaults to <toolbox>/data/<name>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Recipe shell
        #[arg(long)]
        shell: Option<String>,
        #[command(flatten)]
        driver: DriverArgs,
    },
    /// Show progress ratios of an output root
    Status {
        /// Output root
        output: PathBuf,
        #[command(flatten)]
        driver: DriverArgs,
    },
    /// Show the failure report of an output root
    Failures {
        /// Output root
        output: PathBuf,
    },
    /// Remove targets, intermediates and error markers
    Clean {
        /// Output root
        output: PathBuf,
        #[command(flatten)]
        driver: DriverArgs,
    },
    /// List the formats of a toolbox
    Formats {
        /// Toolbox directory
        toolbox: PathBuf,
    },
    /// List the modules of a toolbox
    Modules {
        /// Toolbox directory
        toolbox: PathBuf,
    },
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("pipeforge={level}")),
        None => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pipeforge=info"))
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Commands::Check { inputs } => commands::check(&inputs),
        Commands::Compile {
            inputs,
            output,
            stdout,
            keep_going,
            shell,
        } => commands::compile(&inputs, output, stdout, keep_going, shell),
        Commands::Run {
            inputs,
            output,
            shell,
            driver,
        } => commands::run(&inputs, output, shell, &driver).await,
        Commands::Status { output, driver } => commands::status(&output, &driver).await,
        Commands::Failures { output } => commands::failures(&output),
        Commands::Clean { output, driver } => commands::clean(&output, &driver).await,
        Commands::Formats { toolbox } => commands::formats(&toolbox),
        Commands::Modules { toolbox } => commands::modules(&toolbox),
    }
}
