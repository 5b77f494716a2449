//! Subcommand implementations.

use crate::{DriverArgs, InputArgs};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use pipeforge_plan::{BindingReport, ScriptCompiler, ScriptOptions, STDERR_LOG};
use pipeforge_runtime::{
    Analysis, AnalysisDescriptor, DriverConfig, FailureReport, Parallelism, ProgressMonitor,
    RunState, StatusColor,
};
use pipeforge_toolbox::Toolbox;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

impl InputArgs {
    fn descriptor(&self) -> AnalysisDescriptor {
        let name = self.name.clone().unwrap_or_else(|| {
            self.pipeline
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("analysis")
                .to_string()
        });
        AnalysisDescriptor::new(&self.toolbox, name, &self.pipeline, &self.table)
    }
}

impl DriverArgs {
    /// The config file, if any, with flags applied on top
    fn config(&self) -> Result<DriverConfig> {
        let mut config = match &self.config {
            Some(path) => DriverConfig::load(path)?,
            None => DriverConfig::default(),
        };
        if let Some(make) = &self.make {
            config.make_program = make.clone();
        }
        if let Some(jobs) = self.parallel {
            config.parallelism = Parallelism::Jobs(jobs);
        }
        if let Some(delegate) = &self.delegate {
            let mut words = delegate.split_whitespace().map(str::to_string);
            let program = words
                .next()
                .ok_or_else(|| eyre!("--delegate needs a command"))?;
            config.parallelism = Parallelism::Delegated {
                program,
                args: words.collect(),
            };
        }
        if self.keep_going {
            config.keep_going = true;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval = seconds(secs, "--poll-interval")?;
        }
        if let Some(secs) = self.poll_timeout {
            config.poll_timeout = seconds(secs, "--poll-timeout")?;
        }
        if let Some(secs) = self.run_timeout {
            config.run_timeout = Some(seconds(secs, "--run-timeout")?);
        }
        Ok(config)
    }
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .wrap_err_with(|| format!("{flag} must be a non-negative number"))
}

fn script_options(shell: Option<String>, keep_going: bool) -> ScriptOptions {
    let options = ScriptOptions::new().with_keep_going(keep_going);
    match shell {
        Some(shell) => options.with_shell(shell),
        None => options,
    }
}

fn exit(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// `pipeforge check`
pub(crate) fn check(inputs: &InputArgs) -> Result<ExitCode> {
    let (_, pipeline, table) = inputs.descriptor().load_inputs()?;
    let report = BindingReport::check(&pipeline, &table);

    for column in &report.missing {
        println!("{} {column}", style("missing").red().bold());
    }
    for column in &report.unused {
        println!("{} {column}", style("unused").yellow());
    }
    if report.is_ok() {
        println!(
            "{} {} rows, {} blocks",
            style("ok").green().bold(),
            table.len(),
            pipeline.block_count()
        );
    }
    Ok(exit(report.is_ok()))
}

/// `pipeforge compile`
pub(crate) fn compile(
    inputs: &InputArgs,
    output: Option<PathBuf>,
    stdout: bool,
    keep_going: bool,
    shell: Option<String>,
) -> Result<ExitCode> {
    let descriptor = inputs.descriptor();
    let output = output.unwrap_or_else(|| descriptor.default_output_root());
    let options = script_options(shell, keep_going);

    if stdout {
        let (_, pipeline, table) = descriptor.load_inputs()?;
        let script = ScriptCompiler::new(options).compile(&pipeline, &table, &output)?;
        print!("{}", script.text());
        return Ok(ExitCode::SUCCESS);
    }

    let config = DriverConfig::new().with_keep_going(keep_going);
    let analysis = descriptor.create_analysis(&output, options, config)?;
    println!("{}", analysis.output_root().display());
    Ok(ExitCode::SUCCESS)
}

/// `pipeforge run`
pub(crate) async fn run(
    inputs: &InputArgs,
    output: Option<PathBuf>,
    shell: Option<String>,
    driver: &DriverArgs,
) -> Result<ExitCode> {
    let descriptor = inputs.descriptor();
    let output = output.unwrap_or_else(|| descriptor.default_output_root());
    let config = driver.config()?;
    let poll_interval = config.poll_interval;
    let options = script_options(shell, config.keep_going);
    let analysis = Arc::new(descriptor.create_analysis(&output, options, config)?);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the build");
            interrupt.cancel();
        }
    });

    let monitor = ProgressMonitor::spawn(Arc::clone(&analysis), poll_interval);
    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}",
    )?);
    bar.enable_steady_tick(Duration::from_millis(200));
    let mut updates = monitor.subscribe();
    let progress = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let snapshot = updates.borrow_and_update().clone();
                if let Some(ratio) = snapshot.intermediate.ratio() {
                    bar.set_length(ratio.expected);
                    bar.set_position(ratio.produced.min(ratio.expected));
                }
                bar.set_message(format!("targets {}", snapshot.target));
            }
        })
    };

    let outcome = analysis.run(cancel).await;
    monitor.stop().await;
    progress.abort();
    bar.finish_and_clear();
    let outcome = outcome?;

    let (target, intermediate) =
        tokio::join!(analysis.target_ratio(), analysis.intermediate_ratio());
    let complete = pipeforge_runtime::is_complete(&target, &intermediate);
    let label = match outcome.exit_code {
        Some(code) => format!("{} (exit {code})", outcome.state),
        None => outcome.state.to_string(),
    };
    let label = match outcome.color(complete) {
        StatusColor::Green => style(label).green().bold(),
        StatusColor::Red => style(label).red().bold(),
    };
    println!(
        "{label} in {:.1?}: targets {target}, intermediates {intermediate}",
        outcome.elapsed
    );
    if !analysis.stderr_is_empty() {
        println!(
            "{} build wrote to {}",
            style("note:").yellow(),
            analysis.output_root().join(STDERR_LOG).display()
        );
    }

    if outcome.state != RunState::Succeeded || !complete {
        print_failures(&descriptor, analysis.output_root())?;
    }
    Ok(exit(outcome.color(complete) == StatusColor::Green))
}

fn print_failures(descriptor: &AnalysisDescriptor, output_root: &Path) -> Result<bool> {
    let (_, pipeline, table) = descriptor.load_inputs()?;
    let report = FailureReport::from_output_root(&pipeline, &table, output_root)?;
    if report.is_empty() {
        println!("No failures recorded");
    } else {
        print!("{report}");
    }
    Ok(report.is_empty())
}

fn open(output: &Path, driver: &DriverArgs) -> Result<Analysis> {
    let name = AnalysisDescriptor::load(output)
        .map(|d| d.analysis)
        .unwrap_or_else(|_| output.display().to_string());
    Ok(Analysis::open(name, output, driver.config()?)?)
}

/// `pipeforge status`
pub(crate) async fn status(output: &Path, driver: &DriverArgs) -> Result<ExitCode> {
    let analysis = open(output, driver)?;
    let (target, intermediate) =
        tokio::join!(analysis.target_ratio(), analysis.intermediate_ratio());
    let complete = pipeforge_runtime::is_complete(&target, &intermediate);
    println!("analysis      {}", analysis.name());
    println!("targets       {target}");
    println!("intermediates {intermediate}");
    let state = if complete {
        style("complete").green().bold()
    } else {
        style("incomplete").red().bold()
    };
    println!("status        {state}");
    Ok(ExitCode::SUCCESS)
}

/// `pipeforge failures`
pub(crate) fn failures(output: &Path) -> Result<ExitCode> {
    let descriptor = AnalysisDescriptor::load(output)
        .wrap_err_with(|| format!("{} is not an analysis output root", output.display()))?;
    let clean = print_failures(&descriptor, output)?;
    Ok(exit(clean))
}

/// `pipeforge clean`
pub(crate) async fn clean(output: &Path, driver: &DriverArgs) -> Result<ExitCode> {
    let analysis = open(output, driver)?;
    let code = analysis.clean().await?;
    if code == 0 {
        println!("Cleaned {}", analysis.output_root().display());
    }
    Ok(exit(code == 0))
}

/// `pipeforge formats`
pub(crate) fn formats(toolbox: &Path) -> Result<ExitCode> {
    let toolbox = Toolbox::load_dir(toolbox)?;
    for format in toolbox.formats().iter() {
        let parent = format.parent.as_deref().unwrap_or("-");
        let suffix: &str = if format.suffix.is_empty() { "-" } else { &format.suffix };
        println!("{:<16} {:<8} extends {parent}", format.name, suffix);
    }
    Ok(ExitCode::SUCCESS)
}

/// `pipeforge modules`
pub(crate) fn modules(toolbox: &Path) -> Result<ExitCode> {
    let toolbox = Toolbox::load_dir(toolbox)?;
    if let Some(about) = toolbox.about() {
        println!("{}\n", about.trim());
    }
    for def in toolbox.modules() {
        println!("{}", def.summary());
    }
    Ok(ExitCode::SUCCESS)
}
