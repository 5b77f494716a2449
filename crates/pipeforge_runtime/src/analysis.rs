//! Analyses: one pipeline, one table and one output root bound together.
//!
//! Creating an analysis freezes the pipeline into a build script on disk.
//! Running it follows `Idle -> Running -> {Succeeded, Failed, TimedOut}`;
//! `clean` returns it to `Idle`.

use crate::driver::{DriverConfig, DriverError, MainExit, MakeDriver};
use crate::ratio::{self, RatioReading};
use pipeforge_plan::{
    BindingReport, BuildScript, Pipeline, ScriptCompiler, ScriptOptions, Table, SCRIPT_FILE_NAME,
    STDERR_LOG, STDOUT_LOG,
};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Execution state of an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// Not started, or cleaned
    Idle,
    /// A run is in flight
    Running,
    /// The main build exited zero
    Succeeded,
    /// Setup or the main build failed, or the run was cancelled
    Failed,
    /// The run timeout elapsed
    TimedOut,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

/// Colour of the final status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusColor {
    /// Succeeded with every artifact present
    Green,
    /// Anything else
    Red,
}

/// Result of one `run()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Final state
    pub state: RunState,
    /// Exit code of the failing phase or the main build
    pub exit_code: Option<i32>,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Status colour given the completeness check made after the run
    #[must_use]
    pub fn color(&self, complete: bool) -> StatusColor {
        if self.state == RunState::Succeeded && complete {
            StatusColor::Green
        } else {
            StatusColor::Red
        }
    }
}

/// Sets the state back to `Failed` if a run is abandoned mid-flight
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == RunState::Running {
            *state = RunState::Failed;
        }
    }
}

/// A runnable build over one output root
#[derive(Debug)]
pub struct Analysis {
    name: String,
    driver: MakeDriver,
    state: Mutex<RunState>,
}

impl Analysis {
    /// Compile `pipeline` over `table` and write the script into `output_root`
    ///
    /// The keep-going flag of `options` is taken from `config` so the catch
    /// clause always matches how make is invoked.
    ///
    /// # Errors
    ///
    /// Returns error if the table lacks bound columns, compilation fails or
    /// the script cannot be written
    pub fn create(
        name: impl Into<String>,
        pipeline: &Pipeline,
        table: &Table,
        output_root: impl AsRef<Path>,
        options: ScriptOptions,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let report = BindingReport::check(pipeline, table);
        if !report.is_ok() {
            return Err(DriverError::MissingData(report.missing.into_iter().collect()));
        }
        let options = options.with_keep_going(config.keep_going);
        let script = ScriptCompiler::new(options).compile(pipeline, table, output_root.as_ref())?;
        script.write()?;
        Ok(Self::from_script(name, &script, config))
    }

    fn from_script(name: impl Into<String>, script: &BuildScript, config: DriverConfig) -> Self {
        Self {
            name: name.into(),
            driver: MakeDriver::new(config, script.output_root()),
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Attach to an output root that already holds a script
    ///
    /// # Errors
    ///
    /// Returns error if the script is missing
    pub fn open(
        name: impl Into<String>,
        output_root: impl Into<PathBuf>,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let output_root = output_root.into();
        let script = output_root.join(SCRIPT_FILE_NAME);
        std::fs::metadata(&script).map_err(|e| DriverError::io(&script, &e))?;
        Ok(Self {
            name: name.into(),
            driver: MakeDriver::new(config, output_root),
            state: Mutex::new(RunState::Idle),
        })
    }

    /// Analysis name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output root holding the script, logs and artifacts
    #[must_use]
    pub fn output_root(&self) -> &Path {
        self.driver.workdir()
    }

    /// Driver settings
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        self.driver.config()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: RunState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Run `setupall`, then the main build
    ///
    /// A non-zero setup exit stops the run and is reported as the exit code.
    /// Cancelling `cancel` kills the build's process group and fails the run;
    /// artifacts already produced stay on disk.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::AlreadyRunning`] if a run is in flight, or an
    /// error if the build tool or the log files cannot be opened
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunOutcome, DriverError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == RunState::Running {
                return Err(DriverError::AlreadyRunning);
            }
            *state = RunState::Running;
        }
        let _guard = RunGuard { state: &self.state };
        let started = Instant::now();

        let (state, exit_code) = self.run_phases(&cancel).await?;
        let outcome = RunOutcome {
            state,
            exit_code,
            elapsed: started.elapsed(),
        };
        self.set_state(state);
        info!(
            analysis = %self.name,
            state = %outcome.state,
            exit_code = ?outcome.exit_code,
            elapsed = ?outcome.elapsed,
            "Run finished"
        );
        Ok(outcome)
    }

    async fn run_phases(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(RunState, Option<i32>), DriverError> {
        info!(analysis = %self.name, "Running setup");
        let setup = self.driver.run_phase("setupall").await?;
        if setup != 0 {
            return Ok((RunState::Failed, Some(setup)));
        }
        if cancel.is_cancelled() {
            return Ok((RunState::Failed, None));
        }

        let stdout = self.open_log(STDOUT_LOG)?;
        let stderr = self.open_log(STDERR_LOG)?;
        info!(analysis = %self.name, command = ?self.config().main_command(), "Starting main build");
        let result = match self.driver.run_main(stdout, stderr, cancel).await? {
            MainExit::Exited(0) => (RunState::Succeeded, Some(0)),
            MainExit::Exited(code) => (RunState::Failed, Some(code)),
            MainExit::Cancelled => {
                info!(analysis = %self.name, "Run cancelled");
                (RunState::Failed, None)
            }
            MainExit::TimedOut => (RunState::TimedOut, None),
        };
        Ok(result)
    }

    fn open_log(&self, name: &str) -> Result<std::fs::File, DriverError> {
        let path = self.output_root().join(name);
        std::fs::File::create(&path).map_err(|e| DriverError::io(&path, &e))
    }

    /// Run `cleanall` and return its exit code
    ///
    /// An idle or finished analysis returns to `Idle`; a running one keeps
    /// its state.
    ///
    /// # Errors
    ///
    /// Returns error if the build tool cannot be started
    pub async fn clean(&self) -> Result<i32, DriverError> {
        info!(analysis = %self.name, "Cleaning artifacts");
        let code = self.driver.run_phase("cleanall").await?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != RunState::Running {
            *state = RunState::Idle;
        }
        Ok(code)
    }

    /// Sink targets present over sink targets declared
    pub async fn target_ratio(&self) -> RatioReading {
        self.driver.query("target_ratio").await
    }

    /// Targets and module outputs present over those declared
    pub async fn intermediate_ratio(&self) -> RatioReading {
        self.driver.query("intermediate_ratio").await
    }

    /// Both ratios are known and each is complete
    pub async fn is_complete(&self) -> bool {
        let (target, intermediate) = tokio::join!(self.target_ratio(), self.intermediate_ratio());
        ratio::is_complete(&target, &intermediate)
    }

    /// Captured standard output of the last main build
    #[must_use]
    pub fn stdout_text(&self) -> String {
        self.read_log(STDOUT_LOG)
    }

    /// Captured standard error of the last main build
    #[must_use]
    pub fn stderr_text(&self) -> String {
        self.read_log(STDERR_LOG)
    }

    fn read_log(&self, name: &str) -> String {
        let path = self.output_root().join(name);
        std::fs::read_to_string(&path)
            .unwrap_or_else(|e| format!("Unable to read {}: {e}", path.display()))
    }

    /// The last main build wrote nothing to standard error
    #[must_use]
    pub fn stderr_is_empty(&self) -> bool {
        !std::fs::metadata(self.output_root().join(STDERR_LOG)).is_ok_and(|m| m.len() > 0)
    }
}
