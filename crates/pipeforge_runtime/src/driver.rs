//! Build tool invocation.
//!
//! [`MakeDriver`] runs the phase targets of a generated script (`setupall`,
//! `cleanall`, the ratio queries) and the main build. Every child runs in the
//! output root, in its own process group on unix, and is killed when its
//! future is dropped.

use crate::ratio::RatioReading;
use pipeforge_plan::{CompileError, DocumentError, TableError, SCRIPT_FILE_NAME};
use pipeforge_toolbox::ToolboxError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Jobs used by `--parallel` when no count is given
pub const DEFAULT_JOBS: usize = 8;

/// Error from driving an analysis
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// `run()` was called while a run is in flight
    #[error("Analysis is already running")]
    AlreadyRunning,

    /// The build tool could not be started
    #[error("Failed to start {program}: {message}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error message
        message: String,
    },

    /// A file or directory could not be accessed
    #[error("I/O error on {path}: {message}")]
    Io {
        /// Path involved
        path: String,
        /// Underlying error message
        message: String,
    },

    /// The table lacks columns the pipeline binds
    #[error("Table is missing bound columns: {}", .0.join(", "))]
    MissingData(Vec<String>),

    /// Script generation failed
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Toolbox loading failed
    #[error(transparent)]
    Toolbox(#[from] ToolboxError),

    /// Pipeline loading failed
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Table loading failed
    #[error(transparent)]
    Table(#[from] TableError),

    /// A descriptor or config file is malformed
    #[error("Malformed {path}: {message}")]
    Malformed {
        /// File path
        path: String,
        /// Parser message
        message: String,
    },
}

impl DriverError {
    pub(crate) fn io(path: &Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// How the main build spreads its work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    /// One recipe at a time
    #[default]
    Serial,
    /// `make -j <n>` on this machine
    Jobs(usize),
    /// Hand the make invocation to a wrapper, e.g. a cluster submit command
    ///
    /// The make arguments are appended after `args`.
    Delegated {
        /// Wrapper program
        program: String,
        /// Wrapper arguments placed before the make arguments
        args: Vec<String>,
    },
}

/// Build tool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Build tool executable
    pub make_program: String,
    /// Node parallelism of the main build
    pub parallelism: Parallelism,
    /// Continue past failed recipes
    pub keep_going: bool,
    /// Upper bound for one ratio query
    #[serde(with = "secs")]
    pub poll_timeout: Duration,
    /// Delay between progress polls
    #[serde(with = "secs")]
    pub poll_interval: Duration,
    /// Upper bound for the main build
    #[serde(with = "opt_secs")]
    pub run_timeout: Option<Duration>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            make_program: "make".to_string(),
            parallelism: Parallelism::Serial,
            keep_going: false,
            poll_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            run_timeout: None,
        }
    }
}

impl DriverConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the build tool executable
    #[must_use]
    pub fn with_make_program(mut self, program: impl Into<String>) -> Self {
        self.make_program = program.into();
        self
    }

    /// Set the parallelism
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set keep-going mode
    #[must_use]
    pub fn with_keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Set the ratio query timeout
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the progress poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bound the main build
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Read a JSON config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not a valid config
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| DriverError::io(path, &e))?;
        serde_json::from_str(&text).map_err(|e| DriverError::Malformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Program and arguments of the main build
    #[must_use]
    pub fn main_command(&self) -> (String, Vec<String>) {
        let mut make_args = Vec::new();
        if let Parallelism::Jobs(jobs) = self.parallelism {
            make_args.push("-j".to_string());
            make_args.push(jobs.max(1).to_string());
        }
        if self.keep_going {
            make_args.push("-k".to_string());
        }
        make_args.push("-f".to_string());
        make_args.push(SCRIPT_FILE_NAME.to_string());
        make_args.push("all".to_string());

        match &self.parallelism {
            Parallelism::Delegated { program, args } => {
                let mut full = args.clone();
                full.extend(make_args);
                (program.clone(), full)
            }
            Parallelism::Serial | Parallelism::Jobs(_) => (self.make_program.clone(), make_args),
        }
    }

    /// Program and arguments for a phase target, always run locally
    #[must_use]
    pub fn phase_command(&self, target: &str) -> (String, Vec<String>) {
        (
            self.make_program.clone(),
            vec![
                "-s".to_string(),
                "-f".to_string(),
                SCRIPT_FILE_NAME.to_string(),
                target.to_string(),
            ],
        )
    }
}

/// How the main build ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainExit {
    /// The process exited; `-1` when killed by a signal
    Exited(i32),
    /// The cancellation token fired
    Cancelled,
    /// The run timeout elapsed
    TimedOut,
}

/// Runs build tool invocations in one output root
#[derive(Debug, Clone)]
pub struct MakeDriver {
    config: DriverConfig,
    workdir: PathBuf,
}

impl MakeDriver {
    /// Create a driver for the script in `workdir`
    #[must_use]
    pub fn new(config: DriverConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workdir: workdir.into(),
        }
    }

    /// Driver settings
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Directory the build tool runs in
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn command(&self, program: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Run a phase target to completion and return its exit code
    ///
    /// # Errors
    ///
    /// Returns error if the build tool cannot be started
    pub async fn run_phase(&self, target: &str) -> Result<i32, DriverError> {
        let (program, args) = self.config.phase_command(target);
        debug!(target, program = %program, "Running phase");
        let output = self
            .command(&program, &args)
            .output()
            .await
            .map_err(|e| DriverError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;
        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            warn!(
                target,
                code,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Phase exited non-zero"
            );
        }
        Ok(code)
    }

    /// Run a ratio target, bounded by the poll timeout
    ///
    /// Never fails: spawn errors, non-zero exits, timeouts and bad output all
    /// come back as [`RatioReading::Unknown`].
    pub async fn query(&self, target: &str) -> RatioReading {
        let (program, args) = self.config.phase_command(target);
        let output =
            tokio::time::timeout(self.config.poll_timeout, self.command(&program, &args).output())
                .await;
        let reading = match output {
            Err(_) => {
                warn!(target, timeout = ?self.config.poll_timeout, "Ratio query timed out");
                RatioReading::Unknown("timed out".to_string())
            }
            Ok(Err(e)) => RatioReading::Unknown(format!("failed to start {program}: {e}")),
            Ok(Ok(out)) if !out.status.success() => RatioReading::Unknown(format!(
                "exit code {}",
                out.status.code().unwrap_or(-1)
            )),
            Ok(Ok(out)) => RatioReading::from_output(&String::from_utf8_lossy(&out.stdout)),
        };
        debug!(target, reading = %reading, "Ratio polled");
        reading
    }

    /// Run the main build with its output sent to the given log files
    ///
    /// The child is stopped with its whole process group when `cancel`
    /// fires or the run timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns error if the build tool cannot be started or awaited
    pub async fn run_main(
        &self,
        stdout: std::fs::File,
        stderr: std::fs::File,
        cancel: &CancellationToken,
    ) -> Result<MainExit, DriverError> {
        let (program, args) = self.config.main_command();
        let mut child = self
            .command(&program, &args)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| DriverError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;

        let run_timeout = self.config.run_timeout;
        let deadline = async move {
            match run_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| DriverError::Io {
                    path: self.workdir.display().to_string(),
                    message: e.to_string(),
                })?;
                Ok(MainExit::Exited(status.code().unwrap_or(-1)))
            }
            () = cancel.cancelled() => {
                terminate(&mut child).await;
                Ok(MainExit::Cancelled)
            }
            () = deadline => {
                terminate(&mut child).await;
                Ok(MainExit::TimedOut)
            }
        }
    }
}

/// Stop a child and everything it started
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let group = format!("-{pid}");
        let status = Command::new("kill")
            .args(["-TERM", "--", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            warn!(pid, error = %e, "Could not signal process group");
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Child already gone");
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
