//! Pipeforge Runtime
//!
//! Runs generated build scripts: the make driver and its run state machine,
//! ratio polling and the progress monitor, the analysis descriptor, and the
//! failure report rebuilt from error markers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ratio;
pub mod driver;
pub mod analysis;
pub mod monitor;
pub mod failure;
pub mod descriptor;

pub use ratio::{is_complete, Ratio, RatioReading};
pub use driver::{DriverConfig, DriverError, MainExit, MakeDriver, Parallelism};
pub use analysis::{Analysis, RunOutcome, RunState, StatusColor};
pub use monitor::{ProgressMonitor, ProgressSnapshot};
pub use failure::{FailureEntry, FailureMarker, FailureReport, TreeLine, TreeNode};
pub use descriptor::{AnalysisDescriptor, DESCRIPTOR_FILE_NAME};
