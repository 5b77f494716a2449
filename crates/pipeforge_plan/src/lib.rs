//! Pipeforge Planner
//!
//! The typed pipeline graph, row-oriented data tables, the JSON pipeline
//! document, and the compiler that turns a pipeline plus a table into a
//! per-row build script.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod graph;
pub mod table;
pub mod validate;
pub mod document;
pub mod compiler;

pub use graph::{Block, BlockKind, Connection, GraphError, Pipeline, Port, Position};
pub use table::{Row, Table, TableError};
pub use validate::BindingReport;
pub use document::{DocumentError, PipelineDocument};
pub use compiler::{
    BuildScript, CompileError, ScriptCompiler, ScriptOptions, ERRORS_DIR, PROCESSING_DIR,
    SCRIPT_FILE_NAME, STDERR_LOG, STDOUT_LOG,
};

#[cfg(test)]
pub(crate) mod testing;
