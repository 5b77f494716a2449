//! Pipeforge Toolbox
//!
//! File formats with single-parent subtyping, port parameters, module
//! definitions with command templates, and the on-disk toolbox catalog.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod format;
pub mod schema;
pub mod template;
pub mod registry;

pub use format::{Format, FormatError, FormatRegistry, Rgb, ARG_FORMAT};
pub use schema::{ModuleDef, Parameter};
pub use template::{CommandTemplate, TemplateError};
pub use registry::{Toolbox, ToolboxError};
