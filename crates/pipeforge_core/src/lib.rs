//! Pipeforge Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Block and connection ids are the only stable references shared by the
//! graph model, persisted documents, and the failure report.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::{BlockId, ConnectionId, IdAllocator, PortDirection, PortRef};
