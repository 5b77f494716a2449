//! Identifiers for pipeforge graph elements.
//!
//! Ids are plain integers assigned by an [`IdAllocator`] owned by each
//! pipeline. They survive save/load unchanged and are never reused.

use serde::{Deserialize, Serialize};

/// Block identifier - identifies a Source, Module, or Sink in a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(u64);

impl BlockId {
    /// Create from a raw value (used when loading persisted ids)
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BlockId {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|e| crate::CoreError::InvalidId {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Connection identifier - identifies an edge in a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create from a raw value
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Direction of a port relative to its block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PortDirection {
    /// Data flows into the block
    Input,
    /// Data flows out of the block
    Output,
}

/// Stable reference to a port: (block, direction, ordinal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    /// Owning block
    pub block: BlockId,
    /// Input or output side
    pub direction: PortDirection,
    /// Ordinal index among the block's ports of this direction
    pub index: usize,
}

impl PortRef {
    /// Reference an input port
    #[must_use]
    pub const fn input(block: BlockId, index: usize) -> Self {
        Self {
            block,
            direction: PortDirection::Input,
            index,
        }
    }

    /// Reference an output port
    #[must_use]
    pub const fn output(block: BlockId, index: usize) -> Self {
        Self {
            block,
            direction: PortDirection::Output,
            index,
        }
    }

    /// Check if this references an input port
    #[must_use]
    pub const fn is_input(&self) -> bool {
        matches!(self.direction, PortDirection::Input)
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.direction {
            PortDirection::Input => "in",
            PortDirection::Output => "out",
        };
        write!(f, "{}.{}{}", self.block, side, self.index)
    }
}

/// Allocator for block and connection ids
///
/// Owned by a single pipeline. Loading seeds it from persisted ids so new
/// elements never collide with saved ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdAllocator {
    next_block: u64,
    next_connection: u64,
}

impl IdAllocator {
    /// Create an allocator starting at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh block id
    pub fn next_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    /// Allocate a fresh connection id
    pub fn next_connection(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        id
    }

    /// Record a block id that already exists (e.g. loaded from disk)
    pub fn observe_block(&mut self, id: BlockId) {
        if id.0 >= self.next_block {
            self.next_block = id.0 + 1;
        }
    }

    /// Peek at the next block id without allocating it
    #[must_use]
    pub const fn peek_block(&self) -> BlockId {
        BlockId(self.next_block)
    }
}
