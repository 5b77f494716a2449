//! Typed pipeline graph.
//!
//! A pipeline holds Source, Module and Sink blocks joined by connections
//! from output ports to input ports. Every edge is type checked against the
//! toolbox format registry when it is made, and an input port accepts at most
//! one connection. Blocks and ports are addressed by id ([`PortRef`]), never
//! by reference.

use indexmap::{IndexMap, IndexSet};
use pipeforge_core::{BlockId, ConnectionId, IdAllocator, PortDirection, PortRef};
use pipeforge_toolbox::{ModuleDef, Parameter, Toolbox, ToolboxError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Error from graph edits
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The output's format is not a valid input to the input's format
    #[error("Format '{from}' is not a valid input to '{to}'")]
    IncompatibleFormat {
        /// Format of the output port
        from: String,
        /// Format of the input port
        to: String,
    },

    /// The input port already has a connection
    #[error("Input port {port} is already connected")]
    PortOccupied {
        /// The occupied input port
        port: PortRef,
    },

    /// No block with this id
    #[error("Block not found: {0}")]
    UnknownBlock(BlockId),

    /// The block has no such port
    #[error("Port not found: {0}")]
    UnknownPort(PortRef),

    /// No connection with this id
    #[error("Connection not found: {0}")]
    UnknownConnection(ConnectionId),

    /// A block with this id already exists
    #[error("Block id {0} is already in use")]
    DuplicateBlockId(BlockId),

    /// A source or sink names a format the toolbox does not define
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    /// Toolbox lookup failed
    #[error(transparent)]
    Toolbox(#[from] ToolboxError),
}

/// Canvas position of a block, carried through save and load
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate
    #[serde(rename = "X")]
    pub x: f64,
    /// Vertical coordinate
    #[serde(rename = "Y")]
    pub y: f64,
}

impl Position {
    /// Create a position
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A typed attachment point on a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    /// Declared parameter
    pub parameter: Parameter,
    /// Ordinal among the block's ports of the same direction
    pub index: usize,
    connections: Vec<ConnectionId>,
}

impl Port {
    fn new(parameter: Parameter, index: usize) -> Self {
        Self {
            parameter,
            index,
            connections: Vec::new(),
        }
    }

    /// Connections attached to this port, oldest first
    #[must_use]
    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }

    /// Check if any connection is attached
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Format name of the port
    #[must_use]
    pub fn format(&self) -> &str {
        &self.parameter.format
    }
}

/// Block variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Reads one table column; a single output port
    Source {
        /// Bound table column
        column: String,
        /// The output port
        output: Port,
    },
    /// Runs a module command
    Module {
        /// Module definition from the toolbox
        def: Arc<ModuleDef>,
        /// Input ports in declaration order
        inputs: Vec<Port>,
        /// Output ports in declaration order
        outputs: Vec<Port>,
    },
    /// Writes the file named by one table column; a single input port
    Sink {
        /// Bound table column
        column: String,
        /// The input port
        input: Port,
    },
}

/// A node of the pipeline graph
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Unique id within the pipeline
    pub id: BlockId,
    /// Canvas position
    pub position: Position,
    /// Variant-specific data
    pub kind: BlockKind,
}

impl Block {
    /// Input ports
    #[must_use]
    pub fn inputs(&self) -> &[Port] {
        match &self.kind {
            BlockKind::Source { .. } => &[],
            BlockKind::Module { inputs, .. } => inputs,
            BlockKind::Sink { input, .. } => std::slice::from_ref(input),
        }
    }

    /// Output ports
    #[must_use]
    pub fn outputs(&self) -> &[Port] {
        match &self.kind {
            BlockKind::Source { output, .. } => std::slice::from_ref(output),
            BlockKind::Module { outputs, .. } => outputs,
            BlockKind::Sink { .. } => &[],
        }
    }

    fn ports_mut(&mut self, direction: PortDirection) -> &mut [Port] {
        match (&mut self.kind, direction) {
            (BlockKind::Source { output, .. }, PortDirection::Output) => {
                std::slice::from_mut(output)
            }
            (BlockKind::Module { inputs, .. }, PortDirection::Input) => inputs,
            (BlockKind::Module { outputs, .. }, PortDirection::Output) => outputs,
            (BlockKind::Sink { input, .. }, PortDirection::Input) => std::slice::from_mut(input),
            _ => Default::default(),
        }
    }

    /// Look up a port by direction and index
    #[must_use]
    pub fn port(&self, direction: PortDirection, index: usize) -> Option<&Port> {
        match direction {
            PortDirection::Input => self.inputs().get(index),
            PortDirection::Output => self.outputs().get(index),
        }
    }

    /// Module name for modules, bound column for sources and sinks
    #[must_use]
    pub fn label(&self) -> &str {
        match &self.kind {
            BlockKind::Source { column, .. } | BlockKind::Sink { column, .. } => column,
            BlockKind::Module { def, .. } => &def.name,
        }
    }

    /// Bound table column of a source or sink
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        match &self.kind {
            BlockKind::Source { column, .. } | BlockKind::Sink { column, .. } => Some(column),
            BlockKind::Module { .. } => None,
        }
    }

    /// Module definition of a module block
    #[must_use]
    pub fn module(&self) -> Option<&Arc<ModuleDef>> {
        match &self.kind {
            BlockKind::Module { def, .. } => Some(def),
            _ => None,
        }
    }

    /// Check if this is a source
    #[must_use]
    pub fn is_source(&self) -> bool {
        matches!(self.kind, BlockKind::Source { .. })
    }

    /// Check if this is a module
    #[must_use]
    pub fn is_module(&self) -> bool {
        matches!(self.kind, BlockKind::Module { .. })
    }

    /// Check if this is a sink
    #[must_use]
    pub fn is_sink(&self) -> bool {
        matches!(self.kind, BlockKind::Sink { .. })
    }
}

/// A directed edge from an output port to an input port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    /// Connection id
    pub id: ConnectionId,
    /// Output port the data leaves from
    pub from: PortRef,
    /// Input port the data arrives at
    pub to: PortRef,
}

/// A pipeline: blocks, connections and the toolbox they are typed against
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    toolbox: Arc<Toolbox>,
    ids: IdAllocator,
    blocks: IndexMap<BlockId, Block>,
    connections: IndexMap<ConnectionId, Connection>,
    dirty: bool,
}

impl Pipeline {
    /// Create an empty pipeline
    #[must_use]
    pub fn new(name: impl Into<String>, toolbox: Arc<Toolbox>) -> Self {
        Self {
            name: name.into(),
            toolbox,
            ids: IdAllocator::new(),
            blocks: IndexMap::new(),
            connections: IndexMap::new(),
            dirty: false,
        }
    }

    /// Pipeline name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the pipeline
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.dirty = true;
    }

    /// The toolbox blocks are typed against
    #[must_use]
    pub fn toolbox(&self) -> &Arc<Toolbox> {
        &self.toolbox
    }

    /// Add a source bound to `column`
    ///
    /// # Errors
    ///
    /// Returns error if the parameter's format is unknown
    pub fn add_source(
        &mut self,
        column: impl Into<String>,
        parameter: Parameter,
        position: Position,
    ) -> Result<BlockId, GraphError> {
        self.check_format(&parameter.format)?;
        let id = self.ids.next_block();
        self.insert(Self::source_block(id, column.into(), parameter, position))?;
        Ok(id)
    }

    /// Add a sink bound to `column`
    ///
    /// # Errors
    ///
    /// Returns error if the parameter's format is unknown
    pub fn add_sink(
        &mut self,
        column: impl Into<String>,
        parameter: Parameter,
        position: Position,
    ) -> Result<BlockId, GraphError> {
        self.check_format(&parameter.format)?;
        let id = self.ids.next_block();
        self.insert(Self::sink_block(id, column.into(), parameter, position))?;
        Ok(id)
    }

    /// Add a block running the toolbox module `name`
    ///
    /// # Errors
    ///
    /// Returns error if the toolbox has no such module
    pub fn add_module(&mut self, name: &str, position: Position) -> Result<BlockId, GraphError> {
        let def = self.toolbox.module(name)?;
        let id = self.ids.next_block();
        self.insert(Self::module_block(id, def, position))?;
        Ok(id)
    }

    /// Insert a block that already carries an id (used when loading)
    pub(crate) fn restore(&mut self, block: Block) -> Result<(), GraphError> {
        for port in block.inputs().iter().chain(block.outputs()) {
            self.check_format(port.format())?;
        }
        self.insert(block)
    }

    pub(crate) fn source_block(
        id: BlockId,
        column: String,
        parameter: Parameter,
        position: Position,
    ) -> Block {
        Block {
            id,
            position,
            kind: BlockKind::Source {
                column,
                output: Port::new(parameter, 0),
            },
        }
    }

    pub(crate) fn sink_block(
        id: BlockId,
        column: String,
        parameter: Parameter,
        position: Position,
    ) -> Block {
        Block {
            id,
            position,
            kind: BlockKind::Sink {
                column,
                input: Port::new(parameter, 0),
            },
        }
    }

    pub(crate) fn module_block(id: BlockId, def: Arc<ModuleDef>, position: Position) -> Block {
        let inputs = def
            .inputs
            .iter()
            .enumerate()
            .map(|(i, p)| Port::new(p.clone(), i))
            .collect();
        let outputs = def
            .outputs
            .iter()
            .enumerate()
            .map(|(i, p)| Port::new(p.clone(), i))
            .collect();
        Block {
            id,
            position,
            kind: BlockKind::Module {
                def,
                inputs,
                outputs,
            },
        }
    }

    fn check_format(&self, format: &str) -> Result<(), GraphError> {
        if self.toolbox.formats().contains(format) {
            Ok(())
        } else {
            Err(GraphError::UnknownFormat(format.to_string()))
        }
    }

    fn insert(&mut self, block: Block) -> Result<(), GraphError> {
        if self.blocks.contains_key(&block.id) {
            return Err(GraphError::DuplicateBlockId(block.id));
        }
        self.ids.observe_block(block.id);
        debug!(block = %block.id, label = block.label(), "Added block");
        self.blocks.insert(block.id, block);
        self.dirty = true;
        Ok(())
    }

    /// Connect an output port to an input port
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleFormat` unless the output's format is a valid
    /// input to the input's format, and `PortOccupied` if the input already
    /// has a connection. The graph is unchanged on error.
    pub fn connect(&mut self, from: PortRef, to: PortRef) -> Result<ConnectionId, GraphError> {
        if from.is_input() {
            return Err(GraphError::UnknownPort(from));
        }
        if !to.is_input() {
            return Err(GraphError::UnknownPort(to));
        }

        let out_format = self.port(from)?.format();
        let in_port = self.port(to)?;
        if !self
            .toolbox
            .formats()
            .is_valid_input_to(out_format, in_port.format())
        {
            return Err(GraphError::IncompatibleFormat {
                from: out_format.to_string(),
                to: in_port.format().to_string(),
            });
        }
        if in_port.is_connected() {
            return Err(GraphError::PortOccupied { port: to });
        }

        let id = self.ids.next_connection();
        self.port_mut(from)?.connections.push(id);
        self.port_mut(to)?.connections.push(id);
        self.connections.insert(id, Connection { id, from, to });
        self.dirty = true;
        debug!(connection = %id, %from, %to, "Connected");
        Ok(id)
    }

    /// Remove a connection from the graph and from both of its ports
    ///
    /// # Errors
    ///
    /// Returns error if the connection does not exist
    pub fn disconnect(&mut self, id: ConnectionId) -> Result<Connection, GraphError> {
        let connection = self
            .connections
            .shift_remove(&id)
            .ok_or(GraphError::UnknownConnection(id))?;
        for end in [connection.from, connection.to] {
            if let Ok(port) = self.port_mut(end) {
                port.connections.retain(|c| *c != id);
            }
        }
        self.dirty = true;
        debug!(connection = %id, "Disconnected");
        Ok(connection)
    }

    /// Delete a block together with every connection touching its ports
    ///
    /// # Errors
    ///
    /// Returns error if the block does not exist
    pub fn delete_block(&mut self, id: BlockId) -> Result<Block, GraphError> {
        let block = self.blocks.get(&id).ok_or(GraphError::UnknownBlock(id))?;
        // a self-loop lists the same connection on both of its ports
        let touching: IndexSet<ConnectionId> = block
            .inputs()
            .iter()
            .chain(block.outputs())
            .flat_map(|p| p.connections.iter().copied())
            .collect();

        for connection in touching {
            self.disconnect(connection)?;
        }
        let block = self
            .blocks
            .shift_remove(&id)
            .ok_or(GraphError::UnknownBlock(id))?;
        self.dirty = true;
        debug!(block = %id, "Deleted block");
        Ok(block)
    }

    /// Look up a port
    ///
    /// # Errors
    ///
    /// Returns error if the block or port does not exist
    pub fn port(&self, port: PortRef) -> Result<&Port, GraphError> {
        self.blocks
            .get(&port.block)
            .ok_or(GraphError::UnknownBlock(port.block))?
            .port(port.direction, port.index)
            .ok_or(GraphError::UnknownPort(port))
    }

    fn port_mut(&mut self, port: PortRef) -> Result<&mut Port, GraphError> {
        self.blocks
            .get_mut(&port.block)
            .ok_or(GraphError::UnknownBlock(port.block))?
            .ports_mut(port.direction)
            .get_mut(port.index)
            .ok_or(GraphError::UnknownPort(port))
    }

    /// Look up a block
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    /// Move a block on the canvas
    ///
    /// # Errors
    ///
    /// Returns error if the block does not exist
    pub fn move_block(&mut self, id: BlockId, position: Position) -> Result<(), GraphError> {
        let block = self
            .blocks
            .get_mut(&id)
            .ok_or(GraphError::UnknownBlock(id))?;
        block.position = position;
        self.dirty = true;
        Ok(())
    }

    /// All blocks in insertion order
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Source blocks in insertion order
    pub fn sources(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values().filter(|b| b.is_source())
    }

    /// Module blocks in insertion order
    pub fn modules(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values().filter(|b| b.is_module())
    }

    /// Sink blocks in insertion order
    pub fn sinks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values().filter(|b| b.is_sink())
    }

    /// Look up a connection
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// All connections in creation order
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Number of blocks
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// The output port feeding `input`, if connected
    #[must_use]
    pub fn upstream(&self, input: PortRef) -> Option<PortRef> {
        let port = self.port(input).ok()?;
        let id = port.connections.first()?;
        self.connections.get(id).map(|c| c.from)
    }

    /// Input ports fed by any output of `block`, by output index then age
    #[must_use]
    pub fn downstream(&self, block: BlockId) -> Vec<PortRef> {
        let Some(block) = self.blocks.get(&block) else {
            return Vec::new();
        };
        block
            .outputs()
            .iter()
            .flat_map(|p| p.connections.iter())
            .filter_map(|c| self.connections.get(c))
            .map(|c| c.to)
            .collect()
    }

    /// Table columns bound by sources and sinks, in block order
    #[must_use]
    pub fn bound_columns(&self) -> IndexSet<&str> {
        self.blocks.values().filter_map(Block::column).collect()
    }

    /// Check for edits since the last save or load
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the unsaved-changes flag
    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, linear};

    #[test]
    fn test_add_blocks_unique_ids() {
        let mut p = Pipeline::new("p", testing::toolbox());
        let a = p
            .add_source("infile", Parameter::required("in", "text"), Position::default())
            .unwrap();
        let b = p.add_module("convert", Position::default()).unwrap();
        let c = p
            .add_sink("outfile", Parameter::required("out", "csv"), Position::default())
            .unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
        assert_eq!(p.block_count(), 3);
        assert!(p.is_dirty());
    }

    #[test]
    fn test_add_module_unknown() {
        let mut p = Pipeline::new("p", testing::toolbox());
        let err = p.add_module("nope", Position::default()).unwrap_err();
        assert!(matches!(err, GraphError::Toolbox(ToolboxError::UnknownModule(_))));
        assert_eq!(p.block_count(), 0);
    }

    #[test]
    fn test_add_source_unknown_format() {
        let mut p = Pipeline::new("p", testing::toolbox());
        let err = p
            .add_source("x", Parameter::required("x", "video"), Position::default())
            .unwrap_err();
        assert_eq!(err, GraphError::UnknownFormat("video".to_string()));
    }

    #[test]
    fn test_connect_subtype_accepted() {
        let mut p = Pipeline::new("p", testing::toolbox());
        let src = p
            .add_source("f", Parameter::required("f", "csv"), Position::default())
            .unwrap();
        let m = p.add_module("convert", Position::default()).unwrap();
        // convert.in expects text; csv extends text
        let c = p
            .connect(PortRef::output(src, 0), PortRef::input(m, 0))
            .unwrap();
        assert_eq!(p.connection_count(), 1);
        assert_eq!(p.port(PortRef::output(src, 0)).unwrap().connections(), &[c]);
        assert_eq!(p.port(PortRef::input(m, 0)).unwrap().connections(), &[c]);
        assert_eq!(p.upstream(PortRef::input(m, 0)), Some(PortRef::output(src, 0)));
    }

    #[test]
    fn test_connect_incompatible_format() {
        let mut p = Pipeline::new("p", testing::toolbox());
        let src = p
            .add_source("f", Parameter::required("f", "image"), Position::default())
            .unwrap();
        let m = p.add_module("convert", Position::default()).unwrap();
        p.mark_saved();
        let err = p
            .connect(PortRef::output(src, 0), PortRef::input(m, 0))
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::IncompatibleFormat {
                from: "image".to_string(),
                to: "text".to_string()
            }
        );
        assert_eq!(p.connection_count(), 0);
        assert!(!p.port(PortRef::output(src, 0)).unwrap().is_connected());
        assert!(!p.is_dirty());
    }

    #[test]
    fn test_connect_supertype_rejected() {
        let mut p = Pipeline::new("p", testing::toolbox());
        let src = p
            .add_source("f", Parameter::required("f", "text"), Position::default())
            .unwrap();
        let sink = p
            .add_sink("o", Parameter::required("o", "csv"), Position::default())
            .unwrap();
        assert!(matches!(
            p.connect(PortRef::output(src, 0), PortRef::input(sink, 0)),
            Err(GraphError::IncompatibleFormat { .. })
        ));
    }

    #[test]
    fn test_connect_port_occupied() {
        let (mut p, src, m, _) = linear();
        let other = p
            .add_source("other", Parameter::required("o", "text"), Position::default())
            .unwrap();
        let before = p.connection_count();
        let err = p
            .connect(PortRef::output(other, 0), PortRef::input(m, 0))
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::PortOccupied {
                port: PortRef::input(m, 0)
            }
        );
        assert_eq!(p.connection_count(), before);
        assert!(!p.port(PortRef::output(other, 0)).unwrap().is_connected());
        assert_eq!(p.upstream(PortRef::input(m, 0)), Some(PortRef::output(src, 0)));
    }

    #[test]
    fn test_connect_fan_out() {
        let (mut p, src, _, _) = linear();
        let m2 = p.add_module("convert", Position::default()).unwrap();
        p.connect(PortRef::output(src, 0), PortRef::input(m2, 0))
            .unwrap();
        assert_eq!(
            p.port(PortRef::output(src, 0)).unwrap().connections().len(),
            2
        );
        assert_eq!(p.downstream(src).len(), 2);
    }

    #[test]
    fn test_connect_direction_checked() {
        let (mut p, src, m, _) = linear();
        assert_eq!(
            p.connect(PortRef::input(m, 0), PortRef::output(src, 0)),
            Err(GraphError::UnknownPort(PortRef::input(m, 0)))
        );
        assert!(matches!(
            p.connect(PortRef::output(src, 0), PortRef::input(m, 5)),
            Err(GraphError::UnknownPort(_))
        ));
    }

    #[test]
    fn test_disconnect() {
        let (mut p, src, m, _) = linear();
        let id = p.port(PortRef::input(m, 0)).unwrap().connections()[0];
        let removed = p.disconnect(id).unwrap();
        assert_eq!(removed.from, PortRef::output(src, 0));
        assert!(!p.port(PortRef::input(m, 0)).unwrap().is_connected());
        assert!(!p.port(PortRef::output(src, 0)).unwrap().is_connected());
        assert_eq!(p.disconnect(id), Err(GraphError::UnknownConnection(id)));
    }

    #[test]
    fn test_delete_module_cascades() {
        let mut p = Pipeline::new("p", testing::toolbox());
        let a = p
            .add_source("a", Parameter::required("a", "text"), Position::default())
            .unwrap();
        let b = p
            .add_source("b", Parameter::required("b", "text"), Position::default())
            .unwrap();
        let m = p.add_module("merge", Position::default()).unwrap();
        let out = p
            .add_sink("out", Parameter::required("out", "csv"), Position::default())
            .unwrap();
        p.connect(PortRef::output(a, 0), PortRef::input(m, 0)).unwrap();
        p.connect(PortRef::output(b, 0), PortRef::input(m, 1)).unwrap();
        p.connect(PortRef::output(m, 0), PortRef::input(out, 0))
            .unwrap();
        assert_eq!(p.connection_count(), 3);

        let removed = p.delete_block(m).unwrap();
        assert!(removed.is_module());
        assert_eq!(p.connection_count(), 0);
        assert!(p.block(m).is_none());
        assert!(p.connections().all(|c| c.from.block != m && c.to.block != m));
        for id in [a, b, out] {
            let block = p.block(id).unwrap();
            assert!(block.inputs().iter().chain(block.outputs()).all(|port| !port.is_connected()));
        }
    }

    #[test]
    fn test_delete_self_looped_module() {
        let (mut p, _, m, _) = linear();
        let other = p.add_module("convert", Position::default()).unwrap();
        p.connect(PortRef::output(other, 0), PortRef::input(other, 0))
            .unwrap();
        assert_eq!(p.connection_count(), 3);

        p.delete_block(other).unwrap();
        assert!(p.block(other).is_none());
        assert_eq!(p.connection_count(), 2);
        assert!(p.block(m).is_some());
    }

    #[test]
    fn test_delete_unknown_block() {
        let mut p = Pipeline::new("p", testing::toolbox());
        let id = BlockId::from_raw(9);
        assert_eq!(p.delete_block(id), Err(GraphError::UnknownBlock(id)));
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let (mut p, _, _, sink) = linear();
        p.delete_block(sink).unwrap();
        let new = p
            .add_sink("outfile", Parameter::required("out", "csv"), Position::default())
            .unwrap();
        assert!(new > sink);
    }

    #[test]
    fn test_restore_duplicate_id() {
        let (mut p, src, _, _) = linear();
        let block = Pipeline::source_block(
            src,
            "again".to_string(),
            Parameter::required("x", "text"),
            Position::default(),
        );
        assert_eq!(p.restore(block), Err(GraphError::DuplicateBlockId(src)));
    }

    #[test]
    fn test_bound_columns_and_labels() {
        let (p, src, m, sink) = linear();
        let cols: Vec<&str> = p.bound_columns().into_iter().collect();
        assert_eq!(cols, vec!["infile", "outfile"]);
        assert_eq!(p.block(m).unwrap().label(), "convert");
        assert_eq!(p.block(src).unwrap().column(), Some("infile"));
        assert!(p.block(sink).unwrap().module().is_none());
    }

    #[test]
    fn test_move_block_sets_dirty() {
        let (mut p, src, _, _) = linear();
        p.mark_saved();
        p.move_block(src, Position::new(3.0, 4.0)).unwrap();
        assert!(p.is_dirty());
        assert_eq!(p.block(src).unwrap().position, Position::new(3.0, 4.0));
    }

    proptest::proptest! {
        #[test]
        fn prop_delete_leaves_no_dangling_edges(order in proptest::collection::vec(0usize..5, 1..5)) {
            let (mut p, src, m, sink) = linear();
            let m2 = p.add_module("convert", Position::default()).unwrap();
            p.connect(PortRef::output(src, 0), PortRef::input(m2, 0)).unwrap();
            let looped = p.add_module("convert", Position::default()).unwrap();
            p.connect(PortRef::output(looped, 0), PortRef::input(looped, 0)).unwrap();
            let ids = [src, m, sink, m2, looped];
            for i in order {
                proptest::prop_assert!(p.delete_block(ids[i]).is_ok() || p.block(ids[i]).is_none());
                for c in p.connections() {
                    proptest::prop_assert!(p.block(c.from.block).is_some());
                    proptest::prop_assert!(p.block(c.to.block).is_some());
                }
            }
        }
    }
}
