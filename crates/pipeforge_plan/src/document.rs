//! JSON pipeline documents.
//!
//! ```json
//! {
//!   "workflowName": "convert",
//!   "sources": [{"dataTableField": "infile", "id": 0, "position": {"X": 0.0, "Y": 0.0},
//!                "output": {"name": "in", "format": "text", "required": true}}],
//!   "sinks": [{"dataTableField": "outfile", "id": 2, "position": {"X": 0.0, "Y": 0.0},
//!              "input": {"name": "out", "format": "csv", "required": true}}],
//!   "modules": [{"moduleName": "convert", "id": 1, "position": {"X": 0.0, "Y": 0.0}}],
//!   "connections": [{"start": "sources[0]", "stop": "modules[1].in"},
//!                   {"start": "modules[1].out", "stop": "sinks[2]"}]
//! }
//! ```
//!
//! Loading replays every connection through [`Pipeline::connect`], so the
//! format and occupancy rules hold for loaded graphs as well.

use crate::graph::{Block, BlockKind, GraphError, Pipeline, Position};
use once_cell::sync::Lazy;
use pipeforge_core::{BlockId, PortDirection, PortRef};
use pipeforge_toolbox::{Parameter, Toolbox};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

static ENDPOINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(sources|sinks|modules)\[(\d+)\](?:\.(.+))?$").expect("endpoint pattern is valid")
});

/// Error from loading or saving a pipeline document
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    /// The text is not a pipeline document
    #[error("Malformed pipeline document: {0}")]
    Malformed(String),

    /// A connection endpoint does not name a port of the right kind
    #[error("Invalid connection endpoint {endpoint:?}: {reason}")]
    BadEndpoint {
        /// The endpoint text
        endpoint: String,
        /// What is wrong with it
        reason: String,
    },

    /// Rebuilding the graph failed
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The file could not be read or written
    #[error("I/O error on {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// Underlying error message
        message: String,
    },
}

/// Persisted source block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Bound table column
    #[serde(rename = "dataTableField")]
    pub data_table_field: String,
    /// Block id
    pub id: BlockId,
    /// Canvas position
    pub position: Position,
    /// Output parameter
    pub output: Parameter,
}

/// Persisted sink block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkEntry {
    /// Bound table column
    #[serde(rename = "dataTableField")]
    pub data_table_field: String,
    /// Block id
    pub id: BlockId,
    /// Canvas position
    pub position: Position,
    /// Input parameter
    pub input: Parameter,
}

/// Persisted module block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    /// Toolbox module name
    #[serde(rename = "moduleName")]
    pub module_name: String,
    /// Block id
    pub id: BlockId,
    /// Canvas position
    pub position: Position,
}

/// Persisted connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    /// `sources[<id>]` or `modules[<id>].<output>`
    pub start: String,
    /// `sinks[<id>]` or `modules[<id>].<input>`
    pub stop: String,
}

/// On-disk form of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDocument {
    /// Pipeline name
    #[serde(rename = "workflowName")]
    pub workflow_name: String,
    /// Sources in id order
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    /// Sinks in id order
    #[serde(default)]
    pub sinks: Vec<SinkEntry>,
    /// Modules in id order
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
    /// Connections in creation order
    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,
}

impl PipelineDocument {
    /// Snapshot a pipeline
    #[must_use]
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        let mut blocks: Vec<&Block> = pipeline.blocks().collect();
        blocks.sort_by_key(|b| b.id);

        let mut sources = Vec::new();
        let mut sinks = Vec::new();
        let mut modules = Vec::new();
        for block in blocks {
            match &block.kind {
                BlockKind::Source { column, output } => sources.push(SourceEntry {
                    data_table_field: column.clone(),
                    id: block.id,
                    position: block.position,
                    output: output.parameter.clone(),
                }),
                BlockKind::Sink { column, input } => sinks.push(SinkEntry {
                    data_table_field: column.clone(),
                    id: block.id,
                    position: block.position,
                    input: input.parameter.clone(),
                }),
                BlockKind::Module { def, .. } => modules.push(ModuleEntry {
                    module_name: def.name.clone(),
                    id: block.id,
                    position: block.position,
                }),
            }
        }

        let connections = pipeline
            .connections()
            .filter_map(|c| {
                Some(ConnectionEntry {
                    start: endpoint(pipeline, c.from)?,
                    stop: endpoint(pipeline, c.to)?,
                })
            })
            .collect();

        Self {
            workflow_name: pipeline.name().to_string(),
            sources,
            sinks,
            modules,
            connections,
        }
    }

    /// Rebuild the pipeline against `toolbox`
    ///
    /// # Errors
    ///
    /// Returns error on unknown modules or formats, duplicate ids, dangling
    /// or malformed endpoints, and connections `connect` rejects
    pub fn into_pipeline(self, toolbox: Arc<Toolbox>) -> Result<Pipeline, DocumentError> {
        let mut pipeline = Pipeline::new(self.workflow_name, toolbox);

        for s in self.sources {
            pipeline.restore(Pipeline::source_block(
                s.id,
                s.data_table_field,
                s.output,
                s.position,
            ))?;
        }
        for s in self.sinks {
            pipeline.restore(Pipeline::sink_block(
                s.id,
                s.data_table_field,
                s.input,
                s.position,
            ))?;
        }
        for m in self.modules {
            let def = pipeline
                .toolbox()
                .module(&m.module_name)
                .map_err(GraphError::from)?;
            pipeline.restore(Pipeline::module_block(m.id, def, m.position))?;
        }
        for c in &self.connections {
            let from = resolve(&pipeline, &c.start, PortDirection::Output)?;
            let to = resolve(&pipeline, &c.stop, PortDirection::Input)?;
            pipeline.connect(from, to)?;
        }

        pipeline.mark_saved();
        Ok(pipeline)
    }

    /// Parse a document
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not have the document shape
    pub fn from_json(text: &str) -> Result<Self, DocumentError> {
        serde_json::from_str(text).map_err(|e| DocumentError::Malformed(e.to_string()))
    }

    /// Pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, DocumentError> {
        serde_json::to_string_pretty(self).map_err(|e| DocumentError::Malformed(e.to_string()))
    }
}

fn endpoint(pipeline: &Pipeline, port: PortRef) -> Option<String> {
    let block = pipeline.block(port.block)?;
    let text = match &block.kind {
        BlockKind::Source { .. } => format!("sources[{}]", block.id),
        BlockKind::Sink { .. } => format!("sinks[{}]", block.id),
        BlockKind::Module { .. } => {
            let p = block.port(port.direction, port.index)?;
            format!("modules[{}].{}", block.id, p.parameter.name)
        }
    };
    Some(text)
}

fn resolve(
    pipeline: &Pipeline,
    text: &str,
    direction: PortDirection,
) -> Result<PortRef, DocumentError> {
    let bad = |reason: &str| DocumentError::BadEndpoint {
        endpoint: text.to_string(),
        reason: reason.to_string(),
    };
    let caps = ENDPOINT
        .captures(text)
        .ok_or_else(|| bad("expected sources[id], sinks[id] or modules[id].port"))?;
    let id: BlockId = caps[2]
        .parse()
        .map_err(|e: pipeforge_core::CoreError| bad(&e.to_string()))?;
    let block = pipeline
        .block(id)
        .ok_or(DocumentError::Graph(GraphError::UnknownBlock(id)))?;
    let port_name = caps.get(3).map(|m| m.as_str());

    match (&caps[1], direction, port_name) {
        ("sources", PortDirection::Output, None) if block.is_source() => {
            Ok(PortRef::output(id, 0))
        }
        ("sinks", PortDirection::Input, None) if block.is_sink() => Ok(PortRef::input(id, 0)),
        ("modules", _, Some(name)) if block.is_module() => {
            let ports = match direction {
                PortDirection::Input => block.inputs(),
                PortDirection::Output => block.outputs(),
            };
            ports
                .iter()
                .position(|p| p.parameter.name == name)
                .map(|index| PortRef {
                    block: id,
                    direction,
                    index,
                })
                .ok_or_else(|| bad("module has no such port"))
        }
        _ => Err(bad("endpoint does not match the block kind or direction")),
    }
}

impl Pipeline {
    /// Serialize to the pretty-printed document form
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, DocumentError> {
        PipelineDocument::from_pipeline(self).to_json()
    }

    /// Parse and rebuild a pipeline
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or does not rebuild
    pub fn from_json(text: &str, toolbox: Arc<Toolbox>) -> Result<Self, DocumentError> {
        PipelineDocument::from_json(text)?.into_pipeline(toolbox)
    }

    /// Write the document to `path` and clear the unsaved-changes flag
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), DocumentError> {
        let path = path.as_ref();
        let text = self.to_json()?;
        std::fs::write(path, text).map_err(|e| DocumentError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.mark_saved();
        info!(pipeline = %self.name(), path = %path.display(), "Saved pipeline");
        Ok(())
    }

    /// Read a pipeline document from `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or does not rebuild
    pub fn load(path: impl AsRef<Path>, toolbox: Arc<Toolbox>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| DocumentError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&text, toolbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, linear};

    fn branching() -> Pipeline {
        let (mut p, src, _, _) = linear();
        let split_in = p
            .add_source("table", Parameter::required("t", "csv"), Position::new(5.5, -2.25))
            .unwrap();
        let split = p.add_module("split", Position::new(50.0, 60.0)).unwrap();
        let left = p
            .add_sink("left", Parameter::required("l", "csv"), Position::default())
            .unwrap();
        let label = p.add_module("label", Position::default()).unwrap();
        p.connect(PortRef::output(split_in, 0), PortRef::input(split, 0))
            .unwrap();
        p.connect(PortRef::output(split, 0), PortRef::input(left, 0))
            .unwrap();
        p.connect(PortRef::output(src, 0), PortRef::input(label, 0))
            .unwrap();
        p
    }

    #[test]
    fn test_document_shape() {
        let (p, _, _, _) = linear();
        let json = p.to_json().unwrap();
        assert!(json.contains("\"workflowName\": \"linear\""));
        assert!(json.contains("\"dataTableField\": \"infile\""));
        assert!(json.contains("\"start\": \"sources[0]\""));
        assert!(json.contains("\"stop\": \"modules[1].in\""));
        assert!(json.contains("\"start\": \"modules[1].out\""));
        assert!(json.contains("\"stop\": \"sinks[2]\""));
        assert!(json.contains("\"X\": 10.0"));
    }

    #[test]
    fn test_round_trip_byte_identical() {
        for p in [linear().0, branching()] {
            let first = p.to_json().unwrap();
            let loaded = Pipeline::from_json(&first, testing::toolbox()).unwrap();
            assert!(!loaded.is_dirty());
            assert_eq!(loaded.block_count(), p.block_count());
            assert_eq!(loaded.connection_count(), p.connection_count());
            assert_eq!(loaded.to_json().unwrap(), first);
        }
    }

    #[test]
    fn test_round_trip_after_delete() {
        let mut p = branching();
        let doomed = p.modules().next().map(|b| b.id).unwrap();
        p.delete_block(doomed).unwrap();
        let first = p.to_json().unwrap();
        let loaded = Pipeline::from_json(&first, testing::toolbox()).unwrap();
        assert_eq!(loaded.to_json().unwrap(), first);
    }

    #[test]
    fn test_load_seeds_id_allocator() {
        let (p, _, _, sink) = linear();
        let mut loaded = Pipeline::from_json(&p.to_json().unwrap(), testing::toolbox()).unwrap();
        let new = loaded.add_module("convert", Position::default()).unwrap();
        assert!(new > sink);
    }

    #[test]
    fn test_load_rejects_incompatible_connection() {
        let text = r#"{
            "workflowName": "bad",
            "sources": [{"dataTableField": "f", "id": 0, "position": {"X": 0.0, "Y": 0.0},
                         "output": {"name": "f", "format": "image", "required": true}}],
            "modules": [{"moduleName": "convert", "id": 1, "position": {"X": 0.0, "Y": 0.0}}],
            "connections": [{"start": "sources[0]", "stop": "modules[1].in"}]
        }"#;
        let err = Pipeline::from_json(text, testing::toolbox()).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Graph(GraphError::IncompatibleFormat { .. })
        ));
    }

    #[test]
    fn test_load_rejects_occupied_input() {
        let text = r#"{
            "workflowName": "bad",
            "sources": [
                {"dataTableField": "a", "id": 0, "position": {"X": 0.0, "Y": 0.0},
                 "output": {"name": "a", "format": "text", "required": true}},
                {"dataTableField": "b", "id": 1, "position": {"X": 0.0, "Y": 0.0},
                 "output": {"name": "b", "format": "text", "required": true}}],
            "modules": [{"moduleName": "convert", "id": 2, "position": {"X": 0.0, "Y": 0.0}}],
            "connections": [
                {"start": "sources[0]", "stop": "modules[2].in"},
                {"start": "sources[1]", "stop": "modules[2].in"}]
        }"#;
        assert!(matches!(
            Pipeline::from_json(text, testing::toolbox()),
            Err(DocumentError::Graph(GraphError::PortOccupied { .. }))
        ));
    }

    #[test]
    fn test_load_rejects_duplicate_ids() {
        let text = r#"{
            "workflowName": "bad",
            "sources": [{"dataTableField": "a", "id": 4, "position": {"X": 0.0, "Y": 0.0},
                         "output": {"name": "a", "format": "text", "required": true}}],
            "modules": [{"moduleName": "convert", "id": 4, "position": {"X": 0.0, "Y": 0.0}}]
        }"#;
        assert_eq!(
            Pipeline::from_json(text, testing::toolbox()).unwrap_err(),
            DocumentError::Graph(GraphError::DuplicateBlockId(BlockId::from_raw(4)))
        );
    }

    #[test]
    fn test_load_rejects_unknown_module_and_format() {
        let module = r#"{"workflowName": "x",
            "modules": [{"moduleName": "nope", "id": 0, "position": {"X": 0.0, "Y": 0.0}}]}"#;
        assert!(matches!(
            Pipeline::from_json(module, testing::toolbox()),
            Err(DocumentError::Graph(GraphError::Toolbox(_)))
        ));
        let format = r#"{"workflowName": "x",
            "sinks": [{"dataTableField": "o", "id": 0, "position": {"X": 0.0, "Y": 0.0},
                       "input": {"name": "o", "format": "video", "required": true}}]}"#;
        assert!(matches!(
            Pipeline::from_json(format, testing::toolbox()),
            Err(DocumentError::Graph(GraphError::UnknownFormat(_)))
        ));
    }

    #[test]
    fn test_load_rejects_bad_endpoints() {
        let (p, _, _, _) = linear();
        let good = p.to_json().unwrap();
        for (from, to) in [
            ("\"sources[0]\"", "\"sources[0]x\""),
            ("\"modules[1].in\"", "\"modules[1].nope\""),
            ("\"sinks[2]\"", "\"sinks[9]\""),
            ("\"modules[1].out\"", "\"sinks[2]\""),
        ] {
            let broken = good.replacen(from, to, 1);
            assert!(
                Pipeline::from_json(&broken, testing::toolbox()).is_err(),
                "accepted {}",
                to
            );
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            PipelineDocument::from_json("{\"sources\": []}"),
            Err(DocumentError::Malformed(_))
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("linear.json");
        let (mut p, _, _, _) = linear();
        assert!(p.is_dirty());
        p.save(&path).unwrap();
        assert!(!p.is_dirty());
        let loaded = Pipeline::load(&path, testing::toolbox()).unwrap();
        assert_eq!(loaded.name(), "linear");
        assert_eq!(loaded.connection_count(), 2);
    }
}
