//! Failure reports.
//!
//! A failed recipe leaves an `errors/<row>/<moduleId>` marker directory.
//! The report walks the pipeline downstream from each failed module and
//! lists every module and sink output put at risk by the failure.

use crate::driver::DriverError;
use pipeforge_core::BlockId;
use pipeforge_plan::{BlockKind, Pipeline, Table, ERRORS_DIR};
use std::fmt;
use std::path::Path;
use tracing::warn;

/// One marker directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FailureMarker {
    /// Row id
    pub row: String,
    /// Failed module block
    pub block: BlockId,
}

/// A node of a failure tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    /// A module whose outputs are missing
    Module {
        /// Module name
        name: String,
    },
    /// A sink whose file will not be produced
    Sink {
        /// Bound table column
        column: String,
        /// Resolved output file name
        filename: String,
    },
}

/// One line of a failure tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeLine {
    /// Distance from the failed module
    pub depth: usize,
    /// The node on this line
    pub node: TreeNode,
}

impl fmt::Display for TreeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = "    ".repeat(self.depth);
        match &self.node {
            TreeNode::Module { name } => write!(f, "{indent}+ {name}"),
            TreeNode::Sink { column, filename } => write!(f, "{indent}- {column}: {filename}"),
        }
    }
}

/// The tree for one marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    /// Row id
    pub row: String,
    /// Failed module block
    pub block: BlockId,
    /// Failed module name
    pub module: String,
    /// Pre-order tree, rooted at the failed module
    pub lines: Vec<TreeLine>,
}

impl fmt::Display for FailureEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "id {} at module {}", self.row, self.module)?;
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Failure trees for every marker of an analysis
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureReport {
    entries: Vec<FailureEntry>,
}

impl FailureReport {
    /// List the markers under `<output_root>/errors`, sorted by row then block
    ///
    /// A missing errors directory yields no markers. Entries whose name is
    /// not a block id are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns error if an existing directory cannot be read
    pub fn scan(output_root: &Path) -> Result<Vec<FailureMarker>, DriverError> {
        let errors = output_root.join(ERRORS_DIR);
        if !errors.is_dir() {
            return Ok(Vec::new());
        }

        let mut markers = Vec::new();
        for row_dir in read_dir(&errors)? {
            if !row_dir.is_dir() {
                continue;
            }
            let Some(row) = file_name(&row_dir) else {
                continue;
            };
            for marker in read_dir(&row_dir)? {
                let Some(name) = file_name(&marker) else {
                    continue;
                };
                match name.parse::<BlockId>() {
                    Ok(block) => markers.push(FailureMarker {
                        row: row.clone(),
                        block,
                    }),
                    Err(e) => {
                        warn!(path = %marker.display(), error = %e, "Ignoring unrecognised error marker");
                    }
                }
            }
        }
        markers.sort();
        Ok(markers)
    }

    /// Build the trees for `markers`
    ///
    /// Markers naming no module, or a row the table lacks, are skipped with
    /// a warning.
    #[must_use]
    pub fn build(pipeline: &Pipeline, table: &Table, markers: &[FailureMarker]) -> Self {
        let mut entries = Vec::new();
        for marker in markers {
            let Some(module) = pipeline
                .block(marker.block)
                .and_then(|b| b.module())
                .map(|def| def.name.clone())
            else {
                warn!(row = %marker.row, block = %marker.block, "Error marker names no module");
                continue;
            };
            let Some(row) = table.row(&marker.row) else {
                warn!(row = %marker.row, "Error marker names an unknown row");
                continue;
            };

            let mut walk = Walk {
                pipeline,
                row,
                path: Vec::new(),
                lines: Vec::new(),
            };
            walk.visit(marker.block, 0);
            entries.push(FailureEntry {
                row: marker.row.clone(),
                block: marker.block,
                module,
                lines: walk.lines,
            });
        }
        Self { entries }
    }

    /// Scan `output_root` and build the report
    ///
    /// # Errors
    ///
    /// Returns error if the errors directory cannot be read
    pub fn from_output_root(
        pipeline: &Pipeline,
        table: &Table,
        output_root: &Path,
    ) -> Result<Self, DriverError> {
        let markers = Self::scan(output_root)?;
        Ok(Self::build(pipeline, table, &markers))
    }

    /// Per-marker trees in marker order
    #[must_use]
    pub fn entries(&self) -> &[FailureEntry] {
        &self.entries
    }

    /// No failures recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of failed (row, module) pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            entry.fmt(f)?;
        }
        Ok(())
    }
}

struct Walk<'a> {
    pipeline: &'a Pipeline,
    row: &'a pipeforge_plan::Row,
    path: Vec<BlockId>,
    lines: Vec<TreeLine>,
}

impl Walk<'_> {
    fn visit(&mut self, id: BlockId, depth: usize) {
        if self.path.contains(&id) {
            return;
        }
        let Some(block) = self.pipeline.block(id) else {
            return;
        };
        let node = match &block.kind {
            BlockKind::Module { def, .. } => TreeNode::Module {
                name: def.name.clone(),
            },
            BlockKind::Sink { column, .. } => TreeNode::Sink {
                column: column.clone(),
                filename: self
                    .row
                    .resolved(column)
                    .unwrap_or_else(|| "<missing>".to_string()),
            },
            BlockKind::Source { .. } => return,
        };
        self.lines.push(TreeLine { depth, node });

        self.path.push(id);
        for input in self.pipeline.downstream(id) {
            self.visit(input.block, depth + 1);
        }
        self.path.pop();
    }
}

fn read_dir(dir: &Path) -> Result<Vec<std::path::PathBuf>, DriverError> {
    let entries = std::fs::read_dir(dir).map_err(|e| DriverError::io(dir, &e))?;
    let mut paths = Vec::new();
    for entry in entries {
        paths.push(entry.map_err(|e| DriverError::io(dir, &e))?.path());
    }
    Ok(paths)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeforge_core::PortRef;
    use pipeforge_plan::Position;
    use pipeforge_toolbox::{Format, FormatRegistry, ModuleDef, Parameter, Toolbox};
    use std::sync::Arc;

    fn toolbox() -> Arc<Toolbox> {
        let formats = FormatRegistry::load([Format::new("text", "txt")]).unwrap();
        let mut toolbox = Toolbox::new("test", formats);
        toolbox
            .register_module(
                ModuleDef::new(
                    "step",
                    vec![Parameter::required("in", "text")],
                    vec![Parameter::required("out", "text")],
                    "step {in} {out}",
                )
                .unwrap(),
            )
            .unwrap();
        Arc::new(toolbox)
    }

    /// `in`(0) -> step(1) -> step(2) -> `x`(3), with step(1) also feeding `y`(4)
    fn fan_out() -> Pipeline {
        let mut p = Pipeline::new("fan", toolbox());
        let at = Position::default();
        let src = p.add_source("in", Parameter::required("in", "text"), at).unwrap();
        let a = p.add_module("step", at).unwrap();
        let b = p.add_module("step", at).unwrap();
        let x = p.add_sink("x", Parameter::required("x", "text"), at).unwrap();
        let y = p.add_sink("y", Parameter::required("y", "text"), at).unwrap();
        p.connect(PortRef::output(src, 0), PortRef::input(a, 0)).unwrap();
        p.connect(PortRef::output(a, 0), PortRef::input(b, 0)).unwrap();
        p.connect(PortRef::output(b, 0), PortRef::input(x, 0)).unwrap();
        p.connect(PortRef::output(a, 0), PortRef::input(y, 0)).unwrap();
        p
    }

    fn table() -> Table {
        Table::parse(
            "id|in|x|y|$(dir)\nr1|a.txt|$(dir)/x.txt|y.txt|out\nr2|b.txt|x2.txt|y2.txt|o\n",
        )
        .unwrap()
    }

    fn marker(root: &Path, row: &str, name: &str) {
        std::fs::create_dir_all(root.join(ERRORS_DIR).join(row).join(name)).unwrap();
    }

    #[test]
    fn test_tree_from_failed_module() {
        let report = FailureReport::build(
            &fan_out(),
            &table(),
            &[FailureMarker {
                row: "r1".to_string(),
                block: BlockId::from_raw(1),
            }],
        );
        assert_eq!(report.len(), 1);
        assert_eq!(
            report.to_string(),
            "id r1 at module step\n+ step\n    + step\n        - x: out/x.txt\n    - y: y.txt\n"
        );
    }

    #[test]
    fn test_fan_in_visits_each_path() {
        let formats = FormatRegistry::load([Format::new("text", "txt")]).unwrap();
        let mut tb = Toolbox::new("test", formats);
        for def in [
            ModuleDef::new(
                "step",
                vec![Parameter::required("in", "text")],
                vec![Parameter::required("out", "text")],
                "step {in} {out}",
            ),
            ModuleDef::new(
                "merge",
                vec![
                    Parameter::required("a", "text"),
                    Parameter::required("b", "text"),
                ],
                vec![Parameter::required("out", "text")],
                "merge {a} {b} > {out}",
            ),
        ] {
            tb.register_module(def.unwrap()).unwrap();
        }

        // a -> b -> merge.a, a -> c -> merge.b, merge -> x
        let mut p = Pipeline::new("diamond", Arc::new(tb));
        let at = Position::default();
        let src = p.add_source("in", Parameter::required("in", "text"), at).unwrap();
        let a = p.add_module("step", at).unwrap();
        let b = p.add_module("step", at).unwrap();
        let c = p.add_module("step", at).unwrap();
        let merge = p.add_module("merge", at).unwrap();
        let out = p.add_sink("x", Parameter::required("x", "text"), at).unwrap();
        p.connect(PortRef::output(src, 0), PortRef::input(a, 0)).unwrap();
        p.connect(PortRef::output(a, 0), PortRef::input(b, 0)).unwrap();
        p.connect(PortRef::output(a, 0), PortRef::input(c, 0)).unwrap();
        p.connect(PortRef::output(b, 0), PortRef::input(merge, 0)).unwrap();
        p.connect(PortRef::output(c, 0), PortRef::input(merge, 1)).unwrap();
        p.connect(PortRef::output(merge, 0), PortRef::input(out, 0)).unwrap();

        let report = FailureReport::build(
            &p,
            &table(),
            &[FailureMarker {
                row: "r2".to_string(),
                block: a,
            }],
        );
        assert_eq!(
            report.to_string(),
            "id r2 at module step\n\
             + step\n\
             \x20   + step\n\
             \x20       + merge\n\
             \x20           - x: x2.txt\n\
             \x20   + step\n\
             \x20       + merge\n\
             \x20           - x: x2.txt\n"
        );
        let depths: Vec<usize> = report.entries()[0].lines.iter().map(|l| l.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_unknown_markers_skipped() {
        let markers = [
            FailureMarker {
                row: "r1".to_string(),
                block: BlockId::from_raw(3),
            },
            FailureMarker {
                row: "r1".to_string(),
                block: BlockId::from_raw(99),
            },
            FailureMarker {
                row: "nope".to_string(),
                block: BlockId::from_raw(1),
            },
        ];
        assert!(FailureReport::build(&fan_out(), &table(), &markers).is_empty());
    }

    #[test]
    fn test_scan_sorts_and_skips_bad_names() {
        let tmp = tempfile::tempdir().unwrap();
        marker(tmp.path(), "r2", "1");
        marker(tmp.path(), "r1", "2");
        marker(tmp.path(), "r1", "1");
        marker(tmp.path(), "r1", "notes");
        std::fs::create_dir_all(tmp.path().join(ERRORS_DIR).join("r3")).unwrap();

        let markers = FailureReport::scan(tmp.path()).unwrap();
        let found: Vec<(String, u64)> = markers
            .iter()
            .map(|m| (m.row.clone(), m.block.as_u64()))
            .collect();
        assert_eq!(
            found,
            vec![("r1".into(), 1), ("r1".into(), 2), ("r2".into(), 1)]
        );
    }

    #[test]
    fn test_no_errors_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let report = FailureReport::from_output_root(&fan_out(), &table(), tmp.path()).unwrap();
        assert!(report.is_empty());
        assert_eq!(report.to_string(), "");
    }

    #[test]
    fn test_report_from_output_root() {
        let tmp = tempfile::tempdir().unwrap();
        marker(tmp.path(), "r2", "2");
        marker(tmp.path(), "r1", "1");
        let report = FailureReport::from_output_root(&fan_out(), &table(), tmp.path()).unwrap();
        let headers: Vec<String> = report
            .to_string()
            .lines()
            .filter(|l| l.starts_with("id "))
            .map(str::to_string)
            .collect();
        assert_eq!(headers, vec!["id r1 at module step", "id r2 at module step"]);
        assert_eq!(report.entries()[1].lines[1].to_string(), "    - x: x2.txt");
    }
}
