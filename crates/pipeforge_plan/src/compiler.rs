//! Build script compiler.
//!
//! Compiles a pipeline and a table into one GNU Makefile. For every row and
//! every sink the script holds a rule chain that rebuilds the sink's file
//! from the row's source data. Module outputs live under
//! `$(PROCESSING)<row>/`; a failed module recipe leaves the marker directory
//! `$(ERRORS)<row>/<block id>`.
//!
//! Fixed targets: `all`, `setupall`, `cleanall`, `target_ratio` and
//! `intermediate_ratio`. The two ratio targets print `"<existing> / <expected>"`.

use crate::graph::{BlockKind, Pipeline};
use crate::table::{Row, Table};
use indexmap::{IndexMap, IndexSet};
use pipeforge_core::{BlockId, PortRef};
use pipeforge_toolbox::TemplateError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the generated script inside the output root
pub const SCRIPT_FILE_NAME: &str = "Makefile";

/// Captured stdout of the main build, relative to the output root
pub const STDOUT_LOG: &str = "STDOUT.txt";

/// Captured stderr of the main build, relative to the output root
pub const STDERR_LOG: &str = "STDERR.txt";

/// Processing directory, relative to the output root
pub const PROCESSING_DIR: &str = "processing";

/// Error marker directory, relative to the output root
pub const ERRORS_DIR: &str = "errors";

/// Error from script generation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// A required input of a block reached from a sink is unconnected
    #[error("Required input '{port}' of {block} (block {id}) is not connected")]
    MissingRequiredInput {
        /// Module name or sink column
        block: String,
        /// Block id
        id: BlockId,
        /// Port name
        port: String,
    },

    /// A source or sink column is not in the table
    #[error("Table has no column '{column}'")]
    MissingColumn {
        /// Column name
        column: String,
    },

    /// A cell that must name a file is empty
    #[error("Row {row} has an empty '{column}' cell")]
    MissingCell {
        /// Row id
        row: String,
        /// Column name
        column: String,
    },

    /// A file cell holds characters make reads as syntax
    #[error("Row {row} '{column}' cell {value:?} contains whitespace or one of ':', '#', '%'")]
    UnsafeFileName {
        /// Row id
        row: String,
        /// Column name
        column: String,
        /// The resolved cell value
        value: String,
    },

    /// The graph loops back onto a block while compiling it
    #[error("Pipeline has a cycle through block {block}")]
    CyclicPipeline {
        /// A block on the cycle
        block: BlockId,
    },

    /// A connection points at a port that does not exist
    #[error("Port not found: {0}")]
    UnknownPort(PortRef),

    /// A command template could not be filled
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The script could not be written
    #[error("I/O error on {path}: {message}")]
    Io {
        /// Path involved
        path: String,
        /// Underlying error message
        message: String,
    },
}

impl CompileError {
    fn io(path: &Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Options controlling the generated script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptOptions {
    /// A failed recipe records its marker and lets the rule succeed
    pub keep_going: bool,
    /// Shell used for recipes
    pub shell: String,
}

impl ScriptOptions {
    /// Create default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set keep-going mode
    #[must_use]
    pub fn with_keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Set the recipe shell
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            keep_going: false,
            shell: "/bin/bash".to_string(),
        }
    }
}

/// A generated build script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildScript {
    output_root: PathBuf,
    text: String,
    targets: Vec<String>,
    intermediates: Vec<String>,
    args: Vec<String>,
}

impl BuildScript {
    /// Script text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Absolute output root the script writes under
    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Sink targets, as they appear in the script
    #[must_use]
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Module output files
    #[must_use]
    pub fn intermediates(&self) -> &[String] {
        &self.intermediates
    }

    /// Files `setupall` writes for `arg` sources
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Path the script is written to
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.output_root.join(SCRIPT_FILE_NAME)
    }

    /// Write the script into the output root, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be written
    pub fn write(&self) -> Result<PathBuf, CompileError> {
        std::fs::create_dir_all(&self.output_root)
            .map_err(|e| CompileError::io(&self.output_root, &e))?;
        let path = self.path();
        std::fs::write(&path, &self.text).map_err(|e| CompileError::io(&path, &e))?;
        info!(path = %path.display(), "Wrote build script");
        Ok(path)
    }
}

/// Compiler from pipeline and table to build script
#[derive(Debug, Clone, Default)]
pub struct ScriptCompiler {
    options: ScriptOptions,
}

impl ScriptCompiler {
    /// Create a compiler
    #[must_use]
    pub fn new(options: ScriptOptions) -> Self {
        Self { options }
    }

    /// The compiler's options
    #[must_use]
    pub fn options(&self) -> &ScriptOptions {
        &self.options
    }

    /// Compile `pipeline` over every row of `table`
    ///
    /// Sinks are compiled in id order for each row in table order. Each
    /// module rule is emitted once per row, before the rules it depends on.
    ///
    /// # Errors
    ///
    /// Returns error if a reachable required input is unconnected, a bound
    /// column or cell is missing, or the reachable graph has a cycle. No
    /// script is produced on error.
    pub fn compile(
        &self,
        pipeline: &Pipeline,
        table: &Table,
        output_root: &Path,
    ) -> Result<BuildScript, CompileError> {
        let output_root =
            std::path::absolute(output_root).map_err(|e| CompileError::io(output_root, &e))?;

        let mut sinks: Vec<BlockId> = pipeline.sinks().map(|b| b.id).collect();
        sinks.sort();

        let mut emitter = Emitter {
            pipeline,
            table,
            options: &self.options,
            rules: String::new(),
            targets: IndexSet::new(),
            intermediates: IndexSet::new(),
            args: IndexMap::new(),
            done: IndexSet::new(),
            on_path: IndexSet::new(),
        };

        for row in table.rows() {
            emitter.done.clear();
            let _ = writeln!(emitter.rules, "# row {}", row.id());
            let _ = writeln!(emitter.rules, "$(PROCESSING){}:\n\tmkdir -p $@\n", row.id());
            for sink in &sinks {
                emitter.emit_sink(*sink, row)?;
            }
        }

        let text = emitter.finish(pipeline.name(), &output_root);
        info!(
            pipeline = %pipeline.name(),
            rows = table.len(),
            targets = emitter.targets.len(),
            intermediates = emitter.intermediates.len(),
            "Compiled build script"
        );

        Ok(BuildScript {
            output_root,
            text,
            targets: emitter.targets.into_iter().collect(),
            intermediates: emitter.intermediates.into_iter().collect(),
            args: emitter.args.into_keys().collect(),
        })
    }
}

struct Emitter<'a> {
    pipeline: &'a Pipeline,
    table: &'a Table,
    options: &'a ScriptOptions,
    rules: String,
    targets: IndexSet<String>,
    intermediates: IndexSet<String>,
    // arg artifact path -> text written by setupall
    args: IndexMap<String, String>,
    // per-row memo
    done: IndexSet<BlockId>,
    on_path: IndexSet<BlockId>,
}

impl Emitter<'_> {
    fn emit_sink(&mut self, id: BlockId, row: &Row) -> Result<(), CompileError> {
        let pipeline = self.pipeline;
        let Some(block) = pipeline.block(id) else {
            return Ok(());
        };
        let BlockKind::Sink { column, input } = &block.kind else {
            return Ok(());
        };

        let upstream = pipeline
            .upstream(PortRef::input(id, 0))
            .ok_or_else(|| CompileError::MissingRequiredInput {
                block: column.clone(),
                id,
                port: input.parameter.name.clone(),
            })?;

        let value = self.file_cell(row, column)?;
        let target = if Path::new(&value).is_absolute() {
            value
        } else {
            format!("$(OUTPUT){}", value)
        };

        let dep = self.output_path(upstream, row)?;
        if !self.targets.insert(target.clone()) {
            warn!(target = %target, row = row.id(), "Duplicate sink target, keeping the first rule");
            return Ok(());
        }
        // a failed upstream recipe in keep-going mode leaves nothing to copy
        let copy = if self.options.keep_going {
            "test ! -e $< || cp $< $@"
        } else {
            "cp $< $@"
        };
        let _ = writeln!(
            self.rules,
            "{}: {}\n\tmkdir -p $(@D)\n\t{}\n",
            target, dep, copy
        );
        debug!(row = row.id(), sink = %id, target = %target, "Emitted sink rule");

        self.emit_module(upstream.block, row)
    }

    fn emit_module(&mut self, id: BlockId, row: &Row) -> Result<(), CompileError> {
        let pipeline = self.pipeline;
        let Some(block) = pipeline.block(id) else {
            return Ok(());
        };
        let BlockKind::Module {
            def,
            inputs,
            outputs,
        } = &block.kind
        else {
            return Ok(());
        };
        if self.on_path.contains(&id) {
            return Err(CompileError::CyclicPipeline { block: id });
        }
        if !self.done.insert(id) {
            return Ok(());
        }
        self.on_path.insert(id);

        let mut values = IndexMap::new();
        let mut deps = IndexSet::new();
        let mut upstream_blocks = Vec::new();
        for port in inputs {
            let name = port.parameter.name.clone();
            match pipeline.upstream(PortRef::input(id, port.index)) {
                Some(up) => {
                    let path = self.output_path(up, row)?;
                    let value = if port.parameter.is_arg() {
                        format!("`cat {}`", path)
                    } else {
                        path.clone()
                    };
                    values.insert(name, value);
                    deps.insert(path);
                    upstream_blocks.push(up.block);
                }
                None if port.parameter.required => {
                    return Err(CompileError::MissingRequiredInput {
                        block: def.name.clone(),
                        id,
                        port: name,
                    });
                }
                None => {
                    values.insert(name, String::new());
                }
            }
        }

        let mut produced = Vec::with_capacity(outputs.len());
        for port in outputs {
            let path = self.module_output(id, row, port.index, port.format());
            values.insert(port.parameter.name.clone(), path.clone());
            produced.push(path);
        }

        let command = def.template.fill(&values)?;
        let separator = if produced.len() > 1 { " &:" } else { ":" };
        let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
        let _ = writeln!(self.rules, "# {} (block {})", def.name, id);
        let _ = writeln!(
            self.rules,
            "{}{} {} | $(PROCESSING){}",
            produced.join(" "),
            separator,
            deps.join(" "),
            row.id()
        );
        let recipe = self.catch(&command, row, id);
        let _ = writeln!(self.rules, "\t{}\n", recipe);
        debug!(row = row.id(), module = %def.name, block = %id, "Emitted module rule");

        self.intermediates.extend(produced);
        for up in upstream_blocks {
            self.emit_module(up, row)?;
        }
        self.on_path.shift_remove(&id);
        Ok(())
    }

    fn catch(&self, command: &str, row: &Row, id: BlockId) -> String {
        let marker = format!("$(ERRORS){}/{}", row.id(), id);
        if self.options.keep_going {
            format!("({}) || mkdir -p {}", command, marker)
        } else {
            format!("({}) || {{ mkdir -p {}; exit 1; }}", command, marker)
        }
    }

    /// Script-level path of the file behind an output port for `row`
    fn output_path(&mut self, port: PortRef, row: &Row) -> Result<String, CompileError> {
        let pipeline = self.pipeline;
        let block = pipeline
            .block(port.block)
            .ok_or(CompileError::UnknownPort(port))?;
        match &block.kind {
            BlockKind::Source { column, output } => {
                if output.parameter.is_arg() {
                    let value = self.cell(row, column)?;
                    let path = format!(
                        "$(PROCESSING){}/{}_0{}",
                        row.id(),
                        block.id,
                        self.suffix(output.format())
                    );
                    self.args.entry(path.clone()).or_insert(value);
                    Ok(path)
                } else {
                    self.file_cell(row, column)
                }
            }
            BlockKind::Module { outputs, .. } => {
                let out = outputs
                    .get(port.index)
                    .ok_or(CompileError::UnknownPort(port))?;
                Ok(self.module_output(block.id, row, out.index, out.format()))
            }
            BlockKind::Sink { .. } => Err(CompileError::UnknownPort(port)),
        }
    }

    fn module_output(&self, id: BlockId, row: &Row, index: usize, format: &str) -> String {
        format!(
            "$(PROCESSING){}/{}_{}{}",
            row.id(),
            id,
            index,
            self.suffix(format)
        )
    }

    fn suffix(&self, format: &str) -> &str {
        self.pipeline.toolbox().formats().suffix(format)
    }

    fn cell(&self, row: &Row, column: &str) -> Result<String, CompileError> {
        if !self.table.has_column(column) {
            return Err(CompileError::MissingColumn {
                column: column.to_string(),
            });
        }
        Ok(row.resolved(column).unwrap_or_default())
    }

    /// A cell naming a file, which must be non-empty and a single make word
    fn file_cell(&self, row: &Row, column: &str) -> Result<String, CompileError> {
        let value = self.cell(row, column)?;
        if value.is_empty() {
            return Err(CompileError::MissingCell {
                row: row.id().to_string(),
                column: column.to_string(),
            });
        }
        if value.contains(|c: char| c.is_whitespace() || matches!(c, ':' | '#' | '%')) {
            return Err(CompileError::UnsafeFileName {
                row: row.id().to_string(),
                column: column.to_string(),
                value,
            });
        }
        Ok(value)
    }

    fn finish(&self, name: &str, output_root: &Path) -> String {
        let root = output_root.display().to_string();
        let rows: Vec<&str> = self.table.rows().iter().map(Row::id).collect();
        let mut out = String::new();

        let _ = writeln!(out, "# Build script for pipeline '{}', generated by pipeforge.", name);
        let _ = writeln!(out, "# Run `make setupall` before building `all`.\n");
        let _ = writeln!(out, "SHELL := {}", self.options.shell);
        let _ = writeln!(out, "OUTPUT := {}/", root.trim_end_matches('/'));
        let _ = writeln!(out, "PROCESSING := $(OUTPUT){}/", PROCESSING_DIR);
        let _ = writeln!(out, "ERRORS := $(OUTPUT){}/\n", ERRORS_DIR);
        out.push_str(&list_variable("TARGETS", self.targets.iter()));
        out.push_str(&list_variable("INTERMEDIATES", self.intermediates.iter()));
        out.push_str(&list_variable("ARGS", self.args.keys()));

        out.push_str("\n.PHONY: all setupall cleanall target_ratio intermediate_ratio\n");
        out.push_str(".DEFAULT_GOAL := all\n\n");
        out.push_str("all: $(TARGETS)\n\n");

        out.push_str("setupall:\n");
        if !rows.is_empty() {
            let processing: Vec<String> =
                rows.iter().map(|r| format!("$(PROCESSING){}", r)).collect();
            let _ = writeln!(out, "\tmkdir -p {}", processing.join(" "));
        }
        out.push_str("\trm -rf $(ERRORS)\n");
        if !rows.is_empty() {
            let errors: Vec<String> = rows.iter().map(|r| format!("$(ERRORS){}", r)).collect();
            let _ = writeln!(out, "\tmkdir -p {}", errors.join(" "));
        }
        for (path, text) in &self.args {
            let _ = writeln!(out, "\tprintf '%s' {} > {}", shell_quote(text), path);
        }
        let _ = writeln!(out, "\t: > $(OUTPUT){}", STDOUT_LOG);
        let _ = writeln!(out, "\t: > $(OUTPUT){}\n", STDERR_LOG);

        out.push_str("cleanall:\n");
        out.push_str("\trm -f $(TARGETS) $(INTERMEDIATES) $(ARGS)\n");
        out.push_str("\trm -rf $(ERRORS)\n\n");

        out.push_str("target_ratio:\n");
        out.push_str("\t@echo \"$(words $(wildcard $(TARGETS))) / $(words $(TARGETS))\"\n\n");
        out.push_str("intermediate_ratio:\n");
        out.push_str(
            "\t@echo \"$(words $(wildcard $(TARGETS) $(INTERMEDIATES))) / \
             $(words $(TARGETS) $(INTERMEDIATES))\"\n\n",
        );

        out.push_str(&self.rules);
        out
    }
}

fn list_variable<'a>(name: &str, items: impl Iterator<Item = &'a String>) -> String {
    let mut out = format!("{} :=", name);
    for item in items {
        let _ = write!(out, " \\\n\t{}", item);
    }
    out.push('\n');
    out
}

/// Single-quote `text` for the shell and escape `$` for make
fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''").replace('$', "$$"))
}
