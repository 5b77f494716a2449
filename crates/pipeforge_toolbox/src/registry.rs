//! Toolbox catalog: the formats and module definitions available to pipelines.
//!
//! A toolbox lives in a directory:
//!
//! ```text
//! <toolbox>/
//!   config/formats.json   format definitions
//!   config/ABOUT.txt      optional description
//!   modules/*.json        one module definition per file
//!   pipelines/            saved pipelines
//!   data/<analysis>/      default output root of an analysis
//! ```

use crate::format::{FormatError, FormatRegistry};
use crate::schema::{ModuleDef, ModuleFile, Parameter};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Error from toolbox operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolboxError {
    /// Format catalog could not be loaded
    #[error(transparent)]
    Format(#[from] FormatError),

    /// A parameter names a format the registry does not define
    #[error("Parameter '{parameter}' of module '{module}' uses unknown format '{format}'")]
    UnknownFormat {
        /// Module declaring the parameter
        module: String,
        /// Parameter name
        parameter: String,
        /// The undefined format
        format: String,
    },

    /// A port name is declared twice on one module
    #[error("Module '{module}' declares port '{port}' more than once")]
    DuplicatePort {
        /// Module name
        module: String,
        /// Repeated port name
        port: String,
    },

    /// A port name contains characters a `{name}` placeholder cannot hold
    #[error("Module '{module}' declares port '{port}'; port names may only use letters, digits, '_', '.' and '-'")]
    InvalidPortName {
        /// Module name
        module: String,
        /// Offending port name
        port: String,
    },

    /// A declared port never appears in the module's command
    #[error("Module '{module}' command has no {{{port}}} placeholder")]
    MissingPlaceholder {
        /// Module name
        module: String,
        /// Port without a placeholder
        port: String,
    },

    /// Two module definitions share a name
    #[error("Duplicate module definition: {0}")]
    DuplicateModule(String),

    /// A module file is not a valid definition
    #[error("Invalid module definition in {file}: {reason}")]
    InvalidModuleDefinition {
        /// File the definition came from
        file: String,
        /// Parser or validation message
        reason: String,
    },

    /// No module with this name is registered
    #[error("Module not found: {0}")]
    UnknownModule(String),

    /// Filesystem access failed
    #[error("I/O error on {path}: {message}")]
    Io {
        /// Path involved
        path: String,
        /// Underlying error message
        message: String,
    },
}

impl ToolboxError {
    fn io(path: &Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// A loaded toolbox
#[derive(Debug, Clone)]
pub struct Toolbox {
    name: String,
    dir: Option<PathBuf>,
    formats: FormatRegistry,
    modules: IndexMap<String, Arc<ModuleDef>>,
    about: Option<String>,
}

impl Toolbox {
    /// Create an in-memory toolbox with no modules
    #[must_use]
    pub fn new(name: impl Into<String>, formats: FormatRegistry) -> Self {
        Self {
            name: name.into(),
            dir: None,
            formats,
            modules: IndexMap::new(),
            about: None,
        }
    }

    /// Load a toolbox directory
    ///
    /// Module files are read in file-name order; files ending in `~` are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns error if any definition is malformed or references an unknown
    /// format. No partial toolbox is returned.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ToolboxError> {
        let dir = dir.as_ref();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        let formats_path = dir.join("config").join("formats.json");
        let text = std::fs::read_to_string(&formats_path)
            .map_err(|e| ToolboxError::io(&formats_path, &e))?;
        let formats = FormatRegistry::from_json(&text)?;

        let mut toolbox = Self::new(name, formats);
        toolbox.dir = Some(dir.to_path_buf());
        toolbox.about = std::fs::read_to_string(dir.join("config").join("ABOUT.txt")).ok();

        let modules_dir = dir.join("modules");
        if modules_dir.is_dir() {
            let mut files = Vec::new();
            let entries =
                std::fs::read_dir(&modules_dir).map_err(|e| ToolboxError::io(&modules_dir, &e))?;
            for entry in entries {
                let entry = entry.map_err(|e| ToolboxError::io(&modules_dir, &e))?;
                let path = entry.path();
                let skip = path
                    .file_name()
                    .map(|n| n.to_string_lossy().ends_with('~'))
                    .unwrap_or(true);
                if path.is_file() && !skip {
                    files.push(path);
                }
            }
            files.sort();

            for path in files {
                let text =
                    std::fs::read_to_string(&path).map_err(|e| ToolboxError::io(&path, &e))?;
                let def = Self::module_from_json(&text, &path.display().to_string())?;
                toolbox.register_module(def)?;
            }
        }

        debug!(
            toolbox = %toolbox.name,
            formats = toolbox.formats.len(),
            modules = toolbox.modules.len(),
            "Loaded toolbox"
        );
        Ok(toolbox)
    }

    /// Parse one module definition file
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a module definition or its ports do
    /// not match the command placeholders
    pub fn module_from_json(text: &str, file: &str) -> Result<ModuleDef, ToolboxError> {
        let parsed: ModuleFile =
            serde_json::from_str(text).map_err(|e| ToolboxError::InvalidModuleDefinition {
                file: file.to_string(),
                reason: e.to_string(),
            })?;
        if parsed.module_name.trim().is_empty() {
            return Err(ToolboxError::InvalidModuleDefinition {
                file: file.to_string(),
                reason: "moduleName is empty".to_string(),
            });
        }
        ModuleDef::new(
            parsed.module_name,
            parsed.inputs,
            parsed.outputs,
            &parsed.enclosed_command,
        )
    }

    /// Register a module definition
    ///
    /// # Errors
    ///
    /// Returns error if the name is taken or a parameter's format is unknown
    pub fn register_module(&mut self, def: ModuleDef) -> Result<Arc<ModuleDef>, ToolboxError> {
        if self.modules.contains_key(&def.name) {
            return Err(ToolboxError::DuplicateModule(def.name));
        }
        for param in def.inputs.iter().chain(def.outputs.iter()) {
            self.check_parameter(&def.name, param)?;
        }
        let def = Arc::new(def);
        self.modules.insert(def.name.clone(), Arc::clone(&def));
        Ok(def)
    }

    fn check_parameter(&self, module: &str, param: &Parameter) -> Result<(), ToolboxError> {
        if self.formats.contains(&param.format) {
            Ok(())
        } else {
            Err(ToolboxError::UnknownFormat {
                module: module.to_string(),
                parameter: param.name.clone(),
                format: param.format.clone(),
            })
        }
    }

    /// Look up a module by name
    ///
    /// # Errors
    ///
    /// Returns error if no module has this name
    pub fn module(&self, name: &str) -> Result<Arc<ModuleDef>, ToolboxError> {
        self.modules
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| ToolboxError::UnknownModule(name.to_string()))
    }

    /// Iterate modules in registration order
    pub fn modules(&self) -> impl Iterator<Item = &Arc<ModuleDef>> {
        self.modules.values()
    }

    /// The format registry
    #[must_use]
    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    /// Toolbox name (the directory name when loaded from disk)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contents of `config/ABOUT.txt`, if present
    #[must_use]
    pub fn about(&self) -> Option<&str> {
        self.about.as_deref()
    }

    /// Directory the toolbox was loaded from
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Directory holding saved pipelines
    #[must_use]
    pub fn pipelines_dir(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join("pipelines"))
    }

    /// Default output root for an analysis
    #[must_use]
    pub fn analysis_dir(&self, analysis: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join("data").join(analysis))
    }
}
