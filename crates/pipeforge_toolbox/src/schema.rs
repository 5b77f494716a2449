//! Port parameters and module definitions.

use crate::format::ARG_FORMAT;
use crate::template::{is_slot_name, CommandTemplate};
use serde::{Deserialize, Serialize};

/// A declared port: name, format, and whether a connection is required
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    /// Port name, also the placeholder name in command templates
    pub name: String,
    /// Name of the port's format
    pub format: String,
    /// Whether generation fails when the port is left unconnected
    pub required: bool,
}

impl Parameter {
    /// Create a required parameter
    #[must_use]
    pub fn required(name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
            required: true,
        }
    }

    /// Create an optional parameter
    #[must_use]
    pub fn optional(name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
            required: false,
        }
    }

    /// Check if the parameter carries inline text instead of a file
    #[must_use]
    pub fn is_arg(&self) -> bool {
        self.format == ARG_FORMAT
    }
}

/// Definition of a module: its ports and the command it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDef {
    /// Unique module name within a toolbox
    pub name: String,
    /// Ordered input ports
    pub inputs: Vec<Parameter>,
    /// Ordered output ports
    pub outputs: Vec<Parameter>,
    /// Parsed command template
    pub template: CommandTemplate,
}

impl ModuleDef {
    /// Build a module definition, parsing its command against the declared ports
    ///
    /// # Errors
    ///
    /// Returns error if a port name is declared twice, cannot be written as
    /// a `{name}` placeholder, or has no placeholder in the command
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<Parameter>,
        outputs: Vec<Parameter>,
        command: &str,
    ) -> Result<Self, crate::ToolboxError> {
        let name = name.into();
        let mut seen = std::collections::BTreeSet::new();
        for port in inputs.iter().chain(outputs.iter()) {
            if !is_slot_name(&port.name) {
                return Err(crate::ToolboxError::InvalidPortName {
                    module: name,
                    port: port.name.clone(),
                });
            }
            if !seen.insert(port.name.as_str()) {
                return Err(crate::ToolboxError::DuplicatePort {
                    module: name,
                    port: port.name.clone(),
                });
            }
        }
        let template = CommandTemplate::parse(command, seen.iter().copied());
        let used: std::collections::BTreeSet<&str> = template.slots().collect();
        if let Some(port) = seen.iter().find(|p| !used.contains(*p)) {
            return Err(crate::ToolboxError::MissingPlaceholder {
                module: name,
                port: (*port).to_string(),
            });
        }
        Ok(Self {
            name,
            inputs,
            outputs,
            template,
        })
    }

    /// The unparsed command text
    #[must_use]
    pub fn command(&self) -> &str {
        self.template.source()
    }

    /// Human summary: required ports as `<name>`, optional as `[name]`
    #[must_use]
    pub fn summary(&self) -> String {
        let mut command = self.command().to_string();
        for port in self.inputs.iter().chain(self.outputs.iter()) {
            let marked = if port.required {
                format!("<{}>", port.name)
            } else {
                format!("[{}]", port.name)
            };
            command = command.replace(&format!("{{{}}}", port.name), &marked);
        }
        format!("{} '{}'", self.name, command)
    }
}

/// On-disk shape of a module definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ModuleFile {
    #[serde(rename = "moduleName")]
    pub module_name: String,
    #[serde(rename = "enclosedCommand")]
    pub enclosed_command: String,
    #[serde(default)]
    pub inputs: Vec<Parameter>,
    #[serde(default)]
    pub outputs: Vec<Parameter>,
}
