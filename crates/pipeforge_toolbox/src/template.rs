//! Command templates with `{port}` placeholders.
//!
//! A template is parsed once against the module's declared port names.
//! Only `{name}` tokens naming a declared port become slots; any other
//! brace text (`awk '{print $1}'`, `${HOME}`) is literal.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_.\-]+)\}").expect("placeholder pattern is valid"));

static SLOT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("slot name pattern is valid"));

/// Check if `name` can appear as a `{name}` slot
#[must_use]
pub fn is_slot_name(name: &str) -> bool {
    SLOT_NAME.is_match(name)
}

/// Template fill error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// A slot had no value in the fill map
    #[error("Unresolved placeholder {{{name}}}")]
    UnresolvedPlaceholder {
        /// Port name of the slot
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Slot(String),
}

/// A parsed command template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    pieces: Vec<Piece>,
}

impl CommandTemplate {
    /// Parse `source`, treating `{name}` as a slot when `name` is in `ports`
    pub fn parse<'a>(source: &str, ports: impl IntoIterator<Item = &'a str>) -> Self {
        let ports: std::collections::BTreeSet<&str> = ports.into_iter().collect();
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut cursor = 0;

        for caps in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if !ports.contains(name.as_str()) {
                continue;
            }
            literal.push_str(&source[cursor..whole.start()]);
            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(Piece::Slot(name.as_str().to_string()));
            cursor = whole.end();
        }
        literal.push_str(&source[cursor..]);
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Self {
            source: source.to_string(),
            pieces,
        }
    }

    /// Template text as written
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Slot names in order of appearance (repeats included)
    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|p| match p {
            Piece::Slot(name) => Some(name.as_str()),
            Piece::Literal(_) => None,
        })
    }

    /// Fill every slot from `values` in a single pass
    ///
    /// # Errors
    ///
    /// Returns error if any slot has no entry in `values`
    pub fn fill(&self, values: &IndexMap<String, String>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Slot(name) => {
                    let value =
                        values
                            .get(name)
                            .ok_or_else(|| TemplateError::UnresolvedPlaceholder {
                                name: name.clone(),
                            })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}
