//! File format definitions and the subtyping relation between them.
//!
//! Formats form a forest through single parent pointers. A file of format
//! `A` may feed a port expecting `B` when `B` is `A` or one of `A`'s
//! ancestors. The reserved `arg` format marks inline text rather than a file.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Name of the reserved pseudo-format for inline textual data
pub const ARG_FORMAT: &str = "arg";

/// Display colour of a format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Colour used for the `arg` format and formats without a colour
    pub const GREY: Self = Self(80, 80, 80);
}

impl Default for Rgb {
    fn default() -> Self {
        Self::GREY
    }
}

/// A named file format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    /// Unique format name
    pub name: String,
    /// Suffix appended to intermediate files of this format (`.csv`, or empty)
    pub suffix: String,
    /// Name of the immediate parent format
    pub parent: Option<String>,
    /// Display colour
    pub color: Rgb,
}

impl Format {
    /// Create a format without a parent
    #[must_use]
    pub fn new(name: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suffix: normalize_suffix(suffix.into()),
            parent: None,
            color: Rgb::default(),
        }
    }

    /// Set the parent format
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Set the display colour
    #[must_use]
    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = color;
        self
    }

    /// Check if this is the reserved `arg` format
    #[must_use]
    pub fn is_arg(&self) -> bool {
        self.name == ARG_FORMAT
    }
}

fn normalize_suffix(suffix: String) -> String {
    if suffix.is_empty() || suffix.starts_with('.') {
        suffix
    } else {
        format!(".{}", suffix)
    }
}

/// Errors raised while loading format definitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// A definition is malformed or references an absent parent
    #[error("Invalid format definition '{name}': {reason}")]
    InvalidFormatDefinition {
        /// Format being defined
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// The parent chain loops back on itself
    #[error("Format inheritance cycle: {}", chain.join(" -> "))]
    FormatCycle {
        /// Formats along the cycle, first name repeated at the end
        chain: Vec<String>,
    },

    /// Two definitions share a name
    #[error("Duplicate format definition: {0}")]
    DuplicateFormat(String),

    /// A definition tries to redefine `arg`
    #[error("Format name '{ARG_FORMAT}' is reserved")]
    ReservedFormatName,

    /// The catalog file is not valid JSON of the expected shape
    #[error("Malformed format catalog: {0}")]
    Malformed(String),
}

/// Resolved set of formats with acyclic parent links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRegistry {
    formats: IndexMap<String, Format>,
}

impl FormatRegistry {
    /// Resolve a list of definitions into a registry
    ///
    /// Every parent is resolved after all definitions are read, so order does
    /// not matter. The `arg` format is appended automatically.
    ///
    /// # Errors
    ///
    /// Returns error on duplicate or reserved names, absent parents, or cycles.
    /// No partial registry is produced.
    pub fn load(defs: impl IntoIterator<Item = Format>) -> Result<Self, FormatError> {
        let mut formats = IndexMap::new();
        for def in defs {
            if def.is_arg() {
                return Err(FormatError::ReservedFormatName);
            }
            if formats.contains_key(&def.name) {
                return Err(FormatError::DuplicateFormat(def.name));
            }
            formats.insert(def.name.clone(), def);
        }
        formats.insert(
            ARG_FORMAT.to_string(),
            Format::new(ARG_FORMAT, "").with_color(Rgb::GREY),
        );

        for format in formats.values() {
            if let Some(parent) = &format.parent {
                if !formats.contains_key(parent) {
                    return Err(FormatError::InvalidFormatDefinition {
                        name: format.name.clone(),
                        reason: format!("parent format '{}' is not defined", parent),
                    });
                }
            }
        }

        let registry = Self { formats };
        registry.check_cycles()?;
        Ok(registry)
    }

    /// Parse the `{"formatDefs": [{"<name>": {...}}, ...]}` catalog shape
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or the definitions do not resolve
    pub fn from_json(text: &str) -> Result<Self, FormatError> {
        let file: FormatFile =
            serde_json::from_str(text).map_err(|e| FormatError::Malformed(e.to_string()))?;

        let mut defs = Vec::with_capacity(file.format_defs.len());
        for entry in file.format_defs {
            if entry.len() != 1 {
                return Err(FormatError::Malformed(format!(
                    "each format entry must have exactly one name, found {}",
                    entry.len()
                )));
            }
            for (name, body) in entry {
                let mut format = Format::new(name, body.suffix).with_color(body.color);
                format.parent = body.extends.filter(|p| !p.is_empty());
                defs.push(format);
            }
        }
        Self::load(defs)
    }

    fn check_cycles(&self) -> Result<(), FormatError> {
        for start in self.formats.values() {
            let mut seen = IndexSet::new();
            let mut current = Some(start);
            while let Some(format) = current {
                if !seen.insert(format.name.as_str()) {
                    let mut chain: Vec<String> = seen
                        .iter()
                        .skip_while(|n| **n != format.name)
                        .map(|n| (*n).to_string())
                        .collect();
                    chain.push(format.name.clone());
                    return Err(FormatError::FormatCycle { chain });
                }
                current = format.parent.as_ref().and_then(|p| self.formats.get(p));
            }
        }
        Ok(())
    }

    /// Look up a format by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Format> {
        self.formats.get(name)
    }

    /// Check if a format is defined
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.formats.contains_key(name)
    }

    /// True iff `source == target` or `target` is in `source`'s ancestor chain
    #[must_use]
    pub fn is_valid_input_to(&self, source: &str, target: &str) -> bool {
        self.ancestry(source).any(|name| name == target)
    }

    /// The format itself followed by its ancestors, nearest first
    pub fn ancestry<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let mut next = Some(name);
        std::iter::from_fn(move || {
            let current = next?;
            next = self
                .formats
                .get(current)
                .and_then(|f| f.parent.as_deref());
            Some(current)
        })
    }

    /// Suffix for a format, empty if unknown
    #[must_use]
    pub fn suffix(&self, name: &str) -> &str {
        self.formats.get(name).map_or("", |f| f.suffix.as_str())
    }

    /// Iterate formats in definition order (`arg` last)
    pub fn iter(&self) -> impl Iterator<Item = &Format> {
        self.formats.values()
    }

    /// Number of formats including `arg`
    #[must_use]
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Registry always contains `arg`, so it is never empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        let mut formats = IndexMap::new();
        formats.insert(ARG_FORMAT.to_string(), Format::new(ARG_FORMAT, ""));
        Self { formats }
    }
}

#[derive(Deserialize)]
struct FormatFile {
    #[serde(rename = "formatDefs")]
    format_defs: Vec<IndexMap<String, FormatBody>>,
}

#[derive(Deserialize)]
struct FormatBody {
    #[serde(default)]
    color: Rgb,
    #[serde(default)]
    suffix: String,
    #[serde(default)]
    extends: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FormatRegistry {
        FormatRegistry::load(vec![
            Format::new("text", ".txt"),
            Format::new("csv", ".csv").with_parent("text"),
            Format::new("tsv", "tsv").with_parent("csv"),
            Format::new("image", ".png"),
        ])
        .unwrap()
    }

    #[test]
    fn test_arg_always_present() {
        let registry = sample();
        assert!(registry.contains(ARG_FORMAT));
        assert_eq!(registry.len(), 5);
        assert!(registry.get(ARG_FORMAT).unwrap().is_arg());
    }

    #[test]
    fn test_suffix_normalized() {
        let registry = sample();
        assert_eq!(registry.suffix("tsv"), ".tsv");
        assert_eq!(registry.suffix("arg"), "");
    }

    #[test]
    fn test_valid_input_reflexive_and_ancestors() {
        let registry = sample();
        assert!(registry.is_valid_input_to("csv", "csv"));
        assert!(registry.is_valid_input_to("csv", "text"));
        assert!(registry.is_valid_input_to("tsv", "text"));
        assert!(!registry.is_valid_input_to("text", "csv"));
        assert!(!registry.is_valid_input_to("image", "text"));
    }

    #[test]
    fn test_ancestry_order() {
        let registry = sample();
        let chain: Vec<_> = registry.ancestry("tsv").collect();
        assert_eq!(chain, vec!["tsv", "csv", "text"]);
    }

    #[test]
    fn test_missing_parent_rejected() {
        let result = FormatRegistry::load(vec![Format::new("csv", ".csv").with_parent("text")]);
        assert!(matches!(
            result,
            Err(FormatError::InvalidFormatDefinition { .. })
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let result = FormatRegistry::load(vec![
            Format::new("a", "").with_parent("b"),
            Format::new("b", "").with_parent("c"),
            Format::new("c", "").with_parent("a"),
        ]);
        match result {
            Err(FormatError::FormatCycle { chain }) => {
                assert_eq!(chain.first(), chain.last());
                assert_eq!(chain.len(), 4);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_parent_rejected() {
        let result = FormatRegistry::load(vec![Format::new("a", "").with_parent("a")]);
        assert!(matches!(result, Err(FormatError::FormatCycle { .. })));
    }

    #[test]
    fn test_duplicate_and_reserved() {
        let dup = FormatRegistry::load(vec![Format::new("a", ""), Format::new("a", "")]);
        assert_eq!(dup, Err(FormatError::DuplicateFormat("a".to_string())));

        let reserved = FormatRegistry::load(vec![Format::new("arg", "")]);
        assert_eq!(reserved, Err(FormatError::ReservedFormatName));
    }

    #[test]
    fn test_from_json() {
        let text = r#"{"formatDefs": [
            {"csv": {"color": [0, 128, 0], "suffix": ".csv", "extends": "text"}},
            {"text": {"color": [10, 10, 10], "suffix": ".txt", "extends": ""}}
        ]}"#;
        let registry = FormatRegistry::from_json(text).unwrap();
        assert!(registry.is_valid_input_to("csv", "text"));
        assert_eq!(registry.get("csv").unwrap().color, Rgb(0, 128, 0));
        assert_eq!(registry.get("text").unwrap().parent, None);
    }

    #[test]
    fn test_from_json_multi_key_entry() {
        let text = r#"{"formatDefs": [{"a": {}, "b": {}}]}"#;
        assert!(matches!(
            FormatRegistry::from_json(text),
            Err(FormatError::Malformed(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn prop_chain_is_valid_input_to_every_ancestor(depth in 1usize..12) {
            let mut defs = vec![Format::new("f0", "")];
            for i in 1..depth {
                defs.push(Format::new(format!("f{}", i), "").with_parent(format!("f{}", i - 1)));
            }
            let registry = FormatRegistry::load(defs).unwrap();
            let leaf = format!("f{}", depth - 1);
            for i in 0..depth {
                let ancestor = format!("f{}", i);
                proptest::prop_assert!(registry.is_valid_input_to(&leaf, &ancestor));
                proptest::prop_assert_eq!(registry.is_valid_input_to(&ancestor, &leaf), i == depth - 1);
            }
        }
    }
}
