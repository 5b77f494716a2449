//! Row-oriented data tables.
//!
//! A table is delimited text whose first line holds the column headers.
//! Every row is keyed by its `id` cell. Headers of the form `$(name)` are
//! make-style variables: they are not bound to blocks, but their cells are
//! substituted into other cells of the same row.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::Path;

/// Default cell delimiter
pub const DEFAULT_DELIMITER: char = '|';

/// Name of the mandatory row key column
pub const ID_COLUMN: &str = "id";

static VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\([^()\s]+\)").expect("variable pattern is valid"));

static ROW_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("row id pattern is valid"));

/// Error from table parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// No header line
    #[error("Table is empty")]
    Empty,

    /// A row's cell count differs from the header's
    #[error("Row on line {line} has {found} cells, expected {expected}")]
    RaggedRow {
        /// 1-based line number
        line: usize,
        /// Header cell count
        expected: usize,
        /// Cells on this line
        found: usize,
    },

    /// Two columns share a header
    #[error("Duplicate column header: {0}")]
    DuplicateHeader(String),

    /// The header has no `id` column
    #[error("Table has no '{ID_COLUMN}' column")]
    MissingIdColumn,

    /// Two rows share an id
    #[error("Duplicate row id: {0}")]
    DuplicateRowId(String),

    /// A row id cannot name a directory
    #[error("Invalid row id {id:?} on line {line}: {reason}")]
    InvalidRowId {
        /// 1-based line number
        line: usize,
        /// The offending id
        id: String,
        /// Why it was rejected
        reason: String,
    },

    /// The file could not be read
    #[error("I/O error on {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// Underlying error message
        message: String,
    },
}

/// One table row, keyed by header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    cells: IndexMap<String, String>,
}

impl Row {
    /// The row's `id` cell
    #[must_use]
    pub fn id(&self) -> &str {
        self.cells.get(ID_COLUMN).map_or("", String::as_str)
    }

    /// Cell under `column`
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(String::as_str)
    }

    /// Replace every `$(name)` token that names a column with this row's cell
    ///
    /// Tokens naming no column are kept verbatim. Substituted text is not
    /// scanned again.
    #[must_use]
    pub fn substitute(&self, text: &str) -> String {
        VARIABLE
            .replace_all(text, |caps: &Captures<'_>| {
                let token = &caps[0];
                self.cells
                    .get(token)
                    .cloned()
                    .unwrap_or_else(|| token.to_string())
            })
            .into_owned()
    }

    /// Cell under `column` with variables substituted
    #[must_use]
    pub fn resolved(&self, column: &str) -> Option<String> {
        self.get(column).map(|cell| self.substitute(cell))
    }
}

/// A parsed data table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    /// Parse `|`-delimited text
    ///
    /// # Errors
    ///
    /// Returns error if the table is empty, ragged, has duplicate headers,
    /// lacks an `id` column, or has duplicate or unusable row ids
    pub fn parse(text: &str) -> Result<Self, TableError> {
        Self::parse_with(text, DEFAULT_DELIMITER)
    }

    /// Parse text with a custom delimiter
    ///
    /// # Errors
    ///
    /// Same as [`Table::parse`]
    pub fn parse_with(text: &str, delimiter: char) -> Result<Self, TableError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line))
            .filter(|(_, line)| !line.trim().is_empty());

        let (_, header_line) = lines.next().ok_or(TableError::Empty)?;
        let headers: Vec<String> = split(header_line, delimiter);

        let mut seen = std::collections::BTreeSet::new();
        for header in &headers {
            if !seen.insert(header.as_str()) {
                return Err(TableError::DuplicateHeader(header.clone()));
            }
        }
        if !seen.contains(ID_COLUMN) {
            return Err(TableError::MissingIdColumn);
        }

        let mut rows = Vec::new();
        let mut ids = std::collections::BTreeSet::new();
        for (line, text) in lines {
            let cells = split(text, delimiter);
            if cells.len() != headers.len() {
                return Err(TableError::RaggedRow {
                    line,
                    expected: headers.len(),
                    found: cells.len(),
                });
            }
            let row = Row {
                cells: headers.iter().cloned().zip(cells).collect(),
            };
            check_row_id(line, row.id())?;
            if !ids.insert(row.id().to_string()) {
                return Err(TableError::DuplicateRowId(row.id().to_string()));
            }
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    /// Read and parse a table file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or does not parse
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TableError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&text)
    }

    /// Column headers in file order
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Check if a column exists
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    /// Headers that are neither `id` nor make variables
    pub fn data_columns(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .map(String::as_str)
            .filter(|h| *h != ID_COLUMN && !is_variable(h))
    }

    /// Headers of the form `$(name)`
    pub fn variable_columns(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .map(String::as_str)
            .filter(|h| is_variable(h))
    }

    /// Rows in file order
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Look up a row by id
    #[must_use]
    pub fn row(&self, id: &str) -> Option<&Row> {
        self.rows.iter().find(|r| r.id() == id)
    }

    /// Number of data rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table has no data rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Check if a header is a make-style variable `$(name)`
#[must_use]
pub fn is_variable(header: &str) -> bool {
    VARIABLE
        .find(header)
        .is_some_and(|m| m.start() == 0 && m.end() == header.len())
}

fn split(line: &str, delimiter: char) -> Vec<String> {
    line.split(delimiter).map(|c| c.trim().to_string()).collect()
}

fn check_row_id(line: usize, id: &str) -> Result<(), TableError> {
    let reason = if id.is_empty() {
        "id is empty"
    } else if id == "." || id == ".." {
        "id is a relative path component"
    } else if id.contains(['/', '\\']) {
        "id contains a path separator"
    } else if !ROW_ID.is_match(id) {
        "id may only contain letters, digits, '_', '.' and '-'"
    } else {
        return Ok(());
    };
    Err(TableError::InvalidRowId {
        line,
        id: id.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
id | infile | outfile       | $(dir)
1  | a.txt  | $(dir)/a.csv  | out1
2  | b.txt  | $(dir)/b.csv  | out2
";

    #[test]
    fn test_parse_trims_cells() {
        let table = Table::parse(SAMPLE).unwrap();
        assert_eq!(table.headers(), &["id", "infile", "outfile", "$(dir)"]);
        assert_eq!(table.len(), 2);
        let row = &table.rows()[0];
        assert_eq!(row.id(), "1");
        assert_eq!(row.get("infile"), Some("a.txt"));
        assert_eq!(table.row("2").and_then(|r| r.get("$(dir)")), Some("out2"));
    }

    #[test]
    fn test_data_and_variable_columns() {
        let table = Table::parse(SAMPLE).unwrap();
        assert_eq!(table.data_columns().collect::<Vec<_>>(), vec!["infile", "outfile"]);
        assert_eq!(table.variable_columns().collect::<Vec<_>>(), vec!["$(dir)"]);
        assert!(is_variable("$(dir)"));
        assert!(!is_variable("x$(dir)"));
        assert!(!is_variable("dir"));
    }

    #[test]
    fn test_substitute() {
        let table = Table::parse(SAMPLE).unwrap();
        let row = &table.rows()[1];
        assert_eq!(row.resolved("outfile").unwrap(), "out2/b.csv");
        assert_eq!(row.substitute("$(dir)-$(dir)"), "out2-out2");
        assert_eq!(row.substitute("$(missing)/x"), "$(missing)/x");
        assert_eq!(row.resolved("nope"), None);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let table = Table::parse("id|x\n\n1|a\n\n").unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(Table::parse("  \n"), Err(TableError::Empty));
    }

    #[test]
    fn test_header_only() {
        let table = Table::parse("id|x\n").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_ragged_row() {
        assert_eq!(
            Table::parse("id|x\n1|a|b\n"),
            Err(TableError::RaggedRow {
                line: 2,
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn test_duplicate_header() {
        assert_eq!(
            Table::parse("id|x|x\n"),
            Err(TableError::DuplicateHeader("x".to_string()))
        );
    }

    #[test]
    fn test_missing_id_column() {
        assert_eq!(Table::parse("key|x\n1|a\n"), Err(TableError::MissingIdColumn));
    }

    #[test]
    fn test_duplicate_row_id() {
        assert_eq!(
            Table::parse("id|x\n1|a\n1|b\n"),
            Err(TableError::DuplicateRowId("1".to_string()))
        );
    }

    #[test]
    fn test_invalid_row_ids() {
        for bad in ["", "..", ".", "a/b", "row one", "a:b", "a#b", "50%", "$(x)", "a\\b"] {
            let text = format!("id|x\n{}|a\n", bad);
            assert!(
                matches!(Table::parse(&text), Err(TableError::InvalidRowId { line: 2, .. })),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_row_id_grammar_accepts_plain_names() {
        let table = Table::parse("id|x\nsample_1.a-B|a\n").unwrap();
        assert_eq!(table.rows()[0].id(), "sample_1.a-B");
    }

    #[test]
    fn test_custom_delimiter() {
        let table = Table::parse_with("id,x\n7,z\n", ',').unwrap();
        assert_eq!(table.rows()[0].get("x"), Some("z"));
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("table.txt");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(Table::load(&path).unwrap().len(), 2);
        assert!(matches!(
            Table::load(tmp.path().join("absent.txt")),
            Err(TableError::Io { .. })
        ));
    }
}
