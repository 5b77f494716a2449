//! Data binding checks between a pipeline and a table.

use crate::graph::Pipeline;
use crate::table::Table;
use indexmap::IndexSet;
use tracing::warn;

impl Pipeline {
    /// Columns bound by sources or sinks that the table does not have
    #[must_use]
    pub fn missing_data(&self, table: &Table) -> IndexSet<String> {
        self.bound_columns()
            .into_iter()
            .filter(|c| !table.has_column(c))
            .map(str::to_string)
            .collect()
    }

    /// Data columns of the table that no source or sink binds
    ///
    /// `id` and `$(name)` variable columns are never reported.
    #[must_use]
    pub fn unused_data(&self, table: &Table) -> IndexSet<String> {
        let bound = self.bound_columns();
        table
            .data_columns()
            .filter(|c| !bound.contains(c))
            .map(str::to_string)
            .collect()
    }
}

/// Result of checking a pipeline against a table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingReport {
    /// Bound columns absent from the table
    pub missing: IndexSet<String>,
    /// Table columns nothing binds
    pub unused: IndexSet<String>,
}

impl BindingReport {
    /// Check `pipeline` against `table`
    #[must_use]
    pub fn check(pipeline: &Pipeline, table: &Table) -> Self {
        let report = Self {
            missing: pipeline.missing_data(table),
            unused: pipeline.unused_data(table),
        };
        for column in &report.unused {
            warn!(column = %column, "Table column is not used by the pipeline");
        }
        report
    }

    /// An analysis can be created only when nothing is missing
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::linear;

    #[test]
    fn test_binding_exact_match() {
        let (p, _, _, _) = linear();
        let table = Table::parse("id|infile|outfile\n1|a.txt|a.csv\n").unwrap();
        let report = BindingReport::check(&p, &table);
        assert!(report.is_ok());
        assert!(report.unused.is_empty());
    }

    #[test]
    fn test_missing_source_column() {
        let (p, _, _, _) = linear();
        let table = Table::parse("id|outfile\n1|a.csv\n").unwrap();
        let missing = p.missing_data(&table);
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["infile"]);
        assert!(!BindingReport::check(&p, &table).is_ok());
    }

    #[test]
    fn test_unused_column_excludes_id_and_variables() {
        let (p, _, _, _) = linear();
        let table =
            Table::parse("id|infile|outfile|notes|$(dir)\n1|a.txt|a.csv|hello|out\n").unwrap();
        let report = BindingReport::check(&p, &table);
        assert!(report.is_ok());
        assert_eq!(report.unused.into_iter().collect::<Vec<_>>(), vec!["notes"]);
    }
}
