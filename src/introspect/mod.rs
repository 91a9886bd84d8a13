//! Database introspection
//!
//! This module produces the schema snapshot the generator runs against.
//! Snapshots come from a JSON file or, with the `postgres` feature, from a
//! live PostgreSQL connection.

use tracing::trace;

use crate::error::CrudifyError;
use crate::schema::{Database, LogicalType, Schema, Table};

mod snapshot;

pub use snapshot::{parse_snapshot, SnapshotIntrospector};

/// Filters to apply during introspection
#[derive(Debug, Default, Clone)]
pub struct TableFilter {
    /// Only include these tables (if Some)
    pub include: Option<Vec<String>>,
    /// Exclude these tables
    pub exclude: Option<Vec<String>>,
}

impl TableFilter {
    /// Check if a table should be included
    pub fn should_include(&self, table_name: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.iter().any(|t| t == table_name) {
                return false;
            }
        }

        if let Some(exclude) = &self.exclude {
            if exclude.iter().any(|t| t == table_name) {
                return false;
            }
        }

        true
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }

    /// Drop every table the filter rejects
    pub fn apply(&self, database: &mut Database) {
        database.tables.retain(|t| self.should_include(&t.name));
    }
}

/// Source of the schema snapshot
pub trait Introspector {
    /// Databases visible to this source, with `filter` applied
    fn get_databases(&mut self, filter: &TableFilter) -> Result<Vec<Database>, CrudifyError>;

    /// Validated snapshot of [`Introspector::get_databases`]
    fn snapshot(&mut self, filter: &TableFilter) -> Result<Schema, CrudifyError> {
        Schema::new(self.get_databases(filter)?)
    }
}

const LABEL_CANDIDATES: &[&str] = &["name", "title", "label", "description"];

/// Pick a display column for every foreign key that has none
///
/// Prefers a column named like a label, then the first non-key text column.
/// Foreign keys whose referenced table is missing are left alone.
pub fn infer_label_columns(database: &mut Database) {
    let labels: Vec<Vec<Option<String>>> = database
        .tables
        .iter()
        .map(|table| {
            table
                .foreign_keys
                .iter()
                .map(|fk| match fk.label_column {
                    Some(_) => None,
                    None => database
                        .table(&fk.referenced_table)
                        .and_then(label_column_of),
                })
                .collect()
        })
        .collect();

    for (table, table_labels) in database.tables.iter_mut().zip(labels) {
        for (fk, label) in table.foreign_keys.iter_mut().zip(table_labels) {
            if let Some(label) = label {
                trace!(table = ?table.name, column = ?fk.column, label = ?label, "Inferred label column");
                fk.label_column = Some(label);
            }
        }
    }
}

fn label_column_of(table: &Table) -> Option<String> {
    LABEL_CANDIDATES
        .iter()
        .find_map(|candidate| table.column(candidate))
        .or_else(|| {
            table
                .columns
                .iter()
                .find(|c| !c.primary && c.logical() == LogicalType::Text)
        })
        .map(|c| c.name.clone())
}

// Feature-gated database implementations
#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresIntrospector;
