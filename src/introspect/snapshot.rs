use std::fs;
use std::path::PathBuf;

use tracing::{debug, error, info};

use super::{Introspector, TableFilter};
use crate::error::CrudifyError;
use crate::schema::Database;

/// Reads a schema snapshot saved as a JSON array of databases
#[derive(Debug, Clone)]
pub struct SnapshotIntrospector {
    path: PathBuf,
}

impl SnapshotIntrospector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Introspector for SnapshotIntrospector {
    fn get_databases(&mut self, filter: &TableFilter) -> Result<Vec<Database>, CrudifyError> {
        info!(path = ?self.path, "Reading schema snapshot");
        let source = self.path.display().to_string();

        let json = fs::read_to_string(&self.path).map_err(|e| {
            error!(path = ?self.path, error = ?e, "Failed to read schema snapshot");
            CrudifyError::Introspection {
                schema: source.clone(),
                message: format!("Failed to read snapshot: {}", e),
            }
        })?;

        let mut databases = parse_snapshot(&source, &json)?;
        for database in &mut databases {
            filter.apply(database);
            debug!(database = ?database.name, tables = database.tables.len(), "Tables after filtering");
        }
        Ok(databases)
    }
}

/// Parse snapshot JSON; `source` names the snapshot in errors
pub fn parse_snapshot(source: &str, json: &str) -> Result<Vec<Database>, CrudifyError> {
    serde_json::from_str(json).map_err(|e| CrudifyError::Introspection {
        schema: source.to_string(),
        message: format!("Malformed snapshot: {}", e),
    })
}
