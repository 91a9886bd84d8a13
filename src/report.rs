//! Operator-facing batch summaries

use minijinja::Environment;
use serde::Serialize;

use crate::codegen::{BatchResult, GenerationResult};
use crate::error::CrudifyError;
use crate::policy::Verb;

/// One failed unit as reported to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub database: String,
    pub table: String,
    pub verb: Verb,
    /// Error kind label, e.g. `UnresolvedForeignKeyError`
    pub kind: String,
    pub message: String,
}

/// Serializable view of a [`BatchResult`]
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub lines_of_code: usize,
    pub succeeded: Vec<GenerationResult>,
    pub failed: Vec<FailureSummary>,
}

impl From<&BatchResult> for BatchSummary {
    fn from(result: &BatchResult) -> Self {
        let failed = result
            .failed
            .iter()
            .map(|failure| FailureSummary {
                database: failure.unit.database.clone(),
                table: failure.unit.table.clone(),
                verb: failure.unit.verb,
                kind: failure.error.kind().as_str().to_string(),
                message: failure.error.to_string(),
            })
            .collect::<Vec<_>>();

        Self {
            total: result.succeeded.len() + failed.len(),
            lines_of_code: result.lines_of_code,
            succeeded: result.succeeded.clone(),
            failed,
        }
    }
}

/// Plain-text summary
pub fn render_text(summary: &BatchSummary) -> Result<String, CrudifyError> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("summary", include_str!("templates/summary.txt.jinja"))?;

    let template = env.get_template("summary")?;
    Ok(template.render(summary)?)
}

/// Pretty-printed JSON summary
pub fn render_json(summary: &BatchSummary) -> Result<String, CrudifyError> {
    serde_json::to_string_pretty(summary).map_err(|e| CrudifyError::Output(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::FailedUnit;
    use crate::policy::UnitKey;

    fn result() -> BatchResult {
        BatchResult {
            succeeded: vec![GenerationResult {
                unit: UnitKey {
                    database: "crm".to_string(),
                    table: "customers".to_string(),
                    verb: Verb::Get,
                },
                lines_of_code: 42,
                artifact_paths: vec!["backend/crm/customers.get.endpoint.yaml".to_string()],
            }],
            failed: vec![FailedUnit {
                unit: UnitKey {
                    database: "crm".to_string(),
                    table: "orders".to_string(),
                    verb: Verb::Put,
                },
                error: CrudifyError::UnresolvedForeignKey {
                    table: "orders".to_string(),
                    column: "warehouse_id".to_string(),
                    referenced_table: "warehouses".to_string(),
                    referenced_column: "id".to_string(),
                },
            }],
            lines_of_code: 42,
        }
    }

    #[test]
    fn test_summary_from_result() {
        let summary = BatchSummary::from(&result());
        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed[0].kind, "UnresolvedForeignKeyError");
        assert!(summary.failed[0].message.contains("warehouses.id"));
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&BatchSummary::from(&result())).unwrap();
        assert!(text.starts_with("crudify: 42 lines of code from 1 of 2 units\n"));
        assert!(text.contains("  ok  crm.customers [get] 42 lines\n"));
        assert!(text.contains("        backend/crm/customers.get.endpoint.yaml\n"));
        assert!(text.contains("UnresolvedForeignKeyError  crm.orders [put]: "));
    }

    #[test]
    fn test_render_text_without_failures() {
        let mut result = result();
        result.failed.clear();
        let text = render_text(&BatchSummary::from(&result)).unwrap();
        assert!(!text.contains("failed:"));
    }

    #[test]
    fn test_render_json() {
        let json = render_json(&BatchSummary::from(&result())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["lines_of_code"], 42);
        assert_eq!(value["succeeded"][0]["unit"]["verb"], "get");
        assert_eq!(value["failed"][0]["table"], "orders");
        assert_eq!(value["failed"][0]["kind"], "UnresolvedForeignKeyError");
    }
}
