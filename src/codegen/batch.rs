//! Batch generation
//!
//! Every unit is dispatched up front and awaited in request order. A failing
//! unit never cancels its siblings; the batch always completes with a full
//! succeeded/failed partition.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::codegen::synthesize::{EndpointSynthesizer, GenerationResult};
use crate::error::CrudifyError;
use crate::policy::{GenerationUnit, UnitKey, UnitRequest};

/// A unit that did not generate, with the reason
#[derive(Debug)]
pub struct FailedUnit {
    pub unit: UnitKey,
    pub error: CrudifyError,
}

/// Outcome of a whole batch
#[derive(Debug, Default)]
pub struct BatchResult {
    pub succeeded: Vec<GenerationResult>,
    pub failed: Vec<FailedUnit>,
    /// Sum of `lines_of_code` over `succeeded`
    pub lines_of_code: usize,
}

impl BatchResult {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, unit: UnitKey, outcome: Result<GenerationResult, CrudifyError>) {
        match outcome {
            Ok(result) => {
                self.lines_of_code += result.lines_of_code;
                self.succeeded.push(result);
            }
            Err(e) => {
                warn!(unit = %unit, kind = %e.kind(), error = %e, "Unit failed");
                self.failed.push(FailedUnit { unit, error: e });
            }
        }
    }
}

/// Runs the synthesizer across many units with bounded parallelism
#[derive(Clone)]
pub struct BatchOrchestrator {
    synthesizer: EndpointSynthesizer,
    permits: Arc<Semaphore>,
}

impl BatchOrchestrator {
    pub fn new(synthesizer: EndpointSynthesizer, max_parallel: usize) -> Self {
        Self {
            synthesizer,
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    /// Generate every unit
    pub async fn run(&self, units: Vec<GenerationUnit>) -> BatchResult {
        info!(units = units.len(), "Starting batch");
        let mut result = BatchResult::default();

        let handles: Vec<_> = units
            .into_iter()
            .map(|unit| {
                let key = unit.key();
                let synthesizer = self.synthesizer.clone();
                let permits = Arc::clone(&self.permits);
                let handle = tokio::spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => return Err(CrudifyError::Task(e.to_string())),
                    };
                    match tokio::task::spawn_blocking(move || synthesizer.synthesize(&unit)).await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(CrudifyError::Task(e.to_string())),
                    }
                });
                (key, handle)
            })
            .collect();

        for (key, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(unit = %key, error = %e, "Generation task aborted");
                    Err(CrudifyError::Task(e.to_string()))
                }
            };
            debug!(unit = %key, ok = outcome.is_ok(), "Unit finished");
            result.record(key, outcome);
        }

        info!(
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            lines_of_code = result.lines_of_code,
            "Batch finished"
        );
        result
    }

    /// Generate units from wire requests
    ///
    /// A request that does not convert fails alone and is reported after the
    /// units that ran.
    pub async fn run_requests(&self, requests: Vec<UnitRequest>) -> BatchResult {
        let mut rejected = Vec::new();
        let mut units = Vec::with_capacity(requests.len());

        for request in requests {
            let key = request.key();
            match GenerationUnit::try_from(request) {
                Ok(unit) => units.push(unit),
                Err(e) => rejected.push((key, e)),
            }
        }

        let mut result = self.run(units).await;
        for (key, e) in rejected {
            result.record(key, Err(e));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::NamingConvention;
    use crate::error::ErrorKind;
    use crate::persist::MemoryArtifactStore;
    use crate::policy::{DatabaseType, Verb};
    use crate::schema::{Column, Database, ForeignKey, Schema, Table};
    use crate::template::TemplateStore;

    fn orchestrator(store: Arc<MemoryArtifactStore>, max_parallel: usize) -> BatchOrchestrator {
        let schema = Schema::new(vec![Database {
            name: "shop".to_string(),
            tables: vec![
                Table::new(
                    "customers",
                    vec![
                        Column::new("id", "int").primary().automatic(),
                        Column::new("name", "text"),
                    ],
                ),
                Table::new(
                    "orders",
                    vec![
                        Column::new("id", "int").primary().automatic(),
                        Column::new("warehouse_id", "int"),
                    ],
                )
                .with_foreign_key(ForeignKey::new("warehouse_id", "warehouses", "id")),
                Table::new(
                    "products",
                    vec![
                        Column::new("sku", "varchar(20)").primary(),
                        Column::new("price", "decimal(8,2)"),
                    ],
                ),
            ],
        }])
        .unwrap();

        let synthesizer = EndpointSynthesizer::new(
            Arc::new(schema),
            Arc::new(TemplateStore::builtin()),
            store,
            NamingConvention::default(),
        );
        BatchOrchestrator::new(synthesizer, max_parallel)
    }

    fn unit(table: &str, verb: Verb) -> GenerationUnit {
        let mut unit = GenerationUnit::new(DatabaseType::Pgsql, "shop", table, verb);
        unit.join = true;
        unit
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let store = Arc::new(MemoryArtifactStore::new());
        let batch = orchestrator(Arc::clone(&store), 4);

        let result = batch
            .run(vec![
                unit("customers", Verb::Get),
                unit("orders", Verb::Get),
                unit("products", Verb::Get),
            ])
            .await;

        assert_eq!(result.succeeded.len(), 2);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].unit.table, "orders");
        assert_eq!(result.failed[0].error.kind(), ErrorKind::UnresolvedForeignKey);
        assert!(!result.is_complete_success());
        assert_eq!(store.len(), 6);
    }

    #[tokio::test]
    async fn test_broken_foreign_key_fails_without_join() {
        let store = Arc::new(MemoryArtifactStore::new());
        let batch = orchestrator(Arc::clone(&store), 4);
        let plain = |table: &str, verb| GenerationUnit::new(DatabaseType::Pgsql, "shop", table, verb);

        let result = batch
            .run(vec![
                plain("customers", Verb::Get),
                plain("orders", Verb::Get),
                plain("products", Verb::Get),
                plain("orders", Verb::Post),
                plain("orders", Verb::Delete),
            ])
            .await;

        assert_eq!(result.succeeded.len(), 3);
        let failed: Vec<_> = result
            .failed
            .iter()
            .map(|f| (f.unit.table.as_str(), f.unit.verb, f.error.kind()))
            .collect();
        assert_eq!(
            failed,
            vec![
                ("orders", Verb::Get, ErrorKind::UnresolvedForeignKey),
                ("orders", Verb::Post, ErrorKind::UnresolvedForeignKey),
            ]
        );
        assert!(result.succeeded.iter().any(|r| r.unit.table == "orders" && r.unit.verb == Verb::Delete));
    }

    #[tokio::test]
    async fn test_lines_of_code_aggregate() {
        let store = Arc::new(MemoryArtifactStore::new());
        let batch = orchestrator(Arc::clone(&store), 2);

        let result = batch
            .run(vec![
                unit("customers", Verb::Post),
                unit("customers", Verb::Put),
                unit("products", Verb::Delete),
            ])
            .await;

        let expected: usize = result.succeeded.iter().map(|r| r.lines_of_code).sum();
        assert_eq!(result.lines_of_code, expected);
        let stored: usize = store
            .paths()
            .iter()
            .map(|p| store.get(p).unwrap().matches('\n').count())
            .sum();
        assert_eq!(result.lines_of_code, stored);
    }

    #[tokio::test]
    async fn test_results_follow_request_order() {
        let batch = orchestrator(Arc::new(MemoryArtifactStore::new()), 1);
        let verbs = [Verb::Delete, Verb::Post, Verb::Get, Verb::Put];

        let result = batch
            .run(verbs.iter().map(|v| unit("products", *v)).collect())
            .await;

        let order: Vec<_> = result.succeeded.iter().map(|r| r.unit.verb).collect();
        assert_eq!(order, verbs);
    }

    #[tokio::test]
    async fn test_same_unit_twice_without_overwrite() {
        let store = Arc::new(MemoryArtifactStore::new());
        let batch = orchestrator(Arc::clone(&store), 4);

        let result = batch
            .run(vec![unit("products", Verb::Get), unit("products", Verb::Get)])
            .await;

        assert_eq!(result.succeeded.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].error.kind(), ErrorKind::ArtifactExists);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_bad_request_fails_alone() {
        let batch = orchestrator(Arc::new(MemoryArtifactStore::new()), 4);
        let good: UnitRequest = serde_json::from_str(
            r#"{"databaseType":"pgsql","moduleName":"shop","moduleUrl":"shop","database":"shop",
                "table":"products","verb":"get","overwrite":false,"verbose":false,"join":false,"cqrs":false}"#,
        )
        .unwrap();
        let mut bad = good.clone();
        bad.database_type = "oracle".to_string();
        bad.verb = Verb::Delete;

        let result = batch.run_requests(vec![good, bad]).await;

        assert_eq!(result.succeeded.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].error.kind(), ErrorKind::Validation);
        assert_eq!(result.failed[0].unit.verb, Verb::Delete);
    }
}
