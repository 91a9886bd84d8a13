//! Code generation
//!
//! This module turns a validated schema snapshot and a set of generation
//! units into endpoint definitions, client services and UI components.

use std::sync::Arc;

use crate::persist::ArtifactStore;
use crate::schema::Schema;
use crate::template::TemplateStore;

pub mod batch;
pub mod context;
pub mod joins;
pub mod naming;
pub mod synthesize;

pub use batch::{BatchOrchestrator, BatchResult, FailedUnit};
pub use joins::{resolve_joins, JoinDescriptor, JoinPlan, SelectorKind};
pub use naming::NamingConvention;
pub use synthesize::{EndpointSynthesizer, GenerationResult};

/// Default bound on units synthesized at once
pub const DEFAULT_MAX_PARALLEL: usize = 8;

/// Configuration for code generation
#[derive(Debug, Clone)]
pub struct CodeGenConfig {
    /// Naming convention for classes, files and labels
    pub naming: NamingConvention,
    /// Upper bound on concurrently running units
    pub max_parallel: usize,
}

impl Default for CodeGenConfig {
    fn default() -> Self {
        Self {
            naming: NamingConvention::default(),
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }
}

impl CodeGenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_naming(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Wire a synthesizer and orchestrator around shared read-only inputs
    pub fn build(
        &self,
        schema: Arc<Schema>,
        templates: Arc<TemplateStore>,
        store: Arc<dyn ArtifactStore>,
    ) -> BatchOrchestrator {
        let synthesizer = EndpointSynthesizer::new(schema, templates, store, self.naming.clone());
        BatchOrchestrator::new(synthesizer, self.max_parallel)
    }
}
