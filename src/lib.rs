//! # crudify
//!
//! Generate CRUD endpoints and client components from database schemas
//!
//! This crate provides a CLI tool and library that expands a catalog of
//! placeholder templates into REST endpoint definitions, client services and
//! UI components, one (table, verb, policy) unit at a time.

pub mod codegen;
pub mod config;
pub mod error;
pub mod introspect;
pub mod persist;
pub mod policy;
pub mod report;
pub mod schema;
pub mod template;

pub mod prelude {
    pub use crate::codegen::{
        BatchOrchestrator, BatchResult, CodeGenConfig, EndpointSynthesizer, GenerationResult,
        NamingConvention,
    };
    pub use crate::config::{DbConfig, GeneratorConfig};
    pub use crate::error::{CrudifyError, ErrorKind};
    pub use crate::introspect::{Introspector, SnapshotIntrospector, TableFilter};
    pub use crate::persist::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
    pub use crate::policy::{GenerationUnit, Policy, UnitRequest, Verb};
    pub use crate::schema::{Column, Database, ForeignKey, Schema, Table};
    pub use crate::template::{ResolutionContext, Template, TemplateStore};
}

#[cfg(feature = "postgres")]
pub use introspect::PostgresIntrospector;
