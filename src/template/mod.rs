//! Template catalog and placeholder resolution
//!
//! Templates are plain text with placeholder tokens (see [`parse`] for the
//! grammar). The catalog holds one template per artifact kind and verb; it is
//! built once per process and shared read-only by every generation unit.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::CrudifyError;
use crate::policy::Verb;

pub mod parse;
pub mod resolve;

pub use parse::Node;
pub use resolve::{resolve, ResolutionContext, Scope};

/// Template parse and resolution failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("unresolved scalar token '{name}' on line {line}")]
    UnresolvedScalar { name: String, line: usize },

    #[error("unknown sequence '{name}' on line {line}")]
    UnknownSequence { name: String, line: usize },

    #[error("unknown predicate '{name}' on line {line}")]
    UnknownPredicate { name: String, line: usize },

    #[error("unknown filter '{filter}' on line {line}")]
    UnknownFilter { filter: String, line: usize },

    #[error("unterminated tag on line {line}")]
    UnterminatedTag { line: usize },

    #[error("malformed tag {tag} on line {line}")]
    MalformedTag { tag: String, line: usize },

    #[error("block {name} opened on line {line} is never closed")]
    UnclosedBlock { name: String, line: usize },

    #[error("expected the close of {expected} but found {found} on line {line}")]
    MismatchedClose {
        expected: String,
        found: String,
        line: usize,
    },

    #[error("close of '{name}' on line {line} has no matching open")]
    UnexpectedClose { name: String, line: usize },

    #[error("no template registered for {kind} on '{verb}'")]
    UnknownTemplate { kind: ArtifactKind, verb: Verb },
}

/// Kind of artifact a template produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    EndpointDefinition,
    ServiceMethod,
    ListComponent,
    ModalEditComponent,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EndpointDefinition => "endpoint definition",
            Self::ServiceMethod => "service method",
            Self::ListComponent => "list component",
            Self::ModalEditComponent => "modal edit component",
        };
        f.write_str(name)
    }
}

/// A named template, parsed once when it is loaded
#[derive(Debug, Clone)]
pub struct Template {
    id: String,
    kind: ArtifactKind,
    source: String,
    parsed: Result<Vec<Node>, TemplateError>,
}

impl Template {
    pub fn new(id: impl Into<String>, kind: ArtifactKind, source: impl Into<String>) -> Self {
        let source = source.into();
        let parsed = parse::parse(&source);
        Self {
            id: id.into(),
            kind,
            source,
            parsed,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed nodes, or the parse error if the template is defective
    pub fn nodes(&self) -> Result<&[Node], TemplateError> {
        self.parsed.as_deref().map_err(|e| e.clone())
    }

    pub fn is_valid(&self) -> bool {
        self.parsed.is_ok()
    }
}

struct CatalogEntry {
    id: &'static str,
    kind: ArtifactKind,
    verb: Verb,
    file: &'static str,
    source: &'static str,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        id: "endpoint.post",
        kind: ArtifactKind::EndpointDefinition,
        verb: Verb::Post,
        file: "endpoint_post.yaml.tmpl",
        source: include_str!("catalog/endpoint_post.yaml.tmpl"),
    },
    CatalogEntry {
        id: "endpoint.get",
        kind: ArtifactKind::EndpointDefinition,
        verb: Verb::Get,
        file: "endpoint_get.yaml.tmpl",
        source: include_str!("catalog/endpoint_get.yaml.tmpl"),
    },
    CatalogEntry {
        id: "endpoint.put",
        kind: ArtifactKind::EndpointDefinition,
        verb: Verb::Put,
        file: "endpoint_put.yaml.tmpl",
        source: include_str!("catalog/endpoint_put.yaml.tmpl"),
    },
    CatalogEntry {
        id: "endpoint.delete",
        kind: ArtifactKind::EndpointDefinition,
        verb: Verb::Delete,
        file: "endpoint_delete.yaml.tmpl",
        source: include_str!("catalog/endpoint_delete.yaml.tmpl"),
    },
    CatalogEntry {
        id: "service.post",
        kind: ArtifactKind::ServiceMethod,
        verb: Verb::Post,
        file: "service_post.ts.tmpl",
        source: include_str!("catalog/service_post.ts.tmpl"),
    },
    CatalogEntry {
        id: "service.get",
        kind: ArtifactKind::ServiceMethod,
        verb: Verb::Get,
        file: "service_get.ts.tmpl",
        source: include_str!("catalog/service_get.ts.tmpl"),
    },
    CatalogEntry {
        id: "service.put",
        kind: ArtifactKind::ServiceMethod,
        verb: Verb::Put,
        file: "service_put.ts.tmpl",
        source: include_str!("catalog/service_put.ts.tmpl"),
    },
    CatalogEntry {
        id: "service.delete",
        kind: ArtifactKind::ServiceMethod,
        verb: Verb::Delete,
        file: "service_delete.ts.tmpl",
        source: include_str!("catalog/service_delete.ts.tmpl"),
    },
    CatalogEntry {
        id: "component.list",
        kind: ArtifactKind::ListComponent,
        verb: Verb::Get,
        file: "component_list.ts.tmpl",
        source: include_str!("catalog/component_list.ts.tmpl"),
    },
    CatalogEntry {
        id: "component.create",
        kind: ArtifactKind::ModalEditComponent,
        verb: Verb::Post,
        file: "component_create.ts.tmpl",
        source: include_str!("catalog/component_create.ts.tmpl"),
    },
    CatalogEntry {
        id: "component.edit",
        kind: ArtifactKind::ModalEditComponent,
        verb: Verb::Put,
        file: "component_edit.ts.tmpl",
        source: include_str!("catalog/component_edit.ts.tmpl"),
    },
];

/// Templates keyed by artifact kind and verb
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: BTreeMap<(ArtifactKind, Verb), Template>,
}

impl TemplateStore {
    /// An empty store; see [`TemplateStore::builtin`] for the shipped catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog compiled into the binary
    pub fn builtin() -> Self {
        let mut store = Self::new();
        for entry in CATALOG {
            store.insert(entry.verb, Template::new(entry.id, entry.kind, entry.source));
        }
        store.report_defects();
        store
    }

    /// The built-in catalog with any same-named file in `dir` taking its place
    pub fn with_overrides(dir: &Path) -> Result<Self, CrudifyError> {
        if !dir.is_dir() {
            return Err(CrudifyError::Config(format!(
                "template directory {} does not exist",
                dir.display()
            )));
        }

        let mut store = Self::builtin();
        for entry in CATALOG {
            let path = dir.join(entry.file);
            if path.is_file() {
                let source = fs::read_to_string(&path)?;
                debug!(template = entry.id, path = ?path, "Overriding built-in template");
                store.insert(entry.verb, Template::new(entry.id, entry.kind, source));
            }
        }

        store.report_defects();
        info!(path = ?dir, templates = store.len(), "Template catalog loaded");
        Ok(store)
    }

    pub fn insert(&mut self, verb: Verb, template: Template) {
        self.templates.insert((template.kind(), verb), template);
    }

    pub fn with_template(mut self, verb: Verb, template: Template) -> Self {
        self.insert(verb, template);
        self
    }

    pub fn select(&self, kind: ArtifactKind, verb: Verb) -> Result<&Template, TemplateError> {
        self.templates
            .get(&(kind, verb))
            .ok_or(TemplateError::UnknownTemplate { kind, verb })
    }

    /// Artifact kinds with a template for `verb`, in a fixed order
    pub fn kinds_for(&self, verb: Verb) -> Vec<ArtifactKind> {
        self.templates
            .keys()
            .filter(|(_, v)| *v == verb)
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn report_defects(&self) {
        for template in self.templates.values() {
            if let Err(e) = template.nodes() {
                warn!(template = %template.id(), error = %e, "Template is defective and will fail every unit that selects it");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_catalog_parses() {
        let store = TemplateStore::builtin();
        assert_eq!(store.len(), CATALOG.len());
        for entry in CATALOG {
            let template = store.select(entry.kind, entry.verb).unwrap();
            assert!(template.is_valid(), "{} failed to parse: {:?}", entry.id, template.nodes());
        }
    }

    #[test]
    fn test_kinds_per_verb() {
        let store = TemplateStore::builtin();
        assert_eq!(
            store.kinds_for(Verb::Get),
            vec![
                ArtifactKind::EndpointDefinition,
                ArtifactKind::ServiceMethod,
                ArtifactKind::ListComponent
            ]
        );
        assert_eq!(
            store.kinds_for(Verb::Delete),
            vec![ArtifactKind::EndpointDefinition, ArtifactKind::ServiceMethod]
        );
        assert!(store.kinds_for(Verb::Put).contains(&ArtifactKind::ModalEditComponent));
    }

    #[test]
    fn test_missing_template() {
        let store = TemplateStore::new();
        let err = store
            .select(ArtifactKind::ListComponent, Verb::Delete)
            .unwrap_err();
        assert!(matches!(err, TemplateError::UnknownTemplate { .. }));
    }

    #[test]
    fn test_directory_overrides_builtin() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("endpoint_get.yaml.tmpl"), "custom [[table]]\n").unwrap();

        let store = TemplateStore::with_overrides(dir.path()).unwrap();
        let template = store
            .select(ArtifactKind::EndpointDefinition, Verb::Get)
            .unwrap();
        assert_eq!(template.source(), "custom [[table]]\n");
        assert_eq!(store.len(), CATALOG.len());
    }

    #[test]
    fn test_defective_override_is_kept() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("endpoint_put.yaml.tmpl"), "[[[columns]]]\n").unwrap();

        let store = TemplateStore::with_overrides(dir.path()).unwrap();
        let template = store
            .select(ArtifactKind::EndpointDefinition, Verb::Put)
            .unwrap();
        assert!(!template.is_valid());
    }

    #[test]
    fn test_missing_override_directory() {
        let err = TemplateStore::with_overrides(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, CrudifyError::Config(_)));
    }
}
