//! Endpoint synthesis for one generation unit

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::codegen::context::{build_context, UnitPlan};
use crate::codegen::joins::{resolve_joins, JoinPlan};
use crate::codegen::naming::NamingConvention;
use crate::error::CrudifyError;
use crate::persist::ArtifactStore;
use crate::policy::{is_identifier, is_module_name, is_module_url, GenerationUnit, UnitKey, Verb};
use crate::schema::{Column, Database, Schema, Table};
use crate::template::{resolve, ArtifactKind, TemplateStore};

/// Outcome of one successful unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub unit: UnitKey,
    /// Newlines across every emitted artifact
    pub lines_of_code: usize,
    pub artifact_paths: Vec<String>,
}

/// Turns generation units into artifacts
///
/// Holds only shared read-only inputs, so clones are cheap and may run on
/// any number of threads at once.
#[derive(Clone)]
pub struct EndpointSynthesizer {
    schema: Arc<Schema>,
    templates: Arc<TemplateStore>,
    store: Arc<dyn ArtifactStore>,
    naming: NamingConvention,
}

impl EndpointSynthesizer {
    pub fn new(
        schema: Arc<Schema>,
        templates: Arc<TemplateStore>,
        store: Arc<dyn ArtifactStore>,
        naming: NamingConvention,
    ) -> Self {
        Self {
            schema,
            templates,
            store,
            naming,
        }
    }

    /// Validate, resolve and write every artifact of `unit`
    ///
    /// Nothing is written unless every template resolves, and with
    /// `overwrite == false` unless every target path is free.
    pub fn synthesize(&self, unit: &GenerationUnit) -> Result<GenerationResult, CrudifyError> {
        let key = unit.key();
        debug!(unit = %key, "Synthesizing unit");

        let plan = self.plan(unit)?;
        let context = build_context(&plan, &self.naming);
        let stem = plan.file_stem(&self.naming);

        let mut rendered = Vec::new();
        for kind in self.templates.kinds_for(unit.verb) {
            let template = self
                .templates
                .select(kind, unit.verb)
                .map_err(|source| CrudifyError::TemplateResolution {
                    template: format!("{}.{}", kind, unit.verb),
                    source,
                })?;
            let text = resolve(template, &context).map_err(|source| CrudifyError::TemplateResolution {
                template: template.id().to_string(),
                source,
            })?;
            let path = artifact_path(kind, unit.verb, &plan.module_url, &stem);
            trace!(unit = %key, template = %template.id(), path = %path, "Resolved template");
            rendered.push((path, text));
        }

        if !unit.overwrite {
            for (path, _) in &rendered {
                if self.store.exists(path)? {
                    return Err(CrudifyError::ArtifactExists { path: path.clone() });
                }
            }
        }

        let mut lines_of_code = 0;
        let mut artifact_paths = Vec::with_capacity(rendered.len());
        for (path, text) in rendered {
            self.store.write_artifact(&path, &text, unit.overwrite)?;
            lines_of_code += text.matches('\n').count();
            artifact_paths.push(path);
        }

        info!(
            unit = %key,
            artifacts = artifact_paths.len(),
            lines_of_code = lines_of_code,
            "Unit generated"
        );

        Ok(GenerationResult {
            unit: key,
            lines_of_code,
            artifact_paths,
        })
    }

    fn plan<'a>(&'a self, unit: &'a GenerationUnit) -> Result<UnitPlan<'a>, CrudifyError> {
        let target = unit.key().to_string();

        if !is_identifier(&unit.database) {
            return Err(CrudifyError::validation(
                &target,
                format!("'{}' is not a valid database name", unit.database),
            ));
        }
        if !is_identifier(&unit.table) {
            return Err(CrudifyError::validation(
                &target,
                format!("'{}' is not a valid table name", unit.table),
            ));
        }

        let database = self.schema.database(&unit.database).ok_or_else(|| {
            CrudifyError::validation(&target, format!("database '{}' is not in the schema snapshot", unit.database))
        })?;
        let table = database.table(&unit.table).ok_or_else(|| {
            CrudifyError::validation(
                &target,
                format!("table '{}' is not in database '{}'", unit.table, unit.database),
            )
        })?;

        let (module_name, module_url) = module_identity(unit, table, database);
        if !is_module_name(&module_name) {
            return Err(CrudifyError::validation(
                &target,
                format!("'{}' is not a valid module name", module_name),
            ));
        }
        if !is_module_url(&module_url) {
            return Err(CrudifyError::validation(
                &target,
                format!("'{}' is not a valid module URL", module_url),
            ));
        }

        let keys = select_keys(&target, unit, table)?;
        let surface = select_surface(&target, unit, table, &keys)?;
        check_verb(&target, unit, &surface, &keys)?;

        let policy = unit.policy.resolve(&table.policy, unit.verb);
        policy.validate(&target, unit.verb, table)?;

        // Foreign keys are checked for every verb that renders them; `join`
        // only decides whether the query joins them in.
        let joins = if unit.verb == Verb::Delete {
            JoinPlan::default()
        } else {
            resolve_joins(table, database)?
        };

        Ok(UnitPlan {
            unit,
            table,
            policy,
            surface,
            keys,
            joins,
            module_name,
            module_url,
        })
    }
}

/// Store path of one artifact
pub fn artifact_path(kind: ArtifactKind, verb: Verb, module_url: &str, stem: &str) -> String {
    match kind {
        ArtifactKind::EndpointDefinition => {
            format!("backend/{}/{}.{}.endpoint.yaml", module_url, stem, verb)
        }
        ArtifactKind::ServiceMethod => {
            format!("frontend/{}/{}/{}.{}.service.ts", module_url, stem, stem, verb)
        }
        ArtifactKind::ListComponent => {
            format!("frontend/{}/{}/{}-list.component.ts", module_url, stem, stem)
        }
        ArtifactKind::ModalEditComponent => {
            let mode = if verb == Verb::Post { "create" } else { "edit" };
            format!("frontend/{}/{}/{}-{}.component.ts", module_url, stem, stem, mode)
        }
    }
}

fn module_identity(unit: &GenerationUnit, table: &Table, database: &Database) -> (String, String) {
    let pick = |requested: &str, table_default: &Option<String>| {
        if !requested.is_empty() {
            requested.to_string()
        } else {
            table_default.clone().unwrap_or_else(|| database.name.clone())
        }
    };
    (
        pick(&unit.module_name, &table.module_name),
        pick(&unit.module_url, &table.module_url),
    )
}

fn select_keys<'a>(
    target: &str,
    unit: &GenerationUnit,
    table: &'a Table,
) -> Result<Vec<&'a Column>, CrudifyError> {
    let keys = table.primary_key_columns();
    let Some(requested) = &unit.selection.primary else {
        return Ok(keys);
    };

    for name in requested {
        if !keys.iter().any(|c| &c.name == name) {
            return Err(CrudifyError::validation(
                target,
                format!("'{}' is not a primary key column of '{}'", name, table.name),
            ));
        }
    }
    Ok(keys
        .into_iter()
        .filter(|c| requested.contains(&c.name))
        .collect())
}

fn select_surface<'a>(
    target: &str,
    unit: &GenerationUnit,
    table: &'a Table,
    keys: &[&'a Column],
) -> Result<Vec<&'a Column>, CrudifyError> {
    let mut surface = table.columns_for(unit.verb);
    if unit.verb == Verb::Delete {
        surface.retain(|c| keys.iter().any(|k| k.name == c.name));
    }

    let Some(requested) = &unit.selection.columns else {
        return Ok(surface);
    };

    if requested.is_empty() {
        return Err(CrudifyError::validation(target, "column selection is empty"));
    }
    for name in requested {
        if table.column(name).is_none() {
            return Err(CrudifyError::validation(
                target,
                format!("column '{}' does not exist on '{}'", name, table.name),
            ));
        }
        if !surface.iter().any(|c| &c.name == name) {
            return Err(CrudifyError::validation(
                target,
                format!("column '{}' is not exposed on '{}'", name, unit.verb),
            ));
        }
    }
    surface.retain(|c| requested.contains(&c.name));
    Ok(surface)
}

fn check_verb(
    target: &str,
    unit: &GenerationUnit,
    surface: &[&Column],
    keys: &[&Column],
) -> Result<(), CrudifyError> {
    let problem = match unit.verb {
        Verb::Put if keys.is_empty() => Some("update needs a primary key"),
        Verb::Put if surface.is_empty() => Some("update has no non-key columns to set"),
        Verb::Delete if surface.is_empty() => Some("delete needs an exposed primary key"),
        Verb::Post if surface.is_empty() => Some("create has no input columns"),
        Verb::Post if unit.return_id && keys.is_empty() => Some("returnId needs a primary key"),
        Verb::Get if surface.is_empty() => Some("read has no output columns"),
        _ => None,
    };
    match problem {
        Some(message) => Err(CrudifyError::validation(target, message)),
        None => Ok(()),
    }
}
