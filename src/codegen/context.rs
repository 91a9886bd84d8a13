//! Resolution context for one generation unit
//!
//! Every scalar, sequence and predicate the catalog templates use is bound
//! here. Custom templates may use any of these names.
//!
//! Root scope:
//! - scalars: `generator`, `database_type`, `database`, `table`,
//!   `module_name`, `module_url`, `verb`, `http_method`, `crud_action`,
//!   `class_name`, `file_stem`, `endpoint_url`, `auth`, plus `captcha`,
//!   `log_message`, `cache_ttl`, `cache_scope`, `cqrs_mode` and `cqrs_roles`
//!   when the matching policy is set
//! - sequences: `columns`, `primary_keys`, `joins`, `reactors`, `roles`
//! - predicates: `has_auth`, `has_captcha`, `has_log`, `has_cache`, `cqrs`,
//!   `cqrs_restricted`, `verbose`, `join`, `return_id`, `has_reactors`,
//!   `has_columns`, `has_foreign_keys`, `has_key`, `composite_key`

use crate::codegen::joins::{JoinDescriptor, JoinPlan};
use crate::codegen::naming::NamingConvention;
use crate::policy::{CqrsAuthorisation, GenerationUnit, Reactor, ResolvedPolicy, Verb};
use crate::schema::{Column, Table};
use crate::template::{ResolutionContext, Scope};

/// Value of the `generator` scalar stamped into every artifact
pub const GENERATOR: &str = concat!("crudify ", env!("CARGO_PKG_VERSION"));

/// A validated unit with everything its templates draw on
#[derive(Debug, Clone)]
pub struct UnitPlan<'a> {
    pub unit: &'a GenerationUnit,
    pub table: &'a Table,
    pub policy: ResolvedPolicy,
    /// Columns on the verb's surface, in declaration order
    pub surface: Vec<&'a Column>,
    /// Key columns, in declaration order
    pub keys: Vec<&'a Column>,
    pub joins: JoinPlan,
    pub module_name: String,
    pub module_url: String,
}

impl UnitPlan<'_> {
    pub fn file_stem(&self, naming: &NamingConvention) -> String {
        naming.file_stem(&self.table.name)
    }

    pub fn endpoint_url(&self, naming: &NamingConvention) -> String {
        format!("modules/{}/{}", self.module_url, self.file_stem(naming))
    }
}

pub fn build_context(plan: &UnitPlan<'_>, naming: &NamingConvention) -> ResolutionContext {
    let unit = plan.unit;
    let policy = &plan.policy;
    let verb = unit.verb;

    let mut root = Scope::new()
        .scalar("generator", GENERATOR)
        .scalar("database_type", unit.database_type.as_str())
        .scalar("database", unit.database.as_str())
        .scalar("table", plan.table.name.as_str())
        .scalar("module_name", plan.module_name.as_str())
        .scalar("module_url", plan.module_url.as_str())
        .scalar("verb", verb.as_str())
        .scalar("http_method", verb.http_method())
        .scalar("crud_action", verb.crud_action())
        .scalar("class_name", naming.class_name(&plan.table.name))
        .scalar("file_stem", plan.file_stem(naming))
        .scalar("endpoint_url", plan.endpoint_url(naming))
        .scalar("auth", policy.auth.join(","));

    root.set_predicate("has_auth", !policy.auth.is_empty());
    root.set_sequence("roles", policy.auth.iter().map(|r| role_scope(r)).collect());

    root.set_predicate("has_captcha", policy.captcha.is_some());
    if let Some(score) = policy.captcha {
        root.set_scalar("captcha", score.to_string());
    }

    root.set_predicate("has_log", policy.log.is_some());
    if let Some(message) = &policy.log {
        root.set_scalar("log_message", message.as_str());
    }

    root.set_predicate("has_cache", policy.cache.is_some());
    if let Some(cache) = &policy.cache {
        root.set_scalar("cache_ttl", cache.ttl_seconds.to_string());
        root.set_scalar("cache_scope", if cache.public { "public" } else { "private" });
    }

    root.set_predicate("cqrs", policy.cqrs.is_some());
    let cqrs_roles = policy.cqrs_roles().unwrap_or_default();
    root.set_predicate("cqrs_restricted", !cqrs_roles.is_empty());
    if let Some(cqrs) = &policy.cqrs {
        let mode = match cqrs.authorisation {
            CqrsAuthorisation::None => "none",
            CqrsAuthorisation::Inherited => "inherited",
            CqrsAuthorisation::Roles { .. } => "roles",
        };
        root.set_scalar("cqrs_mode", mode);
        if !cqrs_roles.is_empty() {
            root.set_scalar("cqrs_roles", cqrs_roles.join(","));
        }
    }

    root.set_predicate("has_reactors", !policy.reactors.is_empty());
    root.set_sequence("reactors", policy.reactors.iter().map(reactor_scope).collect());

    let joins_on = unit.join && !plan.joins.is_empty();
    root.set_predicate("join", joins_on);
    root.set_sequence(
        "joins",
        if joins_on {
            plan.joins.joins.iter().map(join_scope).collect()
        } else {
            Vec::new()
        },
    );

    root.set_sequence(
        "columns",
        plan.surface
            .iter()
            .map(|c| column_scope(c, verb, Some(&plan.joins)))
            .collect(),
    );
    root.set_sequence(
        "primary_keys",
        plan.keys.iter().map(|c| column_scope(c, verb, None)).collect(),
    );

    root.set_predicate("verbose", unit.verbose);
    root.set_predicate("return_id", unit.return_id && verb == Verb::Post);
    root.set_predicate("has_columns", !plan.surface.is_empty());
    root.set_predicate("has_foreign_keys", !plan.table.foreign_keys.is_empty());
    root.set_predicate("has_key", !plan.keys.is_empty());
    root.set_predicate("composite_key", plan.keys.len() > 1);

    ResolutionContext::new(naming.clone(), root)
}

fn column_scope(column: &Column, verb: Verb, lookups: Option<&JoinPlan>) -> Scope {
    let logical = column.logical();
    let required = match verb {
        Verb::Post => column.is_required_on_create(),
        _ => !column.nullable,
    };
    let lookup = lookups
        .and_then(|plan| plan.for_column(&column.name))
        .map(join_scope)
        .into_iter()
        .collect();

    Scope::new()
        .scalar("column", column.name.as_str())
        .scalar("column_type", column.db_type.as_str())
        .scalar("column_logical", logical.as_str())
        .scalar("column_ts_type", logical.ts_type())
        .scalar("column_control", logical.form_control())
        .scalar("column_nullable", column.nullable.to_string())
        .scalar("column_required", required.to_string())
        .scalar("column_optional", if required { "" } else { "?" })
        .scalar(
            "column_special",
            column.special.map_or("none", |special| special.as_str()),
        )
        .sequence("column_lookup", lookup)
}

fn join_scope(join: &JoinDescriptor) -> Scope {
    let label = if join.has_distinct_label() {
        vec![Scope::new()
            .scalar("join_label_column", join.label_column.as_str())
            .scalar("join_label_alias", join.label_alias.as_str())]
    } else {
        Vec::new()
    };

    Scope::new()
        .scalar("join_column", join.column.as_str())
        .scalar("join_table", join.referenced_table.as_str())
        .scalar("join_table_alias", join.table_alias.as_str())
        .scalar("join_referenced_column", join.referenced_column.as_str())
        .scalar("join_alias", join.alias.as_str())
        .scalar("join_display_column", join.label_column.as_str())
        .scalar("join_kind", join.selector.as_str())
        .sequence("join_label", label)
}

fn reactor_scope(reactor: &Reactor) -> Scope {
    Scope::new()
        .scalar("reactor", reactor.to_string())
        .scalar("reactor_kind", reactor.kind.as_str())
        .scalar("reactor_name", reactor.name.as_str())
        .scalar("reactor_column", reactor.column.as_deref().unwrap_or(""))
}

fn role_scope(role: &str) -> Scope {
    Scope::new().scalar("role", role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::joins::resolve_joins;
    use crate::policy::{CachePolicy, CqrsPolicy, DatabaseType, Policy};
    use crate::schema::{Database, ForeignKey};

    fn database() -> Database {
        Database {
            name: "crm".to_string(),
            tables: vec![
                Table::new(
                    "customers",
                    vec![
                        Column::new("id", "int").primary().automatic(),
                        Column::new("name", "varchar(100)"),
                    ],
                ),
                Table::new(
                    "invoices",
                    vec![
                        Column::new("id", "int").primary().automatic(),
                        Column::new("customer_id", "int"),
                        Column::new("amount", "decimal(10,2)").nullable(),
                    ],
                )
                .with_foreign_key(ForeignKey::new("customer_id", "customers", "id").with_label("name")),
            ],
        }
    }

    fn plan<'a>(unit: &'a GenerationUnit, table: &'a Table, joins: JoinPlan) -> UnitPlan<'a> {
        UnitPlan {
            unit,
            table,
            policy: unit.policy.resolve(&table.policy, unit.verb),
            surface: table.columns_for(unit.verb),
            keys: table.primary_key_columns(),
            joins,
            module_name: unit.module_name.clone(),
            module_url: unit.module_url.clone(),
        }
    }

    #[test]
    fn test_root_scalars() {
        let db = database();
        let table = db.table("invoices").unwrap();
        let unit = GenerationUnit::new(DatabaseType::Mysql, "crm", "invoices", Verb::Get);
        let ctx = build_context(&plan(&unit, table, JoinPlan::default()), &NamingConvention::default());

        let root = ctx.root();
        assert_eq!(root.get_scalar("class_name"), Some("Invoice"));
        assert_eq!(root.get_scalar("endpoint_url"), Some("modules/crm/invoices"));
        assert_eq!(root.get_scalar("http_method"), Some("GET"));
        assert_eq!(root.get_scalar("generator"), Some(GENERATOR));
        assert_eq!(root.get_predicate("has_auth"), Some(false));
        assert_eq!(root.get_predicate("join"), Some(false));
        assert!(root.get_scalar("cache_ttl").is_none());
    }

    #[test]
    fn test_column_bindings_follow_verb() {
        let db = database();
        let table = db.table("invoices").unwrap();
        let unit = GenerationUnit::new(DatabaseType::Mysql, "crm", "invoices", Verb::Post);
        let ctx = build_context(&plan(&unit, table, JoinPlan::default()), &NamingConvention::default());

        let columns = ctx.root().get_sequence("columns").unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.get_scalar("column").unwrap()).collect();
        assert_eq!(names, vec!["customer_id", "amount"]);
        assert_eq!(columns[0].get_scalar("column_required"), Some("true"));
        assert_eq!(columns[1].get_scalar("column_optional"), Some("?"));
        assert_eq!(columns[1].get_scalar("column_logical"), Some("decimal"));
        assert_eq!(columns[0].get_sequence("column_lookup").unwrap().len(), 0);
    }

    #[test]
    fn test_join_bindings() {
        let db = database();
        let table = db.table("invoices").unwrap();
        let mut unit = GenerationUnit::new(DatabaseType::Mysql, "crm", "invoices", Verb::Get);
        unit.join = true;
        let joins = resolve_joins(table, &db).unwrap();
        let ctx = build_context(&plan(&unit, table, joins), &NamingConvention::default());

        let root = ctx.root();
        assert_eq!(root.get_predicate("join"), Some(true));
        let join = &root.get_sequence("joins").unwrap()[0];
        assert_eq!(join.get_scalar("join_alias"), Some("customer_id_id"));
        assert_eq!(join.get_scalar("join_display_column"), Some("name"));
        let label = &join.get_sequence("join_label").unwrap()[0];
        assert_eq!(label.get_scalar("join_label_alias"), Some("customer_id_name"));

        let columns = root.get_sequence("columns").unwrap();
        assert_eq!(columns[1].get_sequence("column_lookup").unwrap().len(), 1);
    }

    #[test]
    fn test_lookups_bound_without_join() {
        let db = database();
        let table = db.table("invoices").unwrap();
        let unit = GenerationUnit::new(DatabaseType::Mysql, "crm", "invoices", Verb::Put);
        let joins = resolve_joins(table, &db).unwrap();
        let ctx = build_context(&plan(&unit, table, joins), &NamingConvention::default());

        let root = ctx.root();
        assert_eq!(root.get_predicate("join"), Some(false));
        assert!(root.get_sequence("joins").unwrap().is_empty());
        let columns = root.get_sequence("columns").unwrap();
        let lookup = &columns[0].get_sequence("column_lookup").unwrap()[0];
        assert_eq!(lookup.get_scalar("join_table"), Some("customers"));
    }

    #[test]
    fn test_policy_bindings() {
        let db = database();
        let table = db.table("invoices").unwrap();
        let mut unit = GenerationUnit::new(DatabaseType::Pgsql, "crm", "invoices", Verb::Get);
        unit.policy = Policy {
            auth: Some(vec!["admin".to_string(), "billing".to_string()]),
            cache: Some(CachePolicy {
                ttl_seconds: 60,
                public: true,
            }),
            cqrs: Some(CqrsPolicy {
                authorisation: CqrsAuthorisation::Inherited,
            }),
            ..Policy::default()
        };
        let ctx = build_context(&plan(&unit, table, JoinPlan::default()), &NamingConvention::default());

        let root = ctx.root();
        assert_eq!(root.get_scalar("auth"), Some("admin,billing"));
        assert_eq!(root.get_sequence("roles").unwrap().len(), 2);
        assert_eq!(root.get_scalar("cache_ttl"), Some("60"));
        assert_eq!(root.get_scalar("cache_scope"), Some("public"));
        assert_eq!(root.get_scalar("cqrs_mode"), Some("inherited"));
        assert_eq!(root.get_scalar("cqrs_roles"), Some("admin,billing"));
        assert_eq!(root.get_predicate("cqrs_restricted"), Some(true));
    }
}
