//! Foreign-key join planning
//!
//! Joins reach exactly one hop from the table being generated. A referenced
//! table's own foreign keys are never followed, so cyclic references between
//! tables cannot grow the plan.

use tracing::{debug, trace};

use crate::error::CrudifyError;
use crate::schema::{Database, ForeignKey, Table};

/// How a lookup selector is rendered on the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    /// Search-as-you-type list
    Long,
    /// Bounded dropdown
    Short,
}

impl SelectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

/// One resolved foreign-key join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDescriptor {
    /// Foreign-key column on the generated table
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    /// Alias of the joined table in generated queries
    pub table_alias: String,
    /// `<fk-column>_<referenced-column>`
    pub alias: String,
    /// Column surfaced to list views and lookup selectors
    pub label_column: String,
    /// `<fk-column>_<label-column>`
    pub label_alias: String,
    pub selector: SelectorKind,
}

impl JoinDescriptor {
    /// Whether the label is a separate column from the joined key
    pub fn has_distinct_label(&self) -> bool {
        self.label_column != self.referenced_column
    }
}

/// Joins needed for one table, in foreign-key declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinPlan {
    pub joins: Vec<JoinDescriptor>,
}

impl JoinPlan {
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn for_column(&self, column: &str) -> Option<&JoinDescriptor> {
        self.joins.iter().find(|j| j.column == column)
    }
}

/// Resolve every foreign key of `table` against `database`
pub fn resolve_joins(table: &Table, database: &Database) -> Result<JoinPlan, CrudifyError> {
    let mut joins = Vec::with_capacity(table.foreign_keys.len());

    for fk in &table.foreign_keys {
        let unresolved = |column: &str| CrudifyError::UnresolvedForeignKey {
            table: table.name.clone(),
            column: fk.column.clone(),
            referenced_table: fk.referenced_table.clone(),
            referenced_column: column.to_string(),
        };

        let referenced = database
            .table(&fk.referenced_table)
            .ok_or_else(|| unresolved(&fk.referenced_column))?;
        if referenced.column(&fk.referenced_column).is_none() {
            return Err(unresolved(&fk.referenced_column));
        }
        if referenced.column(fk.label()).is_none() {
            return Err(unresolved(fk.label()));
        }

        let descriptor = describe(fk);
        trace!(
            table = ?table.name,
            column = ?descriptor.column,
            alias = ?descriptor.alias,
            selector = descriptor.selector.as_str(),
            "Resolved foreign key"
        );
        joins.push(descriptor);
    }

    debug!(table = ?table.name, joins = joins.len(), "Join plan ready");
    Ok(JoinPlan { joins })
}

fn describe(fk: &ForeignKey) -> JoinDescriptor {
    let label_column = fk.label().to_string();
    JoinDescriptor {
        column: fk.column.clone(),
        referenced_table: fk.referenced_table.clone(),
        referenced_column: fk.referenced_column.clone(),
        table_alias: format!("{}_ref", fk.column),
        alias: format!("{}_{}", fk.column, fk.referenced_column),
        label_alias: format!("{}_{}", fk.column, label_column),
        label_column,
        selector: if fk.long {
            SelectorKind::Long
        } else {
            SelectorKind::Short
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn crm() -> Database {
        Database {
            name: "crm".to_string(),
            tables: vec![
                Table::new(
                    "customers",
                    vec![
                        Column::new("id", "int").primary().automatic(),
                        Column::new("name", "varchar(100)"),
                        Column::new("referrer_id", "int").nullable(),
                    ],
                )
                .with_foreign_key(ForeignKey::new("referrer_id", "customers", "id")),
                Table::new(
                    "invoices",
                    vec![
                        Column::new("id", "int").primary().automatic(),
                        Column::new("customer_id", "int"),
                        Column::new("amount", "decimal(10,2)"),
                    ],
                )
                .with_foreign_key(ForeignKey::new("customer_id", "customers", "id").with_label("name").long()),
            ],
        }
    }

    #[test]
    fn test_alias_scheme() {
        let db = crm();
        let plan = resolve_joins(db.table("invoices").unwrap(), &db).unwrap();

        assert_eq!(plan.joins.len(), 1);
        let join = &plan.joins[0];
        assert_eq!(join.alias, "customer_id_id");
        assert_eq!(join.label_alias, "customer_id_name");
        assert_eq!(join.table_alias, "customer_id_ref");
        assert_eq!(join.selector, SelectorKind::Long);
        assert!(join.has_distinct_label());
    }

    #[test]
    fn test_one_hop_only() {
        let db = crm();
        let plan = resolve_joins(db.table("invoices").unwrap(), &db).unwrap();
        assert!(plan.joins.iter().all(|j| j.column != "referrer_id"));
    }

    #[test]
    fn test_self_reference_is_bounded() {
        let db = crm();
        let plan = resolve_joins(db.table("customers").unwrap(), &db).unwrap();
        assert_eq!(plan.joins.len(), 1);
        assert_eq!(plan.joins[0].alias, "referrer_id_id");
        assert_eq!(plan.joins[0].selector, SelectorKind::Short);
        assert!(!plan.joins[0].has_distinct_label());
    }

    #[test]
    fn test_missing_referenced_table() {
        let db = crm();
        let orphan = Table::new("payments", vec![Column::new("invoice_id", "int")])
            .with_foreign_key(ForeignKey::new("invoice_id", "ledgers", "id"));

        let err = resolve_joins(&orphan, &db).unwrap_err();
        assert!(matches!(
            err,
            CrudifyError::UnresolvedForeignKey { ref referenced_table, .. } if referenced_table == "ledgers"
        ));
    }

    #[test]
    fn test_missing_label_column() {
        let db = crm();
        let table = Table::new("notes", vec![Column::new("customer_id", "int")])
            .with_foreign_key(ForeignKey::new("customer_id", "customers", "id").with_label("nickname"));

        let err = resolve_joins(&table, &db).unwrap_err();
        assert!(err.to_string().contains("nickname"));
    }

    #[test]
    fn test_no_foreign_keys_is_empty_plan() {
        let db = crm();
        let table = Table::new("tags", vec![Column::new("label", "text").primary()]);
        assert!(resolve_joins(&table, &db).unwrap().is_empty());
    }
}
