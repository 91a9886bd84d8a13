//! Schema data structures
//!
//! These types represent the relational schema snapshot and form the contract
//! between introspection (produces) and code generation (consumes). A
//! snapshot is validated once when it is built and is read-only afterwards.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::CrudifyError;
use crate::policy::{TablePolicy, Verb};

/// A validated snapshot of every database visible to one connection
#[derive(Debug, Clone, Default, Serialize)]
pub struct Schema {
    databases: Vec<Database>,
}

impl Schema {
    /// Build a snapshot, checking every database, table and column invariant
    pub fn new(databases: Vec<Database>) -> Result<Self, CrudifyError> {
        let mut seen = HashSet::new();
        for database in &databases {
            if !seen.insert(database.name.as_str()) {
                return Err(CrudifyError::validation(
                    &database.name,
                    "database appears more than once in the snapshot",
                ));
            }
            database.validate()?;
        }

        debug!(databases = databases.len(), "Schema snapshot validated");
        Ok(Self { databases })
    }

    pub fn databases(&self) -> &[Database] {
        &self.databases
    }

    pub fn database(&self, name: &str) -> Option<&Database> {
        self.databases.iter().find(|db| db.name == name)
    }
}

/// A database and its tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl Database {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Table names are unique and every table is internally consistent
    pub fn validate(&self) -> Result<(), CrudifyError> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(CrudifyError::validation(
                    format!("{}.{}", self.name, table.name),
                    "table name is not unique within its database",
                ));
            }
            table.validate(&self.name)?;
        }
        trace!(database = ?self.name, tables = self.tables.len(), "Database validated");
        Ok(())
    }
}

/// Database table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Overrides the module name used for generated artifacts
    #[serde(default)]
    pub module_name: Option<String>,
    /// Overrides the module URL used for generated artifacts
    #[serde(default)]
    pub module_url: Option<String>,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// Default generation policy, used where a request leaves a field unset
    #[serde(default)]
    pub policy: TablePolicy,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            module_name: None,
            module_url: None,
            columns,
            foreign_keys: Vec::new(),
            policy: TablePolicy::default(),
        }
    }

    pub fn with_foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get primary key columns in declaration order
    pub fn primary_key_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary).collect()
    }

    /// Columns on the request/response surface of `verb`, in declaration order
    ///
    /// - `post`: columns flagged `post`, never an automatic primary key
    /// - `get`: columns flagged `get`, never a hashed password
    /// - `put`: non-key columns flagged `put` (the update set)
    /// - `delete`: primary-key columns flagged `delete`
    pub fn columns_for(&self, verb: Verb) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.is_exposed(verb))
            .filter(|c| match verb {
                Verb::Post => true,
                Verb::Get => c.special != Some(SpecialHandling::PasswordHash),
                Verb::Put => !c.primary,
                Verb::Delete => c.primary,
            })
            .collect()
    }

    fn validate(&self, database: &str) -> Result<(), CrudifyError> {
        let target = format!("{}.{}", database, self.name);

        if self.columns.is_empty() {
            return Err(CrudifyError::validation(target, "table has no columns"));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(CrudifyError::validation(
                    target,
                    format!("column '{}' is declared more than once", column.name),
                ));
            }
        }

        for fk in &self.foreign_keys {
            if self.column(&fk.column).is_none() {
                return Err(CrudifyError::validation(
                    target,
                    format!("foreign key source column '{}' does not exist", fk.column),
                ));
            }
        }

        Ok(())
    }
}

/// A table column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Type as reported by the database, e.g. `varchar(255)`
    #[serde(rename = "type")]
    pub db_type: String,
    /// Explicit logical type; derived from `db_type` when absent
    #[serde(default)]
    pub logical_type: Option<LogicalType>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary: bool,
    /// Column has a server-side default (DEFAULT value, NOW(), etc.)
    #[serde(default)]
    pub has_default: bool,
    /// Column is generated by the server (SERIAL, IDENTITY, AUTO_INCREMENT)
    #[serde(default)]
    pub automatic: bool,
    #[serde(default)]
    pub exposure: Exposure,
    #[serde(default)]
    pub special: Option<SpecialHandling>,
}

impl Column {
    pub fn new(name: impl Into<String>, db_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_type: db_type.into(),
            logical_type: None,
            nullable: false,
            primary: false,
            has_default: false,
            automatic: false,
            exposure: Exposure::default(),
            special: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Server-generated value; implies a default
    pub fn automatic(mut self) -> Self {
        self.automatic = true;
        self.has_default = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn with_exposure(mut self, exposure: Exposure) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn with_special(mut self, special: SpecialHandling) -> Self {
        self.special = Some(special);
        self
    }

    pub fn logical(&self) -> LogicalType {
        self.logical_type
            .unwrap_or_else(|| LogicalType::from_db_type(&self.db_type))
    }

    /// Whether the column is on `verb`'s surface at all
    ///
    /// An automatic primary key is never accepted as `post` input, whatever
    /// its flags say.
    pub fn is_exposed(&self, verb: Verb) -> bool {
        if verb == Verb::Post && self.primary && self.automatic {
            return false;
        }
        self.exposure.allows(verb)
    }

    /// Whether a create request must supply a value
    pub fn is_required_on_create(&self) -> bool {
        !self.nullable && !self.has_default
    }
}

/// Per-verb inclusion flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Exposure {
    pub post: bool,
    pub get: bool,
    pub put: bool,
    pub delete: bool,
}

impl Default for Exposure {
    fn default() -> Self {
        Self {
            post: true,
            get: true,
            put: true,
            delete: true,
        }
    }
}

impl Exposure {
    pub fn none() -> Self {
        Self {
            post: false,
            get: false,
            put: false,
            delete: false,
        }
    }

    pub fn allows(&self, verb: Verb) -> bool {
        match verb {
            Verb::Post => self.post,
            Verb::Get => self.get,
            Verb::Put => self.put,
            Verb::Delete => self.delete,
        }
    }
}

/// Columns that need server-side treatment before they are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialHandling {
    /// Hashed on write, never returned on read
    PasswordHash,
    /// Encrypted on write, decrypted on read
    Encrypt,
}

impl SpecialHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PasswordHash => "password_hash",
            Self::Encrypt => "encrypt",
        }
    }
}

/// A reference from one column to a column of another table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    /// Column shown in lookup selectors; the referenced column when absent
    #[serde(default)]
    pub label_column: Option<String>,
    /// Render as a searchable list instead of a bounded dropdown
    #[serde(default)]
    pub long: bool,
}

impl ForeignKey {
    pub fn new(
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            referenced_table: referenced_table.into(),
            referenced_column: referenced_column.into(),
            label_column: None,
            long: false,
        }
    }

    pub fn with_label(mut self, label_column: impl Into<String>) -> Self {
        self.label_column = Some(label_column.into());
        self
    }

    pub fn long(mut self) -> Self {
        self.long = true;
        self
    }

    pub fn label(&self) -> &str {
        self.label_column
            .as_deref()
            .unwrap_or(&self.referenced_column)
    }
}

/// Dialect-independent column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    Integer,
    Decimal,
    Boolean,
    Text,
    Date,
    DateTime,
    Time,
    Uuid,
    Json,
    Binary,
    Other,
}

impl LogicalType {
    /// Map a dialect type string (MySQL, PostgreSQL, SQL Server, SQLite)
    pub fn from_db_type(type_str: &str) -> Self {
        let lower = type_str.to_lowercase();
        let trimmed = lower.trim();

        // MySQL booleans are tinyint(1)
        if trimmed == "tinyint(1)" || trimmed == "bit" || trimmed == "bit(1)" {
            return Self::Boolean;
        }

        let base = trimmed
            .split('(')
            .next()
            .unwrap_or(trimmed)
            .trim()
            .trim_end_matches(" unsigned");

        if base.starts_with("timestamp") || base.starts_with("datetime") {
            return Self::DateTime;
        }
        if base.starts_with("time") {
            return Self::Time;
        }
        if base.starts_with("character varying") || base.starts_with("character") {
            return Self::Text;
        }

        match base {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int2"
            | "int4" | "int8" | "serial" | "bigserial" | "smallserial" => Self::Integer,
            "numeric" | "decimal" | "real" | "float" | "float4" | "float8" | "double"
            | "double precision" | "money" | "smallmoney" => Self::Decimal,
            "boolean" | "bool" => Self::Boolean,
            "text" | "varchar" | "nvarchar" | "char" | "nchar" | "ntext" | "tinytext"
            | "mediumtext" | "longtext" | "citext" | "enum" => Self::Text,
            "date" => Self::Date,
            "uuid" | "uniqueidentifier" => Self::Uuid,
            "json" | "jsonb" => Self::Json,
            "bytea" | "blob" | "binary" | "varbinary" | "image" | "tinyblob" | "mediumblob"
            | "longblob" => Self::Binary,
            _ => Self::Other,
        }
    }

    /// TypeScript type used by client components
    pub fn ts_type(&self) -> &'static str {
        match self {
            Self::Integer | Self::Decimal => "number",
            Self::Boolean => "boolean",
            Self::Date | Self::DateTime => "Date",
            Self::Json => "unknown",
            Self::Text | Self::Time | Self::Uuid | Self::Binary | Self::Other => "string",
        }
    }

    /// Form control used by edit components
    pub fn form_control(&self) -> &'static str {
        match self {
            Self::Integer | Self::Decimal => "number",
            Self::Boolean => "checkbox",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Time => "time",
            Self::Json => "json",
            Self::Text | Self::Uuid | Self::Binary | Self::Other => "text",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Time => "time",
            Self::Uuid => "uuid",
            Self::Json => "json",
            Self::Binary => "binary",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Singular form of a snake_case name (basic heuristic)
pub fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        format!("{}y", stem)
    } else if name.ends_with('s') && !name.ends_with("ss") {
        name[..name.len() - 1].to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoices() -> Table {
        Table::new(
            "invoices",
            vec![
                Column::new("id", "int").primary().automatic(),
                Column::new("customer_id", "int"),
                Column::new("amount", "decimal(10,2)"),
                Column::new("password", "varchar(255)").with_special(SpecialHandling::PasswordHash),
            ],
        )
        .with_foreign_key(ForeignKey::new("customer_id", "customers", "id"))
    }

    fn names(columns: Vec<&Column>) -> Vec<&str> {
        columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("staff"), "staff");
        assert_eq!(singularize("address"), "address");
    }

    #[test]
    fn test_automatic_pk_never_on_post() {
        let table = invoices();
        assert_eq!(
            names(table.columns_for(Verb::Post)),
            vec!["customer_id", "amount", "password"]
        );
    }

    #[test]
    fn test_get_hides_password_hashes() {
        let table = invoices();
        assert_eq!(
            names(table.columns_for(Verb::Get)),
            vec!["id", "customer_id", "amount"]
        );
    }

    #[test]
    fn test_put_and_delete_surfaces() {
        let table = invoices();
        assert_eq!(
            names(table.columns_for(Verb::Put)),
            vec!["customer_id", "amount", "password"]
        );
        assert_eq!(names(table.columns_for(Verb::Delete)), vec!["id"]);
    }

    #[test]
    fn test_exposure_flags_respected() {
        let table = Table::new(
            "notes",
            vec![
                Column::new("id", "uuid").primary(),
                Column::new("body", "text").with_exposure(Exposure {
                    put: false,
                    ..Exposure::default()
                }),
            ],
        );
        assert!(table.columns_for(Verb::Put).is_empty());
        assert_eq!(names(table.columns_for(Verb::Post)), vec!["id", "body"]);
    }

    #[test]
    fn test_duplicate_tables_rejected() {
        let db = Database {
            name: "crm".to_string(),
            tables: vec![invoices(), invoices()],
        };
        let err = db.validate().unwrap_err();
        assert!(err.to_string().contains("not unique"));
    }

    #[test]
    fn test_foreign_key_source_must_exist() {
        let table = Table::new("orders", vec![Column::new("id", "int").primary()])
            .with_foreign_key(ForeignKey::new("customer_id", "customers", "id"));
        let err = Schema::new(vec![Database {
            name: "crm".to_string(),
            tables: vec![table],
        }])
        .unwrap_err();
        assert!(err.to_string().contains("customer_id"));
    }

    #[test]
    fn test_logical_types() {
        assert_eq!(LogicalType::from_db_type("int(11)"), LogicalType::Integer);
        assert_eq!(LogicalType::from_db_type("bigint unsigned"), LogicalType::Integer);
        assert_eq!(LogicalType::from_db_type("tinyint(1)"), LogicalType::Boolean);
        assert_eq!(LogicalType::from_db_type("character varying(100)"), LogicalType::Text);
        assert_eq!(LogicalType::from_db_type("nvarchar(max)"), LogicalType::Text);
        assert_eq!(LogicalType::from_db_type("numeric(10,2)"), LogicalType::Decimal);
        assert_eq!(
            LogicalType::from_db_type("timestamp with time zone"),
            LogicalType::DateTime
        );
        assert_eq!(LogicalType::from_db_type("datetime2"), LogicalType::DateTime);
        assert_eq!(LogicalType::from_db_type("uniqueidentifier"), LogicalType::Uuid);
        assert_eq!(LogicalType::from_db_type("jsonb"), LogicalType::Json);
        assert_eq!(LogicalType::from_db_type("geometry"), LogicalType::Other);
    }

    #[test]
    fn test_column_deserializes_with_defaults() {
        let column: Column = serde_json::from_str(
            r#"{"name": "id", "type": "int", "primary": true, "automatic": true}"#,
        )
        .unwrap();
        assert!(column.exposure.post);
        assert!(!column.is_exposed(Verb::Post));
        assert_eq!(column.logical(), LogicalType::Integer);
    }

    #[test]
    fn test_foreign_key_label_defaults_to_reference() {
        let fk = ForeignKey::new("customer_id", "customers", "id");
        assert_eq!(fk.label(), "id");
        assert_eq!(fk.with_label("name").label(), "name");
    }
}
