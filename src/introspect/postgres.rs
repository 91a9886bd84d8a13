use postgres::Client;
use tracing::{debug, error, info, trace};

use super::{infer_label_columns, Introspector, TableFilter};
use crate::error::CrudifyError;
use crate::schema::{Column, Database, ForeignKey, LogicalType, Table};

/// PostgreSQL introspector
///
/// One connection sees one database; tables are read from `schema_name`.
pub struct PostgresIntrospector<'a> {
    client: &'a mut Client,
    schema_name: String,
}

impl<'a> PostgresIntrospector<'a> {
    pub fn new(client: &'a mut Client, schema_name: impl Into<String>) -> Self {
        Self {
            client,
            schema_name: schema_name.into(),
        }
    }
}

impl Introspector for PostgresIntrospector<'_> {
    fn get_databases(&mut self, filter: &TableFilter) -> Result<Vec<Database>, CrudifyError> {
        let schema_name = self.schema_name.as_str();
        info!(schema = ?schema_name, "Starting schema introspection");

        let database_name = query_database_name(self.client, schema_name)?;

        let enums = query_enum_names(self.client, schema_name)?;
        debug!(count = ?enums.len(), "Found enum types");

        let all_table_names = query_tables(self.client, schema_name)?;
        debug!(count = ?all_table_names.len(), "Found all tables");

        let table_names: Vec<String> = all_table_names
            .into_iter()
            .filter(|name| filter.should_include(name))
            .collect();
        debug!(count = ?table_names.len(), "Tables after filtering");

        let mut tables = Vec::with_capacity(table_names.len());
        for table_name in table_names {
            debug!(table = ?table_name, "Introspecting table");

            let primary_key = query_primary_key(self.client, schema_name, &table_name)?;
            trace!(table = ?table_name, primary_key = ?primary_key, "Found primary key");

            let columns = query_columns(self.client, schema_name, &table_name, &primary_key, &enums)?;
            trace!(table = ?table_name, columns = ?columns.len(), "Found columns");

            let foreign_keys = query_foreign_keys(self.client, schema_name, &table_name)?;
            trace!(table = ?table_name, foreign_keys = ?foreign_keys.len(), "Found foreign keys");

            let mut table = Table::new(table_name, columns);
            table.foreign_keys = foreign_keys;
            tables.push(table);
        }

        let mut database = Database {
            name: database_name,
            tables,
        };
        infer_label_columns(&mut database);

        info!(
            database = ?database.name,
            schema = ?schema_name,
            tables = ?database.tables.len(),
            "Schema introspection complete"
        );

        Ok(vec![database])
    }
}

fn introspection_error(schema_name: &str, message: String) -> CrudifyError {
    CrudifyError::Introspection {
        schema: schema_name.to_string(),
        message,
    }
}

fn query_database_name(client: &mut Client, schema_name: &str) -> Result<String, CrudifyError> {
    let row = client
        .query_one("SELECT current_database() AS database_name", &[])
        .map_err(|e| introspection_error(schema_name, format!("Failed to query database name: {}", e)))?;
    Ok(row.get("database_name"))
}

/// Query all table names in a schema
fn query_tables(client: &mut Client, schema_name: &str) -> Result<Vec<String>, CrudifyError> {
    trace!(schema = ?schema_name, "Querying tables");

    let sql = r#"
        SELECT c.relname AS table_name
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind = 'r'
            AND n.nspname = $1
        ORDER BY c.relname
    "#;

    let rows = client
        .query(sql, &[&schema_name])
        .map_err(|e| introspection_error(schema_name, format!("Failed to query tables: {}", e)))?;

    let tables = rows.iter().map(|row| row.get("table_name")).collect();
    trace!(tables = ?tables, "Tables found");
    Ok(tables)
}

/// Query all columns for a table
fn query_columns(
    client: &mut Client,
    schema_name: &str,
    table_name: &str,
    primary_key: &[String],
    enums: &[String],
) -> Result<Vec<Column>, CrudifyError> {
    trace!(schema = ?schema_name, table = ?table_name, "Querying columns");

    let sql = r#"
        SELECT
            a.attname AS column_name,
            format_type(a.atttypid, a.atttypmod) AS data_type,
            NOT a.attnotnull AS is_nullable,
            pg_get_expr(d.adbin, d.adrelid) AS default_value,
            a.attidentity <> '' AS is_identity
        FROM pg_attribute a
        JOIN pg_class c ON c.oid = a.attrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_attrdef d ON d.adrelid = c.oid AND d.adnum = a.attnum
        WHERE c.relname = $1
            AND n.nspname = $2
            AND a.attnum > 0
            AND NOT a.attisdropped
        ORDER BY a.attnum
    "#;

    let rows = client
        .query(sql, &[&table_name, &schema_name])
        .map_err(|e| {
            error!(
                schema = ?schema_name,
                table = ?table_name,
                error = ?e,
                "Failed to query columns"
            );
            introspection_error(
                schema_name,
                format!("Failed to query columns for table '{}': {}", table_name, e),
            )
        })?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let column_name: String = row.get("column_name");
        let data_type: String = row.get("data_type");
        let is_nullable: bool = row.get("is_nullable");
        let default_value: Option<String> = row.get("default_value");
        let is_identity: bool = row.get("is_identity");

        let primary = primary_key.contains(&column_name);
        let column = build_column(
            column_name,
            data_type,
            is_nullable,
            default_value.as_deref(),
            is_identity,
            primary,
            enums,
        );

        trace!(
            column = ?column.name,
            data_type = ?column.db_type,
            logical = %column.logical(),
            nullable = ?column.nullable,
            has_default = ?column.has_default,
            automatic = ?column.automatic,
            "Parsed column"
        );
        columns.push(column);
    }

    Ok(columns)
}

fn build_column(
    name: String,
    data_type: String,
    is_nullable: bool,
    default_value: Option<&str>,
    is_identity: bool,
    primary: bool,
    enums: &[String],
) -> Column {
    let mut column = Column::new(name, data_type);
    column.nullable = is_nullable;
    column.primary = primary;
    column.has_default = default_value.is_some() || is_identity;
    column.automatic = is_identity || is_auto_generated_column(default_value);
    if enums.iter().any(|e| e == &column.db_type) {
        column.logical_type = Some(LogicalType::Text);
    }
    column
}

/// Query primary key columns for a table
fn query_primary_key(
    client: &mut Client,
    schema_name: &str,
    table_name: &str,
) -> Result<Vec<String>, CrudifyError> {
    trace!(schema = ?schema_name, table = ?table_name, "Querying primary key");

    let sql = r#"
        SELECT a.attname AS column_name
        FROM pg_constraint con
        JOIN pg_class c ON c.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(con.conkey)
        WHERE con.contype = 'p'
            AND c.relname = $1
            AND n.nspname = $2
        ORDER BY array_position(con.conkey, a.attnum)
    "#;

    let rows = client
        .query(sql, &[&table_name, &schema_name])
        .map_err(|e| {
            error!(
                schema = ?schema_name,
                table = ?table_name,
                error = ?e,
                "Failed to query primary key"
            );
            introspection_error(
                schema_name,
                format!("Failed to query primary key for table '{}': {}", table_name, e),
            )
        })?;

    let pk_columns = rows.iter().map(|row| row.get("column_name")).collect();
    trace!(table = ?table_name, primary_key = ?pk_columns, "Primary key found");
    Ok(pk_columns)
}

/// Query foreign keys, one entry per column pair, in constraint order
fn query_foreign_keys(
    client: &mut Client,
    schema_name: &str,
    table_name: &str,
) -> Result<Vec<ForeignKey>, CrudifyError> {
    trace!(schema = ?schema_name, table = ?table_name, "Querying foreign keys");

    let sql = r#"
        SELECT
            a.attname AS column_name,
            rc.relname AS referenced_table,
            ra.attname AS referenced_column
        FROM pg_constraint con
        JOIN pg_class c ON c.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_class rc ON rc.oid = con.confrelid
        CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, refnum, ord)
        JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
        JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.refnum
        WHERE con.contype = 'f'
            AND c.relname = $1
            AND n.nspname = $2
        ORDER BY con.conname, k.ord
    "#;

    let rows = client
        .query(sql, &[&table_name, &schema_name])
        .map_err(|e| {
            error!(
                schema = ?schema_name,
                table = ?table_name,
                error = ?e,
                "Failed to query foreign keys"
            );
            introspection_error(
                schema_name,
                format!("Failed to query foreign keys for table '{}': {}", table_name, e),
            )
        })?;

    let foreign_keys = rows
        .iter()
        .map(|row| {
            let column: String = row.get("column_name");
            let referenced_table: String = row.get("referenced_table");
            let referenced_column: String = row.get("referenced_column");
            ForeignKey::new(column, referenced_table, referenced_column)
        })
        .collect();
    Ok(foreign_keys)
}

/// Query the names of all enum types in a schema
fn query_enum_names(client: &mut Client, schema_name: &str) -> Result<Vec<String>, CrudifyError> {
    trace!(schema = ?schema_name, "Querying enum types");

    let sql = r#"
        SELECT t.typname AS enum_name
        FROM pg_type t
        JOIN pg_namespace n ON n.oid = t.typnamespace
        WHERE n.nspname = $1
            AND t.typtype = 'e'
        ORDER BY t.typname
    "#;

    let rows = client.query(sql, &[&schema_name]).map_err(|e| {
        error!(schema = ?schema_name, error = ?e, "Failed to query enum types");
        introspection_error(schema_name, format!("Failed to query enums: {}", e))
    })?;

    Ok(rows.iter().map(|row| row.get("enum_name")).collect())
}

/// Check if a column is auto-generated (SERIAL, BIGSERIAL, IDENTITY)
fn is_auto_generated_column(default_value: Option<&str>) -> bool {
    match default_value {
        Some(default) => {
            let lower = default.to_lowercase();
            // SERIAL/BIGSERIAL columns have nextval('sequence_name') as default
            lower.contains("nextval(")
                // IDENTITY columns
                || lower.contains("generated")
        }
        None => false,
    }
}
