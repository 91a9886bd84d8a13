//! Configuration loading
//!
//! Loads database connection and generator settings from environment
//! variables, optionally reading from a .env file first.

use std::{env, path::Path, path::PathBuf};

use tracing::{debug, error, trace, warn};

use crate::error::CrudifyError;

/// Database connection configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl DbConfig {
    /// Load configuration from environment variables
    ///
    /// Expected variables:
    /// - DB_HOST (default: localhost)
    /// - DB_PORT (default: 5432)
    /// - DB_NAME (required)
    /// - DB_USER (required)
    /// - DB_PASSWORD (required)
    pub fn from_env() -> Result<Self, CrudifyError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`DbConfig::from_env`], reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CrudifyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        debug!("Loading database configuration");

        let host = lookup("DB_HOST").unwrap_or_else(|| {
            trace!("DB_HOST not set, using default");
            "localhost".to_string()
        });

        let port_str = lookup("DB_PORT").unwrap_or_else(|| "5432".to_string());
        let port = port_str.parse::<u16>().map_err(|e| {
            error!(port = ?port_str, error = ?e, "Invalid DB_PORT value");
            CrudifyError::Config("DB_PORT must be a valid port number".to_string())
        })?;

        let database = required(&lookup, "DB_NAME")?;
        let user = required(&lookup, "DB_USER")?;
        let password = required(&lookup, "DB_PASSWORD")?;

        debug!(host = ?host, port = ?port, database = ?database, user = ?user, "Database configuration loaded");

        Ok(Self {
            host,
            port,
            database,
            user,
            password,
        })
    }

    /// Build a PostgreSQL connection string
    pub fn postgres_connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.database, self.user, self.password
        )
    }

    /// Build a connection string with password redacted (for logs and errors)
    pub fn redacted_connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password=***",
            self.host, self.port, self.database, self.user
        )
    }
}

/// Generator settings
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Root directory of the artifact store
    pub output_dir: PathBuf,
    /// Directory whose files override built-in catalog templates
    pub template_dir: Option<PathBuf>,
    /// Upper bound on units generated at the same time
    pub max_parallel: usize,
    /// Derive class names from the singular form of the table name
    pub singular_classes: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./generated"),
            template_dir: None,
            max_parallel: 8,
            singular_classes: true,
        }
    }
}

impl GeneratorConfig {
    /// Load generator settings from environment variables
    ///
    /// Recognised variables (all optional):
    /// - CRUDIFY_OUTPUT_DIR (default: ./generated)
    /// - CRUDIFY_TEMPLATE_DIR
    /// - CRUDIFY_MAX_PARALLEL (default: 8)
    /// - CRUDIFY_SINGULAR_CLASSES (default: true)
    pub fn from_env() -> Result<Self, CrudifyError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CrudifyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let output_dir = lookup("CRUDIFY_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);
        let template_dir = lookup("CRUDIFY_TEMPLATE_DIR").map(PathBuf::from);

        let max_parallel = match lookup("CRUDIFY_MAX_PARALLEL") {
            Some(raw) => raw.parse::<usize>().map_err(|e| {
                error!(value = ?raw, error = ?e, "Invalid CRUDIFY_MAX_PARALLEL value");
                CrudifyError::Config("CRUDIFY_MAX_PARALLEL must be a positive integer".to_string())
            })?,
            None => defaults.max_parallel,
        }
        .max(1);

        let singular_classes = match lookup("CRUDIFY_SINGULAR_CLASSES") {
            Some(raw) => parse_flag(&raw).ok_or_else(|| {
                CrudifyError::Config("CRUDIFY_SINGULAR_CLASSES must be true or false".to_string())
            })?,
            None => defaults.singular_classes,
        };

        debug!(
            output_dir = ?output_dir,
            template_dir = ?template_dir,
            max_parallel = max_parallel,
            singular_classes = singular_classes,
            "Generator configuration loaded"
        );

        Ok(Self {
            output_dir,
            template_dir,
            max_parallel,
            singular_classes,
        })
    }
}

/// Load a .env file into the process environment if it exists
pub fn load_env_file(env_file: &Path) -> Result<(), CrudifyError> {
    if env_file.exists() {
        debug!(path = ?env_file, "Loading environment file");
        dotenvy::from_path(env_file).map_err(|e| {
            error!(path = ?env_file, error = ?e, "Failed to load environment file");
            CrudifyError::Config(format!("Failed to load {}: {}", env_file.display(), e))
        })?;
    } else {
        warn!(path = ?env_file, "Environment file not found, using existing environment");
    }
    Ok(())
}

fn required<F>(lookup: &F, key: &str) -> Result<String, CrudifyError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).ok_or_else(|| {
        error!("{key} environment variable is not set");
        CrudifyError::Config(format!("{key} environment variable is required"))
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
