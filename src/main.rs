use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crudify::codegen::{CodeGenConfig, NamingConvention};
use crudify::config::{load_env_file, GeneratorConfig};
use crudify::introspect::{Introspector, SnapshotIntrospector, TableFilter};
use crudify::persist::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
use crudify::policy::UnitRequest;
use crudify::report::{render_json, render_text, BatchSummary};
use crudify::schema::Schema;
use crudify::template::TemplateStore;

#[derive(Debug, Clone, ValueEnum)]
enum Database {
    Postgres,
}

#[derive(Parser, Debug)]
#[command(name = "crudify")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON file holding an array of generation requests
    requests: PathBuf,

    /// Schema snapshot file (JSON array of databases)
    #[arg(long, conflicts_with = "database")]
    schema_file: Option<PathBuf>,

    /// Introspect a live database instead of reading a snapshot
    #[arg(long)]
    database: Option<Database>,

    /// Database schema to introspect
    #[arg(long, default_value = "public")]
    schema: String,

    /// Output directory (overrides CRUDIFY_OUTPUT_DIR)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory of templates overriding the built-in catalog
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Generate in memory and report without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Maximum number of units generated at once
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Path to .env file for connection config
    #[arg(long, default_value = "./.env")]
    env_file: PathBuf,

    /// Comma-separated list of tables to include (default: all)
    #[arg(long, value_delimiter = ',')]
    tables: Option<Vec<String>>,

    /// Comma-separated list of tables to exclude
    #[arg(long, value_delimiter = ',')]
    exclude: Option<Vec<String>>,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            error!(error = ?e, "Fatal error");
            std::process::exit(1);
        }
    }
}

/// Returns whether every unit generated
fn run() -> Result<bool> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    info!("crudify v{}", env!("CARGO_PKG_VERSION"));

    load_env_file(&cli.env_file).context("Failed to load environment file")?;
    let mut config = GeneratorConfig::from_env().context("Failed to load generator configuration")?;
    if let Some(output) = cli.output {
        config.output_dir = output;
    }
    if let Some(templates) = cli.templates {
        config.template_dir = Some(templates);
    }
    if let Some(max_parallel) = cli.max_parallel {
        config.max_parallel = max_parallel.max(1);
    }
    debug!(config = ?config, "Generator configuration");

    let requests = read_requests(&cli.requests)?;
    info!(requests = requests.len(), path = ?cli.requests, "Loaded generation requests");

    let filter = TableFilter {
        include: cli.tables,
        exclude: cli.exclude,
    };
    if !filter.is_empty() {
        debug!(filter = ?filter, "Table filter configured");
    }

    let schema = match (&cli.schema_file, &cli.database) {
        (Some(path), _) => SnapshotIntrospector::new(path)
            .snapshot(&filter)
            .context("Failed to load schema snapshot")?,
        (None, Some(database)) => introspect_database(database, &cli.schema, &filter)?,
        (None, None) => bail!("Either --schema-file or --database is required"),
    };

    if schema.databases().iter().all(|db| db.tables.is_empty()) {
        warn!("No tables found after filtering");
    }
    for database in schema.databases() {
        debug!(database = ?database.name, tables = database.tables.len(), "Database");
    }

    let templates = match &config.template_dir {
        Some(dir) => TemplateStore::with_overrides(dir).context("Failed to load templates")?,
        None => TemplateStore::builtin(),
    };

    let store: Arc<dyn ArtifactStore> = if cli.dry_run {
        info!("Dry run, nothing will be written");
        Arc::new(MemoryArtifactStore::new())
    } else {
        info!(output = ?config.output_dir, "Writing artifacts");
        Arc::new(FsArtifactStore::new(&config.output_dir))
    };

    let orchestrator = CodeGenConfig::new()
        .with_naming(NamingConvention::new(config.singular_classes))
        .with_max_parallel(config.max_parallel)
        .build(Arc::new(schema), Arc::new(templates), store);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(orchestrator.run_requests(requests));

    let summary = BatchSummary::from(&result);
    let rendered = if cli.json {
        render_json(&summary)
    } else {
        render_text(&summary)
    }
    .context("Failed to render summary")?;
    println!("{}", rendered);

    Ok(result.is_complete_success())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn read_requests(path: &Path) -> Result<Vec<UnitRequest>> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read requests from {}", path.display()))?;
    let requests = serde_json::from_str(&json)
        .with_context(|| format!("Malformed generation requests in {}", path.display()))?;
    Ok(requests)
}

fn introspect_database(database: &Database, schema_name: &str, filter: &TableFilter) -> Result<Schema> {
    match database {
        Database::Postgres => introspect_postgres(schema_name, filter),
    }
}

#[cfg(feature = "postgres")]
fn introspect_postgres(schema_name: &str, filter: &TableFilter) -> Result<Schema> {
    use crudify::config::DbConfig;
    use crudify::PostgresIntrospector;
    use postgres::NoTls;

    let config = DbConfig::from_env().context("Failed to load database configuration")?;
    info!(connection = ?config.redacted_connection_string(), "Connecting to PostgreSQL");

    let mut client = postgres::Client::connect(&config.postgres_connection_string(), NoTls)
        .with_context(|| {
            format!(
                "Failed to connect to PostgreSQL at {}",
                config.redacted_connection_string()
            )
        })?;

    info!("Connected to database");

    let mut introspector = PostgresIntrospector::new(&mut client, schema_name);
    let schema = introspector
        .snapshot(filter)
        .context("Failed to introspect schema")?;

    Ok(schema)
}

#[cfg(not(feature = "postgres"))]
fn introspect_postgres(_schema_name: &str, _filter: &TableFilter) -> Result<Schema> {
    bail!("PostgreSQL support not enabled. Rebuild with --features postgres")
}
