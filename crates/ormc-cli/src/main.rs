//! ORM compiler CLI.
//!
//! Provides the `ormc` binary. Every subcommand reads one or more semantic
//! models as JSON, validates them, and then emits DDL, a statement plan, or
//! applies the schema to a SQLite database.
//!
//! Output goes to stdout; diagnostics and logs go to stderr. `RUST_LOG`
//! controls log verbosity and `ORMC_DIALECT` supplies the default dialect.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ormc_core::{validate, DiagnosticSink, Model, Severity};
use ormc_plan::{build_plan, schema_for, PlanOptions};
use ormc_schema::{diff, to_script, DdlEmitter, DialectKind, Schema};

/// ORM compiler: schema, migration and statement plan generation.
#[derive(Parser)]
#[command(name = "ormc", about = "ORM compiler: schema, migrations and statement plans")]
struct Cli {
    /// SQL dialect: sqlite or postgres (default: $ORMC_DIALECT, then sqlite).
    #[arg(short, long, global = true)]
    dialect: Option<DialectKind>,

    /// Emit foreign keys without DEFERRABLE INITIALLY DEFERRED.
    #[arg(long, global = true)]
    immediate_keys: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print the CREATE script for a model.
    Schema {
        /// Path to the model JSON file.
        model: PathBuf,
    },

    /// Print the DROP script for a model.
    Drop {
        /// Path to the model JSON file.
        model: PathBuf,
    },

    /// Print the migration script between two model versions.
    Migrate {
        /// Model currently deployed.
        from: PathBuf,
        /// Model to migrate to.
        to: PathBuf,
    },

    /// Print the statement plan as JSON.
    Plan {
        /// Path to the model JSON file.
        model: PathBuf,
    },

    /// Bring a SQLite database up to the last of the given model versions.
    ///
    /// The first model creates the schema; each later one is a migration
    /// step from the one before it. Steps already applied are skipped.
    Apply {
        /// Path to the database file.
        #[arg(long)]
        db: PathBuf,

        /// Model versions, oldest first.
        #[arg(required = true)]
        models: Vec<PathBuf>,
    },
}

/// Failure of one CLI run, mapped to its exit code.
enum Failure {
    /// The model was rejected; diagnostics were already printed.
    Invalid(String),
    /// Generation failed after validation.
    Generate(String),
    Io(String),
}

impl Failure {
    fn exit_code(&self) -> i32 {
        match self {
            Failure::Generate(_) => 1,
            Failure::Invalid(_) => 2,
            Failure::Io(_) => 3,
        }
    }

    fn message(&self) -> &str {
        match self {
            Failure::Invalid(m) | Failure::Generate(m) | Failure::Io(m) => m,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = match plan_options(&cli) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            process::exit(1);
        }
    };

    let result = match &cli.command {
        Commands::Schema { model } => run_schema(model, &options),
        Commands::Drop { model } => run_drop(model, &options),
        Commands::Migrate { from, to } => run_migrate(from, to, &options),
        Commands::Plan { model } => run_plan(model, &options),
        Commands::Apply { db, models } => run_apply(db, models, &options),
    };

    match result {
        Ok(output) => {
            print!("{}", output);
        }
        Err(failure) => {
            eprintln!("Error: {}", failure.message());
            process::exit(failure.exit_code());
        }
    }
}

/// Resolves the dialect from the flag, then `ORMC_DIALECT`, then the default.
fn plan_options(cli: &Cli) -> Result<PlanOptions, String> {
    let dialect = match cli.dialect {
        Some(dialect) => dialect,
        None => match std::env::var("ORMC_DIALECT") {
            Ok(value) if !value.trim().is_empty() => value.trim().parse()?,
            _ => DialectKind::default(),
        },
    };
    Ok(PlanOptions {
        dialect,
        deferrable_keys: !cli.immediate_keys,
    })
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn run_schema(path: &Path, options: &PlanOptions) -> Result<String, Failure> {
    let schema = load_schema(path, options)?;
    let emitter = DdlEmitter::new(options.dialect.dialect());
    Ok(to_script(&emitter.create_schema(&schema)))
}

fn run_drop(path: &Path, options: &PlanOptions) -> Result<String, Failure> {
    let schema = load_schema(path, options)?;
    let emitter = DdlEmitter::new(options.dialect.dialect());
    Ok(to_script(&emitter.drop_schema(&schema)))
}

fn run_migrate(from: &Path, to: &Path, options: &PlanOptions) -> Result<String, Failure> {
    let old = load_schema(from, options)?;
    let new = load_schema(to, options)?;
    migration_script(&old, &new, options)
}

fn run_plan(path: &Path, options: &PlanOptions) -> Result<String, Failure> {
    let model = load_model(path)?;
    let plan = build_plan(&model, options).map_err(|e| Failure::Generate(e.to_string()))?;
    let mut json = serde_json::to_string_pretty(&plan)
        .map_err(|e| Failure::Generate(format!("failed to serialize plan: {}", e)))?;
    json.push('\n');
    Ok(json)
}

fn run_apply(db: &Path, models: &[PathBuf], options: &PlanOptions) -> Result<String, Failure> {
    if options.dialect != DialectKind::Sqlite {
        return Err(Failure::Generate(format!(
            "apply only supports sqlite, not {}",
            options.dialect
        )));
    }

    // One migration step per model version.
    let mut steps = Vec::with_capacity(models.len());
    let mut previous: Option<Schema> = None;
    for path in models {
        let schema = load_schema(path, options)?;
        let script = match &previous {
            None => {
                let emitter = DdlEmitter::new(options.dialect.dialect());
                to_script(&emitter.create_schema(&schema))
            }
            Some(old) => migration_script(old, &schema, options)?,
        };
        debug!(model = %path.display(), bytes = script.len(), "migration step");
        steps.push(script);
        previous = Some(schema);
    }

    let mut conn = Connection::open(db)
        .map_err(|e| Failure::Io(format!("failed to open database '{}': {}", db.display(), e)))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Failure::Io(e.to_string()))?;

    let migrations = Migrations::new(steps.iter().map(|s| M::up(s)).collect());
    migrations
        .to_latest(&mut conn)
        .map_err(|e| Failure::Generate(format!("migration failed: {}", e)))?;
    info!(db = %db.display(), steps = steps.len(), "schema applied");
    Ok(format!("applied {} migration step(s) to {}\n", steps.len(), db.display()))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn migration_script(old: &Schema, new: &Schema, options: &PlanOptions) -> Result<String, Failure> {
    let changeset = diff(old, new).map_err(|e| Failure::Generate(e.to_string()))?;
    let script = DdlEmitter::new(options.dialect.dialect()).migrate(&changeset);
    let mut out = to_script(&script.pre);
    out.push_str(&to_script(&script.post));
    Ok(out)
}

/// Reads and validates a model, printing every diagnostic.
fn load_model(path: &Path) -> Result<Model, Failure> {
    let text = fs::read_to_string(path)
        .map_err(|e| Failure::Io(format!("failed to read '{}': {}", path.display(), e)))?;
    let mut model: Model = serde_json::from_str(&text)
        .map_err(|e| Failure::Invalid(format!("failed to parse '{}': {}", path.display(), e)))?;
    model
        .reindex()
        .map_err(|e| Failure::Invalid(e.to_string()))?;

    let mut sink = DiagnosticSink::new();
    let result = validate(&model, &mut sink);
    for diagnostic in sink.diagnostics() {
        let label = match diagnostic.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        eprintln!("{}: {}: {}", diagnostic.location, label, diagnostic.message);
    }
    result.map_err(|e| Failure::Invalid(format!("{}: {}", path.display(), e)))?;
    Ok(model)
}

fn load_schema(path: &Path, options: &PlanOptions) -> Result<Schema, Failure> {
    let model = load_model(path)?;
    schema_for(&model, options).map_err(|e| Failure::Generate(e.to_string()))
}
