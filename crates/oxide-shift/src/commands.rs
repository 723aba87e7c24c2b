//! The commands behind the CLI.
//!
//! Each command works on a [`Database`]: one config entry resolved against
//! a [`Registry`] into a driver, its migrations table and a migration
//! source. Human-readable output goes to the writer passed in; logging goes
//! through `tracing`.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tracing::{debug, info};

use oxide_shift_core::{
    Driver, ExecCtx, HackInput, HackOutcome, MigrateError, MigrationDb, MigrationSet,
    MigrationSource, MigrationStatus, PlanInput, PrintCtx, Registry, Session, Steps, Target,
};

use crate::config::{Config, DbConfig};
use crate::error::{Error, Result};

const NOTHING_TO_MIGRATE: &str = "Nothing to migrate.";

const CONFIG_TEMPLATE: &str = "\
dev:
  # Registered DB driver.
  driver: sqlite

  # Optional driver parameters.
  #driver_params:
  #  migrations_table: migrations

  # Connection string handed to the driver.
  data_source: \"sqlite:dev.db?mode=rwc\"

  # Where migrations come from. Optional, default: dir
  migration_source: dir

  # A relative path is relative to the directory of this config file.
  migration_source_params:
    path: migrations

  # Plan even if an older migration isn't applied while a newer one is.
  allow_migration_gaps: false
";

/// A config entry resolved into a driver and a migration source.
pub struct Database {
    name: String,
    config: DbConfig,
    driver: Box<dyn Driver>,
    migration_db: Box<dyn MigrationDb>,
    source: Box<dyn MigrationSource>,
}

impl Database {
    /// Resolves the `db` entry of `config`.
    ///
    /// No connection is opened here.
    pub fn resolve(registry: &Registry, config: &Config, db: &str) -> Result<Self> {
        let db_config = config.db(db, registry)?.clone();
        let driver = registry
            .driver(&db_config.driver)?
            .new_driver(&db_config.driver_params)?;
        let migration_db = driver.migration_db();
        let source = registry
            .source(&db_config.migration_source)?
            .new_source(config.base_dir(), &db_config.migration_source_params)?;
        debug!(db = %db, driver = %db_config.driver, "Resolved database config");

        Ok(Self {
            name: db.to_string(),
            config: db_config,
            driver,
            migration_db,
            source,
        })
    }

    /// Name of the config entry.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved config entry.
    #[must_use]
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Connects to the database.
    pub async fn connect(&self) -> Result<Session> {
        Ok(self.driver.open(&self.config.data_source).await?)
    }

    /// Loads the migrations from the source.
    pub fn migrations(&self) -> Result<MigrationSet> {
        Ok(self.source.migrations()?)
    }

    async fn forward_migrated(&self, session: &mut Session) -> Result<Vec<String>> {
        let applied = self.migration_db.forward_migrations(session).await?;
        Ok(applied.into_iter().map(|m| m.name).collect())
    }

    async fn plan(&self, session: &mut Session, target: &Target) -> Result<Steps> {
        let forward_migrated = self.forward_migrated(session).await?;
        let migrations = self.migrations()?;
        let steps = oxide_shift_core::plan(&PlanInput {
            migrations: &migrations,
            forward_migrated: &forward_migrated,
            target,
            migration_db: self.migration_db.as_ref(),
            allow_gaps: self.config.allow_migration_gaps,
        })?;
        Ok(steps)
    }
}

/// Writes a config template to `path`. An existing file is left untouched.
pub fn write_config_template(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(Error::ConfigExists(path.to_path_buf()));
    }
    fs::write(path, CONFIG_TEMPLATE)?;
    info!(path = %path.display(), "Created config file");
    Ok(())
}

/// Creates the migrations table if it doesn't exist.
pub async fn init(db: &Database) -> Result<()> {
    let mut session = db.connect().await?;
    let step = db.migration_db.create_table();
    let mut out = io::sink();
    step.execute(&mut ExecCtx::new(&mut session, &mut out)).await?;
    info!(db = %db.name(), "Migrations table ready");
    Ok(())
}

/// Reads which migrations are forward migrated.
pub async fn status(db: &Database) -> Result<MigrationStatus> {
    let mut session = db.connect().await?;
    let applied = db.migration_db.forward_migrations(&mut session).await?;
    let migrations = db.migrations()?;
    Ok(oxide_shift_core::status(&migrations, &applied))
}

/// Prints a status report, either as a checklist or as JSON.
pub fn write_status(report: &MigrationStatus, json: bool, out: &mut dyn Write) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, report)?;
        writeln!(out)?;
        return Ok(());
    }
    for entry in &report.entries {
        let checkbox = if entry.is_applied() { "[X]" } else { "[ ]" };
        writeln!(out, "{checkbox} {}", entry.name)?;
    }
    for name in &report.invalid_names {
        writeln!(out, "!!! Invalid name in migrations table: {name}")?;
    }
    Ok(())
}

/// What [`plan`] prints besides step titles.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Print the SQL of the migrations.
    pub sql: bool,
    /// Also print transaction and migrations table statements.
    pub system_sql: bool,
}

/// Prints the steps that [`goto`] would execute.
pub async fn plan(
    db: &Database,
    target: &Target,
    options: PlanOptions,
    out: &mut dyn Write,
) -> Result<()> {
    let mut session = db.connect().await?;
    let steps = db.plan(&mut session, target).await?;
    if steps.is_empty() {
        writeln!(out, "{NOTHING_TO_MIGRATE}")?;
        return Ok(());
    }
    steps.print(&mut PrintCtx {
        output: out,
        print_sql: options.sql || options.system_sql,
        print_system_sql: options.system_sql,
    })?;
    Ok(())
}

/// Moves the database to `target`.
///
/// Stops at the first failed migration; migrations before it stay applied.
pub async fn goto(db: &Database, target: &Target, out: &mut (dyn Write + Send)) -> Result<()> {
    let mut session = db.connect().await?;
    let steps = db.plan(&mut session, target).await?;
    if steps.is_empty() {
        writeln!(out, "{NOTHING_TO_MIGRATE}")?;
        return Ok(());
    }

    let mut ctx = ExecCtx::new(&mut session, out);
    for step in &steps {
        let title = step.title().unwrap_or("step");
        step.execute(&mut ctx)
            .await
            .map_err(|e| MigrateError::StepFailed {
                step: title.to_string(),
                source: Box::new(e),
            })?;
        info!(step = %title, "Step finished");
    }
    info!(db = %db.name(), target = %target, steps = steps.len(), "Migration finished");
    Ok(())
}

/// Arguments of [`hack`].
#[derive(Debug, Clone, Default)]
pub struct HackArgs {
    /// Migration name or numeric id.
    pub migration: String,
    /// Forward migrate if true, backward migrate otherwise.
    pub forward: bool,
    /// Ignore what the migrations table says.
    pub force: bool,
    /// Only run the migration's own SQL.
    pub user_only: bool,
    /// Only update the migrations table.
    pub system_only: bool,
}

/// Forward or backward migrates a single migration without consistency
/// checks.
pub async fn hack(db: &Database, args: &HackArgs, out: &mut (dyn Write + Send)) -> Result<()> {
    let mut session = db.connect().await?;
    let forward_migrated = db.forward_migrated(&mut session).await?;
    let migrations = db.migrations()?;

    let outcome = oxide_shift_core::hack(&HackInput {
        migrations: &migrations,
        forward_migrated: &forward_migrated,
        migration_db: db.migration_db.as_ref(),
        migration: &args.migration,
        forward: args.forward,
        force: args.force,
        user_only: args.user_only,
        system_only: args.system_only,
    })?;

    match outcome {
        HackOutcome::NothingToDo => {
            writeln!(out, "Nothing to do according to the migrations table.")?;
            writeln!(out, "Use --force if you want to ignore the migrations table.")?;
        }
        HackOutcome::Run(step) => {
            step.execute(&mut ExecCtx::new(&mut session, out)).await?;
            info!(migration = %args.migration, forward = args.forward, "Hack finished");
        }
    }
    Ok(())
}

/// Creates an empty migration file and returns its name.
///
/// With `squashed`, all existing migrations are merged into the new file
/// instead.
pub fn new_migration(
    db: &Database,
    description: &str,
    squashed: bool,
    out: &mut dyn Write,
) -> Result<String> {
    let name = if squashed {
        db.source.squash(description)?
    } else {
        db.source.create(description)?
    };
    writeln!(out, "Created {name}")?;
    Ok(name)
}
