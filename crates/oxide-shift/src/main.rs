//! oxide-shift CLI
//!
//! Command-line tool for moving a database between migration versions.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_shift::commands::{self, Database, HackArgs, PlanOptions};
use oxide_shift::config::{DEFAULT_CONFIG_FILE, DEFAULT_DB};
use oxide_shift::{default_registry, Config};
use oxide_shift_core::Target;

/// Move a database to any migration version, forward or backward.
#[derive(Parser)]
#[command(name = "oxide-shift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file.
    #[arg(short, long, env = "OXIDE_SHIFT_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Database entry of the config file (dev, test, prod, ...).
    #[arg(long, env = "OXIDE_SHIFT_DB", default_value = DEFAULT_DB)]
    db: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    Forward,
    Backward,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a config file template if it doesn't exist.
    Config,

    /// Create the migrations table if it doesn't exist.
    Init,

    /// Show which migrations are forward migrated.
    Status {
        /// Print JSON instead of a checklist.
        #[arg(long)]
        json: bool,
    },

    /// Show the steps goto would execute.
    Plan {
        /// Migration name or id, "initial" or "latest".
        target: Target,

        /// Print the SQL of the migrations.
        #[arg(long)]
        sql: bool,

        /// Also print transaction and migrations table statements.
        #[arg(long)]
        system_sql: bool,
    },

    /// Migrate to a specific version of the DB schema.
    Goto {
        /// Migration name or id, "initial" or "latest".
        target: Target,

        /// Don't print progress.
        #[arg(short, long)]
        quiet: bool,
    },

    /// Forward or backward migrate a single migration. For troubleshooting.
    Hack {
        /// Direction to migrate.
        #[arg(value_enum)]
        direction: Direction,

        /// Migration name or id.
        migration: String,

        /// Ignore what the migrations table says.
        #[arg(long)]
        force: bool,

        /// Only run the migration's own SQL.
        #[arg(long, conflicts_with = "system_only")]
        user_only: bool,

        /// Only update the migrations table.
        #[arg(long)]
        system_only: bool,
    },

    /// Create a new migration file.
    New {
        /// Description, becomes part of the file name.
        #[arg(required = true)]
        description: Vec<String>,

        /// Merge all existing migrations into the new file.
        #[arg(long)]
        squashed: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Progress output goes to stdout, logs stay quiet unless asked for.
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut stdout = io::stdout();

    if let Commands::Config = cli.command {
        commands::write_config_template(&cli.config)?;
        writeln!(stdout, "Created {}", cli.config.display())?;
        return Ok(());
    }

    let registry = default_registry()?;
    let config = Config::load(&cli.config)?;
    let db = Database::resolve(&registry, &config, &cli.db)?;
    debug!(config = %cli.config.display(), db = %cli.db, "Loaded config");

    match cli.command {
        Commands::Config => {}

        Commands::Init => {
            commands::init(&db).await?;
        }

        Commands::Status { json } => {
            let report = commands::status(&db).await?;
            commands::write_status(&report, json, &mut stdout)?;
        }

        Commands::Plan {
            target,
            sql,
            system_sql,
        } => {
            let options = PlanOptions { sql, system_sql };
            commands::plan(&db, &target, options, &mut stdout).await?;
        }

        Commands::Goto { target, quiet } => {
            let mut sink = io::sink();
            let out: &mut (dyn Write + Send) = if quiet { &mut sink } else { &mut stdout };
            commands::goto(&db, &target, out).await?;
        }

        Commands::Hack {
            direction,
            migration,
            force,
            user_only,
            system_only,
        } => {
            let args = HackArgs {
                migration,
                forward: matches!(direction, Direction::Forward),
                force,
                user_only,
                system_only,
            };
            commands::hack(&db, &args, &mut stdout).await?;
        }

        Commands::New {
            description,
            squashed,
        } => {
            commands::new_migration(&db, &description.join(" "), squashed, &mut stdout)?;
        }
    }

    Ok(())
}
