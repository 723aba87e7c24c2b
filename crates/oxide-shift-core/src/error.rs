//! Error types for the migration core.

use crate::tx::TxError;

/// Text of [`MigrateError::MigrationGap`].
pub const MIGRATION_GAP_MESSAGE: &str = "\
There are gaps between the migrations that have already been applied so the plan
and goto commands don't work because you don't have allow_migration_gaps: true
in your config. You can still use other commands (e.g.: status, hack)
or fix the DB and migrations manually if necessary.";

/// Errors that can occur while planning or executing migrations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// A migration name doesn't start with a numeric id.
    #[error("invalid migration name {name:?}: {reason}")]
    InvalidMigrationName {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Two migrations share the same numeric id.
    #[error("duplicate migration ID ({number}): {first:?} and {second:?}")]
    DuplicateMigrationNumber {
        /// The shared number.
        number: i64,
        /// Name of the migration seen first.
        first: String,
        /// Name of the migration seen second.
        second: String,
    },

    /// The target reference doesn't resolve to a migration.
    #[error("invalid target migration: {0}")]
    InvalidTarget(String),

    /// An older migration is unapplied while a newer one is applied.
    #[error("{}", MIGRATION_GAP_MESSAGE)]
    MigrationGap,

    /// A migration has to be backward migrated but has no backward step.
    #[error("Migration {0:?} doesn't have a backward step")]
    NotReversible(String),

    /// The migrations table records a name that no migration file has.
    #[error("can't find migration file for forward migrated item {0:?}")]
    MissingMigrationFile(String),

    /// A nested transaction invariant was violated.
    #[error(transparent)]
    Transaction(#[from] TxError),

    /// Database error, passed through from the driver untouched.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row of the migrations table couldn't be read.
    #[error("malformed row in migrations table: {0}")]
    MalformedRecord(String),

    /// Error reported by a driver that isn't backed by sqlx.
    #[error("connection error: {0}")]
    Connection(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A step panicked inside a transaction wrapper.
    #[error("step panicked: {0}")]
    Panicked(String),

    /// A titled step of an executed plan failed.
    #[error("{step} failed: {source}")]
    StepFailed {
        /// Title of the failed step.
        step: String,
        /// The underlying error.
        #[source]
        source: Box<MigrateError>,
    },

    /// No driver is registered under this name.
    #[error("invalid DB driver: {0}")]
    UnknownDriver(String),

    /// No migration source is registered under this name.
    #[error("unknown migration_source type: {0}")]
    UnknownMigrationSource(String),

    /// A driver was registered twice.
    #[error("duplicate database driver name: {0}")]
    DuplicateDriver(String),

    /// A migration source was registered twice.
    #[error("duplicate migration source name: {0}")]
    DuplicateMigrationSource(String),

    /// Driver parameters couldn't be used.
    #[error("invalid parameters for driver {driver:?}: {message}")]
    InvalidDriverParams {
        /// Driver name.
        driver: String,
        /// What is wrong.
        message: String,
    },

    /// Migration source parameters couldn't be used.
    #[error("invalid parameters for migration source {source_type:?}: {message}")]
    InvalidSourceParams {
        /// Source type name.
        source_type: String,
        /// What is wrong.
        message: String,
    },

    /// A migration file couldn't be read or parsed.
    #[error("error loading migration file {file:?}: {source}")]
    MigrationFile {
        /// Path of the file.
        file: String,
        /// What went wrong.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The single-step override was called with unusable arguments.
    #[error("{0}")]
    Hack(String),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
