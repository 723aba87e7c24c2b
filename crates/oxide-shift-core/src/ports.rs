//! Interfaces implemented by drivers and migration sources.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::Session;
use crate::error::Result;
use crate::migration::MigrationSet;
use crate::step::Step;

/// String parameters passed to driver and source factories.
pub type Params = BTreeMap<String, String>;

/// A row of the migrations table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    /// Migration name.
    pub name: String,
    /// When it was forward migrated.
    pub applied_at: DateTime<Utc>,
}

impl AppliedMigration {
    /// Creates a record.
    pub fn new(name: impl Into<String>, applied_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            applied_at,
        }
    }
}

/// The table that records which migrations are forward migrated.
///
/// Only [`MigrationDb::forward_migrations`] touches the database; the other
/// methods describe the change as a [`Step`] so it can run in the same
/// transaction as the migration itself, or be printed.
#[async_trait]
pub trait MigrationDb: Send + Sync {
    /// Reads the forward migrated names.
    async fn forward_migrations(&self, db: &mut Session) -> Result<Vec<AppliedMigration>>;

    /// Creates the table.
    fn create_table(&self) -> Step;

    /// Records `name` as forward migrated.
    fn forward_migrate(&self, name: &str) -> Step;

    /// Removes the record of `name`.
    fn backward_migrate(&self, name: &str) -> Step;
}

/// A configured database driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Connects to `data_source`.
    async fn open(&self, data_source: &str) -> Result<Session>;

    /// The migrations table of this driver.
    fn migration_db(&self) -> Box<dyn MigrationDb>;
}

/// Creates drivers from config parameters.
pub trait DriverFactory: Send + Sync {
    /// Validates `params` and creates a driver.
    fn new_driver(&self, params: &Params) -> Result<Box<dyn Driver>>;
}

/// Where migrations come from.
pub trait MigrationSource: Send + Sync {
    /// Loads all migrations.
    fn migrations(&self) -> Result<MigrationSet>;

    /// Creates an empty migration and returns its name.
    fn create(&self, description: &str) -> Result<String>;

    /// Replaces all existing migrations with a single squashed one and
    /// returns its name.
    fn squash(&self, description: &str) -> Result<String>;
}

/// Creates migration sources from config parameters.
pub trait MigrationSourceFactory: Send + Sync {
    /// Validates `params` and creates a source. Relative paths in `params`
    /// are resolved against `base_dir`.
    fn new_source(&self, base_dir: &Path, params: &Params) -> Result<Box<dyn MigrationSource>>;
}
