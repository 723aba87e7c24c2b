//! The SQLite migrations table.
//!
//! One row per forward migrated migration: its name and the UTC time it
//! was recorded.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use oxide_shift_core::{
    AppliedMigration, MigrateError, MigrationDb, Result, Session, SqlExecStep, SqlValue, Step,
};

/// Table name used when the config doesn't set one.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "migrations";

/// Migrations table in a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteMigrationDb {
    /// Quoted table name.
    table: String,
}

impl SqliteMigrationDb {
    /// Creates the bookkeeping for `table_name`.
    ///
    /// Table names can't be bound as parameters, so they are quoted into the
    /// statements; a name containing `"` is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::InvalidDriverParams`] for an empty name or one
    /// containing `"`.
    pub fn new(table_name: &str) -> Result<Self> {
        if table_name.is_empty() || table_name.contains('"') {
            return Err(MigrateError::InvalidDriverParams {
                driver: "sqlite".to_string(),
                message: format!("invalid migrations table name: {table_name:?}"),
            });
        }
        Ok(Self {
            table: format!("\"{table_name}\""),
        })
    }
}

impl Default for SqliteMigrationDb {
    fn default() -> Self {
        Self {
            table: format!("\"{DEFAULT_MIGRATIONS_TABLE}\""),
        }
    }
}

/// Parses a stored time. Accepts RFC 3339 and SQLite's `datetime()` format.
fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|dt| dt.and_utc())
                .ok()
        })
}

fn parse_record(row: &[SqlValue]) -> Result<AppliedMigration> {
    let [SqlValue::Text(name), SqlValue::Text(time)] = row else {
        return Err(MigrateError::MalformedRecord(format!("{row:?}")));
    };
    let applied_at = parse_time(time).ok_or_else(|| {
        MigrateError::MalformedRecord(format!("invalid time {time:?} for {name:?}"))
    })?;
    Ok(AppliedMigration::new(name.clone(), applied_at))
}

#[async_trait]
impl MigrationDb for SqliteMigrationDb {
    async fn forward_migrations(&self, db: &mut Session) -> Result<Vec<AppliedMigration>> {
        let sql = format!("SELECT name, time FROM {} ORDER BY time, name", self.table);
        let rows = db.query(&sql, &[]).await?;
        rows.iter().map(|row| parse_record(row)).collect()
    }

    fn create_table(&self) -> Step {
        SqlExecStep::new(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    name TEXT NOT NULL PRIMARY KEY,\n    time TEXT NOT NULL\n)",
            self.table
        ))
        .system()
        .into()
    }

    fn forward_migrate(&self, name: &str) -> Step {
        SqlExecStep::new(format!(
            "INSERT INTO {} (name, time) VALUES (?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now')) \
             ON CONFLICT (name) DO UPDATE SET time = excluded.time",
            self.table
        ))
        .arg(name)
        .system()
        .into()
    }

    fn backward_migrate(&self, name: &str) -> Step {
        SqlExecStep::new(format!("DELETE FROM {} WHERE name = ?", self.table))
            .arg(name)
            .system()
            .into()
    }
}
