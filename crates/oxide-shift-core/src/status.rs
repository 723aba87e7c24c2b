//! Migration status report.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::migration::MigrationSet;
use crate::ports::AppliedMigration;

/// One known migration and whether it is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    /// Migration name.
    pub name: String,
    /// When it was forward migrated, `None` if it isn't.
    pub applied_at: Option<DateTime<Utc>>,
}

impl StatusEntry {
    /// Whether the migration is forward migrated.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Known migrations plus recorded names that match none of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Known migrations in ascending order.
    pub entries: Vec<StatusEntry>,
    /// Recorded names without a migration.
    pub invalid_names: Vec<String>,
}

/// Builds the status report. Unlike planning, this never fails on
/// inconsistent records; it reports them.
#[must_use]
pub fn status(migrations: &MigrationSet, applied: &[AppliedMigration]) -> MigrationStatus {
    let mut recorded: HashMap<&str, DateTime<Utc>> = HashMap::with_capacity(applied.len());
    let mut invalid_names = Vec::new();
    for record in applied {
        if migrations.index_for_canonical_name(&record.name).is_some() {
            recorded.insert(&record.name, record.applied_at);
        } else {
            invalid_names.push(record.name.clone());
        }
    }

    let entries = migrations
        .iter()
        .map(|m| StatusEntry {
            name: m.name().to_string(),
            applied_at: recorded.get(m.name()).copied(),
        })
        .collect();

    MigrationStatus {
        entries,
        invalid_names,
    }
}
