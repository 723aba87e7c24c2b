//! Migration planning.
//!
//! [`plan`] compares the known migrations with the names recorded as
//! forward migrated and returns the steps that move the database to a
//! target. All migrations newer than the target are backward migrated
//! first, newest first; then all migrations up to and including the target
//! are forward migrated, oldest first. Each migration's own step and its
//! bookkeeping step run in one transaction when both allow it.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::migration::{Migration, MigrationId, MigrationSet};
use crate::ports::MigrationDb;
use crate::step::{Step, Steps};

/// Target name that backward migrates everything.
pub const INITIAL: &str = "initial";
/// Target name that forward migrates everything.
pub const LATEST: &str = "latest";

/// Where [`plan`] should move the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Before the first migration.
    Initial,
    /// After the last migration.
    Latest,
    /// A migration name or numeric id.
    Migration(String),
}

impl FromStr for Target {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            INITIAL => Self::Initial,
            LATEST => Self::Latest,
            other => Self::Migration(other.to_string()),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => f.write_str(INITIAL),
            Self::Latest => f.write_str(LATEST),
            Self::Migration(name) => f.write_str(name),
        }
    }
}

/// Everything [`plan`] needs.
pub struct PlanInput<'a> {
    /// Known migrations.
    pub migrations: &'a MigrationSet,
    /// Names recorded in the migrations table.
    pub forward_migrated: &'a [String],
    /// Desired end state.
    pub target: &'a Target,
    /// Produces the bookkeeping steps.
    pub migration_db: &'a dyn MigrationDb,
    /// Allow unapplied migrations older than an applied one.
    pub allow_gaps: bool,
}

struct PlanItem<'a> {
    id: MigrationId,
    migration: Option<&'a Migration>,
    forward_migrated: bool,
}

/// Lines up known migrations with the recorded names.
///
/// Recorded names are matched against canonical names only; numeric
/// aliases don't count. A recorded name without a migration is an error.
fn plan_items<'a>(
    migrations: &'a MigrationSet,
    forward_migrated: &[String],
) -> Result<Vec<PlanItem<'a>>> {
    let mut items: Vec<PlanItem<'a>> = migrations
        .iter()
        .map(|m| PlanItem {
            id: m.id.clone(),
            migration: Some(m),
            forward_migrated: false,
        })
        .collect();

    for name in forward_migrated {
        if let Some(index) = migrations.index_for_canonical_name(name) {
            items[index].forward_migrated = true;
            continue;
        }
        let id = MigrationId::parse(name.as_str())
            .map_err(|_| MigrateError::MissingMigrationFile(name.clone()))?;
        items.push(PlanItem {
            id,
            migration: None,
            forward_migrated: true,
        });
    }
    items.sort_by_key(|item| item.id.number);

    if let Some(orphan) = items.iter().find(|item| item.migration.is_none()) {
        return Err(MigrateError::MissingMigrationFile(orphan.id.name.clone()));
    }
    Ok(items)
}

/// Fails if an unapplied migration precedes an applied one.
fn check_gaps(items: &[PlanItem<'_>]) -> Result<()> {
    let mut seen_unapplied = false;
    for item in items {
        if !item.forward_migrated {
            seen_unapplied = true;
        } else if seen_unapplied {
            debug!(name = %item.id, "Applied migration after an unapplied one");
            return Err(MigrateError::MigrationGap);
        }
    }
    Ok(())
}

/// Number of leading migrations that should end up applied.
fn target_len(migrations: &MigrationSet, target: &Target) -> Result<usize> {
    match target {
        Target::Initial => Ok(0),
        Target::Latest => Ok(migrations.len()),
        Target::Migration(reference) => migrations
            .index_for_name(reference)
            .map(|index| index + 1)
            .ok_or_else(|| MigrateError::InvalidTarget(reference.clone())),
    }
}

/// Computes the steps that move the database to `input.target`.
///
/// The result is empty when there is nothing to do.
pub fn plan(input: &PlanInput<'_>) -> Result<Steps> {
    let items = plan_items(input.migrations, input.forward_migrated)?;
    if !input.allow_gaps {
        check_gaps(&items)?;
    }
    let keep = target_len(input.migrations, input.target)?;

    let mut steps = Steps::new();

    for item in items.iter().skip(keep).rev() {
        if !item.forward_migrated {
            continue;
        }
        let Some(migration) = item.migration else {
            continue;
        };
        let backward = migration
            .backward
            .clone()
            .ok_or_else(|| MigrateError::NotReversible(migration.name().to_string()))?;
        let update = input.migration_db.backward_migrate(migration.name());
        steps.push(Step::titled(
            format!("backward-migrate {}", migration.name()),
            Step::transaction(vec![backward, update]),
        ));
    }
    let backward = steps.len();

    for item in items.iter().take(keep) {
        if item.forward_migrated {
            continue;
        }
        let Some(migration) = item.migration else {
            continue;
        };
        let update = input.migration_db.forward_migrate(migration.name());
        steps.push(Step::titled(
            format!("forward-migrate {}", migration.name()),
            Step::transaction(vec![migration.forward.clone(), update]),
        ));
    }

    info!(
        target = %input.target,
        backward,
        forward = steps.len() - backward,
        "Plan computed"
    );
    Ok(steps)
}
