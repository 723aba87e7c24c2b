//! Single-migration override for manual recovery.
//!
//! [`hack`] forward or backward migrates exactly one migration, optionally
//! touching only the user schema or only the migrations table. It skips the
//! consistency checks of [`crate::plan::plan`] on purpose: it is the tool
//! for fixing a database whose migrations table and migration files
//! disagree.

use std::collections::HashSet;

use crate::error::{MigrateError, Result};
use crate::migration::MigrationSet;
use crate::plan::{INITIAL, LATEST};
use crate::ports::MigrationDb;
use crate::step::Step;

/// Everything [`hack`] needs.
pub struct HackInput<'a> {
    /// Known migrations.
    pub migrations: &'a MigrationSet,
    /// Names recorded in the migrations table.
    pub forward_migrated: &'a [String],
    /// Produces the bookkeeping step.
    pub migration_db: &'a dyn MigrationDb,
    /// Migration name or numeric id.
    pub migration: &'a str,
    /// Forward migrate if true, backward migrate otherwise.
    pub forward: bool,
    /// Act even if the migrations table says there is nothing to do.
    pub force: bool,
    /// Only run the migration's own step.
    pub user_only: bool,
    /// Only update the migrations table.
    pub system_only: bool,
}

/// What [`hack`] decided.
#[derive(Debug, Clone)]
pub enum HackOutcome {
    /// The migrations table already has the requested state.
    NothingToDo,
    /// Execute this step.
    Run(Step),
}

/// Builds the step for a single-migration override.
pub fn hack(input: &HackInput<'_>) -> Result<HackOutcome> {
    if input.user_only && input.system_only {
        return Err(MigrateError::Hack(
            "the user-only and system-only options are exclusive".to_string(),
        ));
    }
    if input.migration == INITIAL || input.migration == LATEST {
        return Err(MigrateError::Hack(format!(
            "hack doesn't accept {INITIAL:?} or {LATEST:?} as the migration ID"
        )));
    }

    // The reference may exist only in the files, only in the migrations
    // table, or in both.
    let index = input.migrations.index_for_name(input.migration);
    let name = index
        .and_then(|i| input.migrations.name(i))
        .unwrap_or(input.migration);
    let recorded: HashSet<&str> = input.forward_migrated.iter().map(String::as_str).collect();
    let is_recorded = recorded.contains(name);

    if index.is_none() && !is_recorded {
        return Err(MigrateError::Hack(format!(
            "invalid migration ID: {}",
            input.migration
        )));
    }
    if !input.force && input.forward == is_recorded {
        return Ok(HackOutcome::NothingToDo);
    }

    let user_step = if input.system_only {
        None
    } else {
        let migration = index
            .and_then(|i| input.migrations.get(i))
            .ok_or_else(|| MigrateError::Hack(format!("there is no migration file for {name:?}")))?;
        let step = if input.forward {
            migration.forward.clone()
        } else {
            migration
                .backward
                .clone()
                .ok_or_else(|| MigrateError::NotReversible(name.to_string()))?
        };
        Some(step)
    };

    let system_step = if input.user_only {
        None
    } else if input.forward {
        Some(input.migration_db.forward_migrate(name))
    } else {
        Some(input.migration_db.backward_migrate(name))
    };

    let step = match (user_step, system_step) {
        (Some(user), Some(system)) => Step::transaction(vec![user, system]),
        (Some(step), None) | (None, Some(step)) => step,
        (None, None) => return Ok(HackOutcome::NothingToDo),
    };
    Ok(HackOutcome::Run(step))
}
