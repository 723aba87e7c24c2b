//! Core of `oxide-shift`: move a database to any migration, forward or
//! backward.
//!
//! Migrations are numbered, each with a forward step and an optional
//! backward step. Given the names recorded as applied, the planner computes
//! the steps that reach a target and the executor runs them, one
//! transaction per migration whenever the SQL allows it.
//!
//! # Architecture
//!
//! - **Migration** - [`Migration`], [`MigrationId`], [`MigrationSet`]
//! - **Steps** - [`Step`], [`Steps`], [`SqlExecStep`]: what to execute or print
//! - **Session** - [`Session`], [`TxTree`]: nested transactions emulated on
//!   one real transaction
//! - **Planner** - [`plan()`]: backward migrations first, then forward ones
//! - **Ports** - [`Connection`], [`MigrationDb`], [`Driver`],
//!   [`MigrationSource`] and their factories, resolved through a [`Registry`]
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_shift_core::prelude::*;
//!
//! let steps = plan(&PlanInput {
//!     migrations: &migrations,
//!     forward_migrated: &applied_names,
//!     target: &Target::Latest,
//!     migration_db: mdb.as_ref(),
//!     allow_gaps: false,
//! })?;
//!
//! let mut out = std::io::stdout();
//! steps.execute(&mut ExecCtx::new(&mut session, &mut out)).await?;
//! ```

pub mod db;
pub mod error;
pub mod hack;
pub mod migration;
pub mod plan;
pub mod ports;
pub mod registry;
pub mod status;
pub mod step;
pub mod tx;

#[cfg(test)]
mod testing;

pub use db::{Connection, Row, Session, SqlValue};
pub use error::{MigrateError, Result};
pub use hack::{hack, HackInput, HackOutcome};
pub use migration::{Migration, MigrationId, MigrationSet};
pub use plan::{plan, PlanInput, Target, INITIAL, LATEST};
pub use ports::{
    AppliedMigration, Driver, DriverFactory, MigrationDb, MigrationSource,
    MigrationSourceFactory, Params,
};
pub use registry::Registry;
pub use status::{status, MigrationStatus, StatusEntry};
pub use step::{ExecCtx, PrintCtx, SqlExecStep, Step, Steps, TitledStep};
pub use tx::{TxError, TxId, TxState, TxTree};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::db::{Connection, Session, SqlValue};
    pub use crate::error::{MigrateError, Result};
    pub use crate::migration::{Migration, MigrationSet};
    pub use crate::plan::{plan, PlanInput, Target};
    pub use crate::ports::{AppliedMigration, Driver, MigrationDb, MigrationSource};
    pub use crate::registry::Registry;
    pub use crate::step::{ExecCtx, PrintCtx, SqlExecStep, Step, Steps};
}
