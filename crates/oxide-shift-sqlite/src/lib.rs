//! SQLite support for `oxide-shift`.
//!
//! - [`SqliteConnection`] - one sqlx connection behind the core
//!   [`Connection`](oxide_shift_core::Connection) port
//! - [`SqliteMigrationDb`] - the migrations table
//! - [`SqliteDriverFactory`] - registers the whole thing as `"sqlite"`

mod connection;
mod driver;
mod migration_db;

pub use connection::SqliteConnection;
pub use driver::{SqliteDriver, SqliteDriverFactory, DRIVER_NAME};
pub use migration_db::{SqliteMigrationDb, DEFAULT_MIGRATIONS_TABLE};
