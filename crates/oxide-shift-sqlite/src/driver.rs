//! The `"sqlite"` driver.

use async_trait::async_trait;
use tracing::debug;

use oxide_shift_core::{Driver, DriverFactory, MigrateError, MigrationDb, Params, Result, Session};

use crate::connection::SqliteConnection;
use crate::migration_db::{SqliteMigrationDb, DEFAULT_MIGRATIONS_TABLE};

/// Name under which [`SqliteDriverFactory`] is usually registered.
pub const DRIVER_NAME: &str = "sqlite";

/// SQLite driver configured with a migrations table.
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
    migration_db: SqliteMigrationDb,
}

impl SqliteDriver {
    /// Creates a driver that records migrations in `table_name`.
    ///
    /// # Errors
    ///
    /// Fails if `table_name` isn't a valid table name, see
    /// [`SqliteMigrationDb::new`].
    pub fn new(table_name: &str) -> Result<Self> {
        Ok(Self {
            migration_db: SqliteMigrationDb::new(table_name)?,
        })
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn open(&self, data_source: &str) -> Result<Session> {
        debug!(data_source = %data_source, "Opening SQLite connection");
        Ok(SqliteConnection::connect(data_source).await?.into_session())
    }

    fn migration_db(&self) -> Box<dyn MigrationDb> {
        Box::new(self.migration_db.clone())
    }
}

/// Creates [`SqliteDriver`]s from config parameters.
///
/// Accepted parameters: `migrations_table` (default `migrations`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriverFactory;

impl DriverFactory for SqliteDriverFactory {
    fn new_driver(&self, params: &Params) -> Result<Box<dyn Driver>> {
        if let Some(unknown) = params.keys().find(|k| k.as_str() != "migrations_table") {
            return Err(MigrateError::InvalidDriverParams {
                driver: DRIVER_NAME.to_string(),
                message: format!("unrecognised parameter {unknown:?}"),
            });
        }
        let table = params
            .get("migrations_table")
            .map_or(DEFAULT_MIGRATIONS_TABLE, String::as_str);
        Ok(Box::new(SqliteDriver::new(table)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_params() {
        let factory = SqliteDriverFactory;
        assert!(factory.new_driver(&Params::new()).is_ok());

        let mut params = Params::new();
        params.insert("migrations_table".to_string(), "history".to_string());
        assert!(factory.new_driver(&params).is_ok());

        params.insert("schema".to_string(), "main".to_string());
        assert!(matches!(
            factory.new_driver(&params),
            Err(MigrateError::InvalidDriverParams { .. })
        ));

        let mut params = Params::new();
        params.insert("migrations_table".to_string(), "x\"y".to_string());
        assert!(factory.new_driver(&params).is_err());
    }

    #[tokio::test]
    async fn test_open_memory() {
        let driver = SqliteDriver::default();
        let mut session = driver.open("sqlite::memory:").await.unwrap();
        session.exec("SELECT 1", &[]).await.unwrap();
    }
}
