//! Named drivers and migration sources.
//!
//! A [`Registry`] is built once at startup and passed by reference to
//! whatever needs to resolve a driver or source name from config.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{MigrateError, Result};
use crate::ports::{DriverFactory, MigrationSourceFactory};

/// Driver and migration source factories by name.
#[derive(Default)]
pub struct Registry {
    drivers: BTreeMap<String, Box<dyn DriverFactory>>,
    sources: BTreeMap<String, Box<dyn MigrationSourceFactory>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a driver factory. Names must be unique.
    pub fn register_driver(
        &mut self,
        name: impl Into<String>,
        factory: impl DriverFactory + 'static,
    ) -> Result<()> {
        let name = name.into();
        if self.drivers.contains_key(&name) {
            return Err(MigrateError::DuplicateDriver(name));
        }
        self.drivers.insert(name, Box::new(factory));
        Ok(())
    }

    /// Registers a migration source factory. Names must be unique.
    pub fn register_source(
        &mut self,
        name: impl Into<String>,
        factory: impl MigrationSourceFactory + 'static,
    ) -> Result<()> {
        let name = name.into();
        if self.sources.contains_key(&name) {
            return Err(MigrateError::DuplicateMigrationSource(name));
        }
        self.sources.insert(name, Box::new(factory));
        Ok(())
    }

    /// Looks up a driver factory.
    pub fn driver(&self, name: &str) -> Result<&dyn DriverFactory> {
        self.drivers
            .get(name)
            .map(|factory| &**factory)
            .ok_or_else(|| MigrateError::UnknownDriver(name.to_string()))
    }

    /// Looks up a migration source factory.
    pub fn source(&self, name: &str) -> Result<&dyn MigrationSourceFactory> {
        self.sources
            .get(name)
            .map(|factory| &**factory)
            .ok_or_else(|| MigrateError::UnknownMigrationSource(name.to_string()))
    }

    /// Registered driver names, sorted.
    #[must_use]
    pub fn driver_names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }
}
