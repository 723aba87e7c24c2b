//! In-memory fakes shared by the unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::db::{Connection, Row, Session, SqlValue};
use crate::error::{MigrateError, Result};
use crate::ports::{AppliedMigration, MigrationDb};
use crate::step::{SqlExecStep, Step};

/// What a [`MemoryConnection`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin,
    Commit,
    Rollback,
    Exec(String),
    Query(String),
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<Event>,
    fail_on: Option<String>,
    fail_begin: bool,
    fail_commit: bool,
    rows: Vec<Row>,
}

/// Connection that records every call. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnection {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `execute` fail for statements containing `needle`.
    pub fn fail_on(self, needle: &str) -> Self {
        self.inner.lock().unwrap().fail_on = Some(needle.to_string());
        self
    }

    pub fn fail_begin(self) -> Self {
        self.inner.lock().unwrap().fail_begin = true;
        self
    }

    /// Makes `commit` fail. The real transaction stays open.
    pub fn fail_commit(self) -> Self {
        self.inner.lock().unwrap().fail_commit = true;
        self
    }

    /// Rows returned by every `query`.
    pub fn with_rows(self, rows: Vec<Row>) -> Self {
        self.inner.lock().unwrap().rows = rows;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().unwrap().events.clone()
    }

    /// Executed statements only.
    pub fn statements(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Exec(sql) => Some(sql),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, sql: &str, _args: &[SqlValue]) -> Result<u64> {
        assert!(!sql.contains("PANIC"), "statement panicked: {sql}");
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_on.as_deref().is_some_and(|n| sql.contains(n)) {
            return Err(MigrateError::Connection(format!("failed: {sql}")));
        }
        inner.events.push(Event::Exec(sql.to_string()));
        Ok(1)
    }

    async fn query(&mut self, sql: &str, _args: &[SqlValue]) -> Result<Vec<Row>> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(Event::Query(sql.to_string()));
        Ok(inner.rows.clone())
    }

    async fn begin(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_begin {
            return Err(MigrateError::Connection("begin failed".to_string()));
        }
        inner.events.push(Event::Begin);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_commit {
            return Err(MigrateError::Connection("commit failed".to_string()));
        }
        inner.events.push(Event::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.inner.lock().unwrap().events.push(Event::Rollback);
        Ok(())
    }
}

/// Bookkeeping fake whose steps are recognisable statements.
#[derive(Debug, Default)]
pub struct MemoryMigrationDb {
    pub applied: Vec<AppliedMigration>,
}

#[async_trait]
impl MigrationDb for MemoryMigrationDb {
    async fn forward_migrations(&self, _db: &mut Session) -> Result<Vec<AppliedMigration>> {
        Ok(self.applied.clone())
    }

    fn create_table(&self) -> Step {
        SqlExecStep::new("CREATE migrations").system().into()
    }

    fn forward_migrate(&self, name: &str) -> Step {
        SqlExecStep::new(format!("RECORD {name}")).system().into()
    }

    fn backward_migrate(&self, name: &str) -> Step {
        SqlExecStep::new(format!("UNRECORD {name}")).system().into()
    }
}
