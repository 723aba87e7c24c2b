//! Database port and nested transaction session.
//!
//! Drivers implement [`Connection`] for one flat SQL connection. A
//! [`Session`] wraps it and layers virtual nested transactions on top:
//! only the outermost [`Session::begin_tx`] sends `BEGIN`, and only when
//! that outermost transaction resolves does `COMMIT` or `ROLLBACK` reach
//! the database.
//!
//! A session isn't meant to be shared between concurrent tasks.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::tx::{Resolution, TxId, TxState, TxTree};

/// A value bound to or read from a SQL statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Integer.
    Integer(i64),
    /// Floating point number.
    Real(f64),
    /// Text.
    Text(String),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    /// Returns the text, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// A row returned by [`Connection::query`].
pub type Row = Vec<SqlValue>;

/// One flat (non-nested) database connection.
#[async_trait]
pub trait Connection: Send {
    /// Executes a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64>;

    /// Runs a query and returns all rows.
    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>>;

    /// Starts the real transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Commits the real transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Rolls back the real transaction.
    async fn rollback(&mut self) -> Result<()>;
}

/// A connection plus the nested transactions opened on it.
pub struct Session {
    conn: Box<dyn Connection>,
    tree: TxTree,
    current: Option<TxId>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("tree", &self.tree)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wraps a connection.
    pub fn new(conn: impl Connection + 'static) -> Self {
        Self::from_boxed(Box::new(conn))
    }

    /// Wraps an already boxed connection.
    #[must_use]
    pub fn from_boxed(conn: Box<dyn Connection>) -> Self {
        Self {
            conn,
            tree: TxTree::new(),
            current: None,
        }
    }

    /// Executes a statement in the current transaction, if any.
    pub async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        self.conn.execute(sql, args).await
    }

    /// Runs a query in the current transaction, if any.
    pub async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
        self.conn.query(sql, args).await
    }

    /// The innermost active transaction, `None` outside transactions.
    #[must_use]
    pub fn current_tx(&self) -> Option<TxId> {
        self.current
    }

    /// State of a transaction started on this session.
    pub fn tx_state(&self, tx: TxId) -> Result<TxState> {
        Ok(self.tree.state(tx)?)
    }

    /// Starts a transaction nested in the current one.
    ///
    /// Outside any transaction this starts the real one.
    pub async fn begin_tx(&mut self) -> Result<TxId> {
        let parent = self.current;
        if parent.is_none() {
            debug!("BEGIN");
            self.conn.begin().await?;
        }
        let tx = self.tree.begin(parent)?;
        self.current = Some(tx);
        Ok(tx)
    }

    /// Commits `tx`. Only the outermost commit reaches the database.
    pub async fn commit(&mut self, tx: TxId) -> Result<()> {
        let resolution = self.tree.commit(tx)?;
        self.leave(tx)?;
        if resolution == Resolution::Real {
            debug!("COMMIT");
            if let Err(err) = self.conn.commit().await {
                // A failed COMMIT can leave the real transaction open.
                debug!("ROLLBACK");
                if let Err(rollback_err) = self.conn.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed commit failed");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Rolls back `tx`. Only the outermost rollback reaches the database.
    pub async fn rollback(&mut self, tx: TxId) -> Result<()> {
        let resolution = self.tree.rollback(tx)?;
        self.leave(tx)?;
        if resolution == Resolution::Real {
            debug!("ROLLBACK");
            self.conn.rollback().await?;
        }
        Ok(())
    }

    fn leave(&mut self, tx: TxId) -> Result<()> {
        if self.current == Some(tx) {
            self.current = self.tree.parent(tx)?;
        }
        Ok(())
    }
}
