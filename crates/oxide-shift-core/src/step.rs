//! Executable, printable migration steps.
//!
//! A [`Step`] is a description of work, not a resource: it is executed
//! against whatever [`Session`] the [`ExecCtx`] carries. Steps compose:
//!
//! - [`Step::Sql`] runs one statement,
//! - [`Step::Sequence`] runs its children in order and stops at the first error,
//! - [`Step::Transaction`] runs its children inside a (nested) transaction
//!   when every child allows it,
//! - [`Step::Titled`] prints `"<title> ... OK"`/`"FAILED"` around another step.

use std::any::Any;
use std::fmt;
use std::io::{self, Write};
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::db::{Session, SqlValue};
use crate::error::{MigrateError, Result};

/// Where a step executes and where it reports progress.
pub struct ExecCtx<'a> {
    /// The database session. Transactions are opened on it.
    pub db: &'a mut Session,
    /// Human-readable progress output.
    pub output: &'a mut (dyn Write + Send),
}

impl<'a> ExecCtx<'a> {
    /// Creates a context.
    pub fn new(db: &'a mut Session, output: &'a mut (dyn Write + Send)) -> Self {
        Self { db, output }
    }

    /// Writes progress output. Output failures never fail a step.
    fn say(&mut self, args: fmt::Arguments<'_>) {
        let result = self
            .output
            .write_fmt(args)
            .and_then(|()| self.output.flush());
        if let Err(err) = result {
            debug!(error = %err, "Failed to write progress output");
        }
    }
}

/// Options for printing steps instead of executing them.
pub struct PrintCtx<'a> {
    /// Destination.
    pub output: &'a mut dyn Write,
    /// Print SQL statements, not only titles.
    pub print_sql: bool,
    /// Also print bookkeeping SQL and transaction statements.
    pub print_system_sql: bool,
}

/// A single SQL statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlExecStep {
    /// Statement text.
    pub query: String,
    /// Bound arguments.
    pub args: Vec<SqlValue>,
    /// Must run outside a transaction.
    pub no_transaction: bool,
    /// Bookkeeping SQL rather than a user schema change.
    pub is_system: bool,
}

impl SqlExecStep {
    /// Creates a step for `query` without arguments.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Adds a bound argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<SqlValue>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Marks the statement as one that can't run in a transaction.
    #[must_use]
    pub fn no_transaction(mut self) -> Self {
        self.no_transaction = true;
        self
    }

    /// Marks the statement as bookkeeping SQL.
    #[must_use]
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    async fn execute(&self, ctx: &mut ExecCtx<'_>) -> Result<()> {
        debug!(sql = %self.query.trim(), args = self.args.len(), "Executing SQL");
        ctx.db.exec(&self.query, &self.args).await?;
        Ok(())
    }

    fn print(&self, ctx: &mut PrintCtx<'_>) -> io::Result<()> {
        if !ctx.print_sql || self.query.is_empty() {
            return Ok(());
        }
        if self.is_system && !ctx.print_system_sql {
            return Ok(());
        }
        writeln!(ctx.output, "{}", self.query.trim())?;
        if !self.args.is_empty() {
            let args: Vec<String> = self.args.iter().map(ToString::to_string).collect();
            writeln!(ctx.output, "QueryArgs: [{}]", args.join(", "))?;
        }
        writeln!(ctx.output)
    }
}

/// An ordered list of steps.
#[derive(Debug, Clone, Default)]
pub struct Steps(Vec<Step>);

impl Steps {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step.
    pub fn push(&mut self, step: impl Into<Step>) {
        self.0.push(step.into());
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the steps.
    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.0.iter()
    }

    /// True only if every step can run in a transaction.
    #[must_use]
    pub fn allows_transaction(&self) -> bool {
        self.0.iter().all(Step::allows_transaction)
    }

    /// Executes the steps in order, stopping at the first error.
    ///
    /// Steps that already ran are not compensated.
    pub async fn execute(&self, ctx: &mut ExecCtx<'_>) -> Result<()> {
        for step in &self.0 {
            step.execute(ctx).await?;
        }
        Ok(())
    }

    /// Prints the steps in order.
    pub fn print(&self, ctx: &mut PrintCtx<'_>) -> io::Result<()> {
        for step in &self.0 {
            step.print(ctx)?;
        }
        Ok(())
    }
}

impl From<Vec<Step>> for Steps {
    fn from(steps: Vec<Step>) -> Self {
        Self(steps)
    }
}

impl FromIterator<Step> for Steps {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Steps {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A step with a human-readable title.
#[derive(Debug, Clone)]
pub struct TitledStep {
    /// Title printed before the result.
    pub title: String,
    /// The decorated step.
    pub step: Box<Step>,
}

impl TitledStep {
    async fn execute(&self, ctx: &mut ExecCtx<'_>) -> Result<()> {
        if !self.title.is_empty() {
            ctx.say(format_args!("{} ... ", self.title));
        }

        let result = self.step.execute(ctx).await;

        if !self.title.is_empty() {
            let status = if result.is_ok() { "OK" } else { "FAILED" };
            ctx.say(format_args!("{status}\n"));
        }
        result
    }

    fn print(&self, ctx: &mut PrintCtx<'_>) -> io::Result<()> {
        if !self.title.is_empty() {
            if ctx.print_sql {
                writeln!(ctx.output, "-- {}", self.title)?;
            } else {
                writeln!(ctx.output, "{}", self.title)?;
            }
        }
        self.step.print(ctx)
    }
}

/// A unit of migration work.
#[derive(Debug, Clone)]
pub enum Step {
    /// One SQL statement.
    Sql(SqlExecStep),
    /// Children run in order.
    Sequence(Steps),
    /// Children run atomically when all of them allow a transaction.
    Transaction(Steps),
    /// Progress reporting around another step.
    Titled(TitledStep),
}

impl Step {
    /// Wraps `steps` in a transaction, if they allow one.
    pub fn transaction(steps: impl Into<Steps>) -> Self {
        Self::Transaction(steps.into())
    }

    /// Decorates `step` with a title.
    pub fn titled(title: impl Into<String>, step: impl Into<Step>) -> Self {
        Self::Titled(TitledStep {
            title: title.into(),
            step: Box::new(step.into()),
        })
    }

    /// The title, for titled steps.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Titled(t) => Some(&t.title),
            _ => None,
        }
    }

    /// Whether this step may run inside a transaction.
    #[must_use]
    pub fn allows_transaction(&self) -> bool {
        match self {
            Self::Sql(s) => !s.no_transaction,
            Self::Sequence(s) | Self::Transaction(s) => s.allows_transaction(),
            Self::Titled(t) => t.step.allows_transaction(),
        }
    }

    /// Executes the step against `ctx.db`.
    pub fn execute<'a>(&'a self, ctx: &'a mut ExecCtx<'_>) -> BoxFuture<'a, Result<()>> {
        async move {
            match self {
                Self::Sql(s) => s.execute(ctx).await,
                Self::Sequence(s) => s.execute(ctx).await,
                Self::Transaction(s) => execute_in_transaction(s, ctx).await,
                Self::Titled(t) => t.execute(ctx).await,
            }
        }
        .boxed()
    }

    /// Prints the step instead of executing it.
    pub fn print(&self, ctx: &mut PrintCtx<'_>) -> io::Result<()> {
        match self {
            Self::Sql(s) => s.print(ctx),
            Self::Sequence(s) => s.print(ctx),
            Self::Transaction(s) => {
                if s.is_empty() {
                    return Ok(());
                }
                let wrap = ctx.print_system_sql && s.allows_transaction();
                if wrap {
                    writeln!(ctx.output, "BEGIN;")?;
                }
                s.print(ctx)?;
                if wrap {
                    write!(ctx.output, "COMMIT;\n\n")?;
                }
                Ok(())
            }
            Self::Titled(t) => t.print(ctx),
        }
    }
}

impl From<SqlExecStep> for Step {
    fn from(step: SqlExecStep) -> Self {
        Self::Sql(step)
    }
}

impl From<Steps> for Step {
    fn from(steps: Steps) -> Self {
        Self::Sequence(steps)
    }
}

async fn execute_in_transaction(steps: &Steps, ctx: &mut ExecCtx<'_>) -> Result<()> {
    if steps.is_empty() {
        return Ok(());
    }
    if !steps.allows_transaction() {
        return steps.execute(ctx).await;
    }

    let tx = ctx.db.begin_tx().await?;
    let result = match AssertUnwindSafe(steps.execute(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(MigrateError::Panicked(panic_message(payload.as_ref()))),
    };

    match result {
        Ok(()) => ctx.db.commit(tx).await,
        Err(err) => {
            if let Err(rollback_err) = ctx.db.rollback(tx).await {
                warn!(error = %rollback_err, "Rollback failed");
                ctx.say(format_args!("Rollback error: {rollback_err}\n"));
            }
            Err(err)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, MemoryConnection};

    fn sql(query: &str) -> Step {
        SqlExecStep::new(query).into()
    }

    fn no_tx(query: &str) -> Step {
        SqlExecStep::new(query).no_transaction().into()
    }

    async fn run(step: &Step, conn: &MemoryConnection) -> (Result<()>, String) {
        let mut session = Session::new(conn.clone());
        let mut output = Vec::new();
        let result = {
            let mut ctx = ExecCtx::new(&mut session, &mut output);
            step.execute(&mut ctx).await
        };
        (result, String::from_utf8(output).unwrap())
    }

    fn print(step: &Step, print_sql: bool, print_system_sql: bool) -> String {
        let mut output = Vec::new();
        let mut ctx = PrintCtx {
            output: &mut output,
            print_sql,
            print_system_sql,
        };
        step.print(&mut ctx).unwrap();
        String::from_utf8(output).unwrap()
    }

    // =========================================================================
    // allows_transaction
    // =========================================================================

    #[test]
    fn test_allows_transaction() {
        assert!(sql("A").allows_transaction());
        assert!(!no_tx("A").allows_transaction());

        assert!(Step::from(Steps::new()).allows_transaction());
        assert!(Step::from(Steps::from(vec![sql("A"), sql("B")])).allows_transaction());
        assert!(!Step::from(Steps::from(vec![sql("A"), no_tx("B")])).allows_transaction());
        assert!(!Step::titled("t", no_tx("A")).allows_transaction());
    }

    // =========================================================================
    // execute
    // =========================================================================

    #[tokio::test]
    async fn test_sequence_stops_at_first_error() {
        let conn = MemoryConnection::new().fail_on("B");
        let step: Step = Steps::from(vec![sql("A"), sql("B"), sql("C")]).into();

        let (result, _) = run(&step, &conn).await;

        assert!(result.is_err());
        assert_eq!(conn.statements(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_transaction_commits() {
        let conn = MemoryConnection::new();
        let step = Step::transaction(vec![sql("A"), sql("B")]);

        let (result, _) = run(&step, &conn).await;

        assert!(result.is_ok());
        assert_eq!(
            conn.events(),
            vec![
                Event::Begin,
                Event::Exec("A".to_string()),
                Event::Exec("B".to_string()),
                Event::Commit
            ]
        );
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let conn = MemoryConnection::new().fail_on("B");
        let step = Step::transaction(vec![sql("A"), sql("B"), sql("C")]);

        let (result, _) = run(&step, &conn).await;

        assert!(matches!(result, Err(MigrateError::Connection(_))));
        assert_eq!(
            conn.events(),
            vec![Event::Begin, Event::Exec("A".to_string()), Event::Rollback]
        );
    }

    #[tokio::test]
    async fn test_transaction_skipped_when_not_allowed() {
        let conn = MemoryConnection::new();
        let step = Step::transaction(vec![sql("A"), no_tx("CREATE INDEX CONCURRENTLY")]);

        let (result, _) = run(&step, &conn).await;

        assert!(result.is_ok());
        assert_eq!(
            conn.events(),
            vec![
                Event::Exec("A".to_string()),
                Event::Exec("CREATE INDEX CONCURRENTLY".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_transaction_is_noop() {
        let conn = MemoryConnection::new();
        let (result, _) = run(&Step::transaction(Steps::new()), &conn).await;
        assert!(result.is_ok());
        assert!(conn.events().is_empty());
    }

    #[tokio::test]
    async fn test_nested_transactions_share_one_real_transaction() {
        let conn = MemoryConnection::new();
        let inner = Step::transaction(vec![sql("B")]);
        let step = Step::transaction(vec![sql("A"), inner]);

        let (result, _) = run(&step, &conn).await;

        assert!(result.is_ok());
        assert_eq!(
            conn.events(),
            vec![
                Event::Begin,
                Event::Exec("A".to_string()),
                Event::Exec("B".to_string()),
                Event::Commit
            ]
        );
    }

    #[tokio::test]
    async fn test_nested_failure_rolls_back_everything() {
        let conn = MemoryConnection::new().fail_on("C");
        let inner = Step::transaction(vec![sql("B"), sql("C")]);
        let step = Step::transaction(vec![sql("A"), inner]);

        let (result, _) = run(&step, &conn).await;

        assert!(result.is_err());
        assert_eq!(
            conn.events(),
            vec![
                Event::Begin,
                Event::Exec("A".to_string()),
                Event::Exec("B".to_string()),
                Event::Rollback
            ]
        );
    }

    #[tokio::test]
    async fn test_panic_rolls_back() {
        let conn = MemoryConnection::new();
        let step = Step::transaction(vec![sql("A"), sql("PANIC")]);

        let (result, _) = run(&step, &conn).await;

        assert!(matches!(result, Err(MigrateError::Panicked(msg)) if msg.contains("PANIC")));
        assert_eq!(
            conn.events(),
            vec![Event::Begin, Event::Exec("A".to_string()), Event::Rollback]
        );
    }

    #[tokio::test]
    async fn test_begin_failure_runs_nothing() {
        let conn = MemoryConnection::new().fail_begin();
        let step = Step::transaction(vec![sql("A")]);

        let (result, _) = run(&step, &conn).await;

        assert!(result.is_err());
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back() {
        let conn = MemoryConnection::new().fail_commit();
        let step = Step::transaction(vec![sql("A")]);

        let (result, _) = run(&step, &conn).await;

        assert!(matches!(result, Err(MigrateError::Connection(_))));
        assert_eq!(
            conn.events(),
            vec![Event::Begin, Event::Exec("A".to_string()), Event::Rollback]
        );
    }

    #[tokio::test]
    async fn test_titled_reports_result() {
        let conn = MemoryConnection::new();
        let (result, output) = run(&Step::titled("forward-migrate 1", sql("A")), &conn).await;
        assert!(result.is_ok());
        assert_eq!(output, "forward-migrate 1 ... OK\n");

        let conn = MemoryConnection::new().fail_on("A");
        let (result, output) = run(&Step::titled("forward-migrate 1", sql("A")), &conn).await;
        assert!(matches!(result, Err(MigrateError::Connection(_))));
        assert_eq!(output, "forward-migrate 1 ... FAILED\n");
    }

    #[tokio::test]
    async fn test_untitled_prints_nothing() {
        let conn = MemoryConnection::new();
        let (result, output) = run(&Step::titled("", sql("A")), &conn).await;
        assert!(result.is_ok());
        assert!(output.is_empty());
    }

    // =========================================================================
    // print
    // =========================================================================

    fn planned_step() -> Step {
        Step::titled(
            "forward-migrate 1_users.sql",
            Step::transaction(vec![
                sql("\n  CREATE TABLE users (id INTEGER);\n"),
                SqlExecStep::new("INSERT INTO migrations (name, time) VALUES (?, ?)")
                    .arg("1_users.sql")
                    .system()
                    .into(),
            ]),
        )
    }

    #[test]
    fn test_print_titles_only() {
        assert_eq!(print(&planned_step(), false, false), "forward-migrate 1_users.sql\n");
    }

    #[test]
    fn test_print_user_sql() {
        assert_eq!(
            print(&planned_step(), true, false),
            "-- forward-migrate 1_users.sql\nCREATE TABLE users (id INTEGER);\n\n"
        );
    }

    #[test]
    fn test_print_system_sql() {
        assert_eq!(
            print(&planned_step(), true, true),
            "-- forward-migrate 1_users.sql\n\
             BEGIN;\n\
             CREATE TABLE users (id INTEGER);\n\
             \n\
             INSERT INTO migrations (name, time) VALUES (?, ?)\n\
             QueryArgs: [\"1_users.sql\"]\n\
             \n\
             COMMIT;\n\n"
        );
    }

    #[test]
    fn test_print_skips_empty_query() {
        assert_eq!(print(&sql(""), true, true), "");
    }
}
