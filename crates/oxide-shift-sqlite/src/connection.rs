//! [`Connection`] over a single sqlx SQLite connection.

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Connection as _, Row as _, Sqlite, TypeInfo, ValueRef};

use oxide_shift_core::{Connection, Result, Row, Session, SqlValue};

/// One SQLite connection.
///
/// A pool would hand out a different connection per statement, which
/// breaks a transaction started with a plain `BEGIN`, so this holds exactly
/// one.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: sqlx::SqliteConnection,
}

impl SqliteConnection {
    /// Connects to `url`, e.g. `sqlite:app.db?mode=rwc` or `sqlite::memory:`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Database`] if the connection can't be opened.
    ///
    /// [`MigrateError::Database`]: oxide_shift_core::MigrateError::Database
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = sqlx::SqliteConnection::connect(url).await?;
        Ok(Self { conn })
    }

    /// Wraps the connection in a [`Session`].
    #[must_use]
    pub fn into_session(self) -> Session {
        Session::new(self)
    }
}

fn bind<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    args: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Timestamp(v) => query.bind(*v),
        };
    }
    query
}

fn decode_value(row: &SqliteRow, index: usize) -> Result<SqlValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get(index)?),
        "REAL" => SqlValue::Real(row.try_get(index)?),
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get(index)?;
            SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => SqlValue::Text(row.try_get(index)?),
    };
    Ok(value)
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
    (0..row.len()).map(|index| decode_value(row, index)).collect()
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        // SQLite runs every statement of a multi-statement string.
        let result = bind(sqlx::query(sql).persistent(false), args)
            .execute(&mut self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
        let rows = bind(sqlx::query(sql), args)
            .fetch_all(&mut self.conn)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn begin(&mut self) -> Result<()> {
        sqlx::query("BEGIN").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        sqlx::query("COMMIT").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
        Ok(())
    }
}
