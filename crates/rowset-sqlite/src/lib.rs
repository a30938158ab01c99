//! SQLite executor for rowset.
//!
//! Wraps a [`rusqlite::Connection`]. Statements are prepared through the
//! connection's statement cache and parameters are bound positionally, so
//! it pairs with `Dialect::Sqlite` (`?1`, `?2`, ...).
//!
//! Identifier lists ([`Value::Ids`]) are bound as `|`-joined text, the same
//! encoding the aggregated relational columns come back in.

mod config;

pub use config::SqliteConfig;

use std::sync::Arc;

use rowset_core::{Error, Executor, Result, Row, Value, encode_ids};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};

/// An [`Executor`] over one SQLite connection.
#[derive(Debug)]
pub struct SqliteExecutor {
    conn: Connection,
    config: SqliteConfig,
}

impl SqliteExecutor {
    /// Open a connection as configured.
    #[tracing::instrument(level = "debug", skip(config), fields(path = ?config.path))]
    pub fn open(config: SqliteConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| database_error("open", &e))?;
        conn.busy_timeout(config.busy_timeout)
            .map_err(|e| database_error("busy_timeout", &e))?;
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)
            .map_err(|e| database_error("PRAGMA foreign_keys", &e))?;
        tracing::info!(memory = config.is_memory(), "SQLite connection opened");
        Ok(Self { conn, config })
    }

    /// Open a private in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(SqliteConfig::default())
    }

    /// The configuration the connection was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Run several `;`-separated statements without parameters, e.g. a
    /// schema script.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| database_error(sql, &e))
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Executor for SqliteExecutor {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::trace!(sql, params = params.len(), "SQLite query");
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| database_error(sql, &e))?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sql)))
            .map_err(|e| database_error(sql, &e))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| database_error(sql, &e))? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let value = row.get_ref(i).map_err(|e| database_error(sql, &e))?;
                values.push(from_sql(value));
            }
            out.push(Row::new(Arc::clone(&columns), values));
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::trace!(sql, params = params.len(), "SQLite execute");
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| database_error(sql, &e))?;
        let affected = stmt
            .execute(params_from_iter(params.iter().map(to_sql)))
            .map_err(|e| database_error(sql, &e))?;
        Ok(affected as u64)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.execute(sql, params)?;
        Ok(self.conn.last_insert_rowid())
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(n) => SqlValue::Integer(*n),
        Value::Double(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Ids(ids) => SqlValue::Text(encode_ids(ids)),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(f) => Value::Double(f),
        ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn database_error(sql: &str, e: &rusqlite::Error) -> Error {
    tracing::error!(sql, error = %e, "SQLite statement failed");
    Error::Database(e.to_string())
}
