//! The executor contract.
//!
//! The engine never talks to a driver directly. It renders SQL with
//! positional placeholders and hands it to an [`Executor`], which is the only
//! component performing I/O. Each call blocks until the database answers;
//! statement timeouts and cancellation belong to the implementation.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Runs rendered statements against a database.
///
/// Implementations must bind `params` positionally and must not interpolate
/// them into the SQL text.
pub trait Executor {
    /// Run a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run an INSERT and return the generated identifier.
    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Run a query expected to return a single scalar, e.g. `COUNT(*)`.
    fn query_scalar(&self, sql: &str, params: &[Value]) -> Result<Value> {
        let rows = self.query(sql, params)?;
        Ok(rows
            .first()
            .and_then(|row| row.get(0))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        (**self).insert(sql, params)
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        (**self).insert(sql, params)
    }
}
