//! Result rows returned by an [`Executor`](crate::Executor).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::Value;

/// One row of a result set: column names shared across the set, values by
/// position.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row. `columns` is usually shared by every row of one result.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of a named column.
    pub fn get_named(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Value at a position, or a scan error naming the position.
    pub fn try_get(&self, index: usize) -> Result<&Value> {
        self.get(index).ok_or_else(|| {
            Error::Scan(format!(
                "column index {index} out of range for row of {} columns",
                self.values.len()
            ))
        })
    }
}
