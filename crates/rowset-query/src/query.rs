//! Query shape.
//!
//! A [`Query`] is a plain value: condition, ordering, grouping, paging and
//! the distinct flag. Chained record collections clone it on every step, so
//! two branches of a chain never observe each other's changes. Turning a
//! query into SQL is the job of [`QueryRenderer`](crate::render::QueryRenderer).

use crate::condition::Condition;
use crate::expr::Operator;
use rowset_core::Value;

/// The shape of a record-set query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    condition: Condition,
    order_by: Vec<String>,
    group_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: bool,
}

impl Query {
    /// A query matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// A query matching exactly `ids`.
    pub fn for_ids(ids: &[i64]) -> Self {
        Self::new().filter(&Condition::leaf(
            rowset_core::ID_FIELD,
            Operator::In,
            Value::Ids(ids.to_vec()),
        ))
    }

    /// AND `cond` into the condition.
    pub fn filter(mut self, cond: &Condition) -> Self {
        self.condition = self.condition.and_cond(cond);
        self
    }

    /// Append ORDER BY expressions (`"Field"`, `"Path.Field desc"`).
    pub fn order_by<S: AsRef<str>>(mut self, exprs: &[S]) -> Self {
        self.order_by.extend(exprs.iter().map(|e| e.as_ref().to_string()));
        self
    }

    /// Append GROUP BY expressions.
    pub fn group_by<S: AsRef<str>>(mut self, exprs: &[S]) -> Self {
        self.group_by.extend(exprs.iter().map(|e| e.as_ref().to_string()));
        self
    }

    /// Set LIMIT.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set OFFSET.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Set the DISTINCT flag.
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// The condition.
    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn order_exprs(&self) -> &[String] {
        &self.order_by
    }

    pub fn group_exprs(&self) -> &[String] {
        &self.group_by
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// True if the query has no condition. Paging does not bound UPDATE or
    /// DELETE, so it is not considered.
    pub fn is_unbounded(&self) -> bool {
        self.condition.is_empty()
    }
}
