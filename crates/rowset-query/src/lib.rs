//! Condition trees and SQL rendering for rowset.
//!
//! `rowset-query` is the **query layer**. It turns the pure, cloneable query
//! shape carried by record collections into SQL text plus positional
//! parameters, using the registry to resolve dotted field paths into joins
//! and relational fields into sub-selects.
//!
//! - [`Condition`]: immutable AND/OR/NOT tree of `field operator value` leaves.
//! - [`Query`]: condition plus ordering, grouping, paging and distinct.
//! - [`QueryRenderer`]: SELECT / COUNT / INSERT / UPDATE / DELETE and
//!   many-to-many link maintenance for one model and [`Dialect`].
//!
//! Values are never interpolated into SQL text.

pub mod condition;
pub mod expr;
pub mod query;
pub mod render;

pub use condition::{Condition, Node, Predicate};
pub use expr::{Dialect, Operator};
pub use query::Query;
pub use render::{QueryRenderer, Statement};
