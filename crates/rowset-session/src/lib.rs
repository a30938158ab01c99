//! Environment, cache and record collections for rowset.
//!
//! An [`Environment`] wraps one transaction: an executor, the per-field
//! [`Cache`] and the layered [`MethodTable`]. Record collections are cheap
//! values borrowing the environment; they build queries without I/O and
//! read or write through the executor only when asked.
//!
//! # Example
//!
//! ```ignore
//! let env = Environment::new(registry, Box::new(executor))?;
//! let adults = env
//!     .pool("User")?
//!     .filter("Age", Operator::GreaterOrEqual, 18)
//!     .order_by(&["UserName"])
//!     .load()?;
//! for user in adults.records()? {
//!     println!("{}", user.get("UserName")?);
//! }
//! env.commit()?;
//! ```

mod cache;
mod compute;
mod convert;
mod environment;
mod methods;
mod recordset;

pub use cache::Cache;
pub use convert::{TypedRecord, from_field_map, to_field_map};
pub use environment::{Environment, EnvironmentConfig};
pub use methods::{Frame, MethodFn, MethodTable};
pub use recordset::RecordCollection;
