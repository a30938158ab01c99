//! Record-set ORM core.
//!
//! Models are declared at runtime in a [`Registry`]. Queries are built as
//! immutable [`Condition`] trees and run lazily through
//! [`RecordCollection`]s bound to an [`Environment`], which owns the
//! transaction, the per-field cache and the layered model methods.
//!
//! ```ignore
//! use rowset::prelude::*;
//!
//! let registry = Arc::new(
//!     Registry::builder()
//!         .model(ModelInfo::new("User").field(FieldInfo::text("Name")))
//!         .finalize()?,
//! );
//! let executor = SqliteExecutor::open_memory()?;
//! let env = Environment::with_config(
//!     registry,
//!     Box::new(executor),
//!     EnvironmentConfig::default().dialect(Dialect::Sqlite),
//! )?;
//! let jo = env.pool("User")?.create(FieldMap::new().with("Name", "jo"))?;
//! assert_eq!(jo.get("Name")?, Value::from("jo"));
//! env.commit()?;
//! ```
//!
//! # Crates
//!
//! - `rowset-core`: values, field and model metadata, the registry, errors
//!   and the [`Executor`] contract.
//! - `rowset-query`: conditions, queries and SQL rendering.
//! - `rowset-session`: environment, cache, record collections, computed
//!   fields and method layers.
//! - `rowset-sqlite` (feature `sqlite`): a rusqlite executor.

pub use rowset_core::{
    ComputeFn, Error, Executor, FieldInfo, FieldMap, FieldType, ID_COLUMN, ID_FIELD, LinkTable,
    ModelInfo, PathStep, Registry, RegistryBuilder, Result, Row, Trigger, Value,
    default_link_table,
};
pub use rowset_query::{Condition, Dialect, Node, Operator, Predicate, Query, QueryRenderer};
pub use rowset_session::{
    Cache, Environment, EnvironmentConfig, Frame, MethodFn, MethodTable, RecordCollection,
    TypedRecord, from_field_map, to_field_map,
};

#[cfg(feature = "sqlite")]
pub use rowset_sqlite::{SqliteConfig, SqliteExecutor};

/// Everything needed to declare models and work with records.
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::{
        Condition, Dialect, Environment, EnvironmentConfig, Error, Executor, FieldInfo, FieldMap,
        FieldType, MethodTable, ModelInfo, Operator, RecordCollection, Registry, Result,
        TypedRecord, Value,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::{SqliteConfig, SqliteExecutor};
}
