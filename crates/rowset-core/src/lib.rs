//! Core types for rowset.
//!
//! `rowset-core` is the **foundation layer**. Every other crate builds on the
//! data model and contracts defined here.
//!
//! # Role In The Architecture
//!
//! - **Data model**: [`Value`], [`FieldMap`] and [`Row`] carry field values
//!   between record collections, the cache and the database.
//! - **Executor contract**: [`Executor`] is the single seam through which
//!   rendered SQL reaches a database. Drivers implement it.
//! - **Model metadata**: [`ModelInfo`], [`FieldInfo`] and the finalized
//!   [`Registry`] describe tables, relations, computed fields and the reverse
//!   dependency map of stored computed fields.
//!
//! # Who Uses This Crate
//!
//! - `rowset-query` renders SQL from registry metadata and condition trees.
//! - `rowset-session` runs record collections over an [`Executor`].
//! - `rowset-sqlite` implements [`Executor`] for SQLite.

pub mod connection;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod registry;
pub mod row;
pub mod value;

pub use connection::Executor;
pub use error::{Error, Result};
pub use field::{ComputeFn, FieldInfo, FieldType, LinkTable};
pub use identifiers::{is_valid_identifier, is_valid_path, quote_ident, quote_ident_mysql, snake_case};
pub use registry::{
    ID_COLUMN, ID_FIELD, ModelInfo, PathStep, Registry, RegistryBuilder, Trigger,
    default_link_table,
};
pub use row::Row;
pub use value::{FieldMap, IDS_SEPARATOR, Value, decode_ids, dedup_ids, encode_ids};
