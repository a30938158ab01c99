//! Field metadata.
//!
//! A [`FieldInfo`] describes one field of a model: where it lives in the
//! database, how its values are typed, whether it is computed and which
//! other fields it depends on.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identifiers::snake_case;
use crate::value::{FieldMap, Value, decode_ids};

/// Computes a field value from the already-fetched values of its
/// dependencies (keyed by dependency path).
pub type ComputeFn = Arc<dyn Fn(&FieldMap) -> Result<Value> + Send + Sync>;

/// Join table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTable {
    /// The link table name, e.g. `"post_tag_rel"`.
    pub table: String,
    /// Column pointing to the owning model, e.g. `"post_id"`.
    pub local_column: String,
    /// Column pointing to the related model, e.g. `"tag_id"`.
    pub remote_column: String,
}

impl LinkTable {
    /// Create a link-table definition.
    pub fn new(
        table: impl Into<String>,
        local_column: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            local_column: local_column.into(),
            remote_column: remote_column.into(),
        }
    }

    /// The same table seen from the other side of the relation.
    pub fn mirrored(&self) -> Self {
        Self::new(&self.table, &self.remote_column, &self.local_column)
    }
}

/// The type of a field, including the relation kind for relational fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Integer,
    Float,
    Text,
    Binary,
    /// Foreign key column holding one identifier of `model`.
    Many2One { model: String },
    /// Reverse of a `Many2One` named `reverse_field` on `model`.
    One2Many { model: String, reverse_field: String },
    /// Relation through a link table. `link` is filled in by the registry
    /// when left to its default.
    Many2Many {
        model: String,
        link: Option<LinkTable>,
    },
}

impl FieldType {
    /// The related model for relational types.
    pub fn relation_model(&self) -> Option<&str> {
        match self {
            FieldType::Many2One { model }
            | FieldType::One2Many { model, .. }
            | FieldType::Many2Many { model, .. } => Some(model),
            _ => None,
        }
    }

    /// True for one-to-many and many-to-many.
    pub const fn is_x2many(&self) -> bool {
        matches!(self, FieldType::One2Many { .. } | FieldType::Many2Many { .. })
    }

    /// True for many-to-one.
    pub const fn is_many2one(&self) -> bool {
        matches!(self, FieldType::Many2One { .. })
    }

    /// Normalize `value` to this type.
    ///
    /// `Null` is accepted for every type. Relational types accept any shape
    /// that [`Value::as_ids`] understands.
    pub fn coerce(&self, value: Value) -> std::result::Result<Value, String> {
        if value.is_null() {
            return Ok(match self {
                FieldType::One2Many { .. } | FieldType::Many2Many { .. } => Value::Ids(Vec::new()),
                _ => Value::Null,
            });
        }
        let mismatch = |v: &Value| format!("expected {self}, received {}", v.type_name());
        match self {
            FieldType::Boolean => value.as_bool().map(Value::Bool).ok_or_else(|| mismatch(&value)),
            FieldType::Integer => match value {
                Value::Int(_) => Ok(value),
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                other => Err(mismatch(&other)),
            },
            FieldType::Float => value.as_f64().map(Value::Double).ok_or_else(|| mismatch(&value)),
            FieldType::Text => match value {
                Value::Text(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            FieldType::Binary => match value {
                Value::Bytes(_) => Ok(value),
                Value::Text(s) => Ok(Value::Bytes(s.into_bytes())),
                other => Err(mismatch(&other)),
            },
            FieldType::Many2One { .. } => match value {
                Value::Int(_) => Ok(value),
                Value::Ids(ids) if ids.len() <= 1 => {
                    Ok(ids.first().copied().map_or(Value::Null, Value::Int))
                }
                other => Err(mismatch(&other)),
            },
            FieldType::One2Many { .. } | FieldType::Many2Many { .. } => match value {
                Value::Text(s) => decode_ids(&s).map(Value::Ids),
                other => other.as_ids().map(Value::Ids).ok_or_else(|| mismatch(&other)),
            },
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Integer => f.write_str("integer"),
            FieldType::Float => f.write_str("float"),
            FieldType::Text => f.write_str("text"),
            FieldType::Binary => f.write_str("binary"),
            FieldType::Many2One { model } => write!(f, "many2one({model})"),
            FieldType::One2Many { model, .. } => write!(f, "one2many({model})"),
            FieldType::Many2Many { model, .. } => write!(f, "many2many({model})"),
        }
    }
}

/// Metadata about a model field.
#[derive(Clone)]
pub struct FieldInfo {
    /// Declared name, e.g. `"UserName"`.
    pub name: String,
    /// Column (and JSON) name, e.g. `"user_name"`.
    pub column: String,
    /// Value type and relation kind.
    pub field_type: FieldType,
    /// Whether the value is persisted. Computed fields default to `false`.
    pub stored: bool,
    /// Dotted path this field mirrors, e.g. `"Profile.Age"`.
    pub related: Option<String>,
    /// Computation for computed fields.
    pub compute: Option<ComputeFn>,
    /// Paths whose change must trigger recomputation.
    pub depends: Vec<String>,
}

impl FieldInfo {
    /// Create a stored field. The column defaults to the snake-case name,
    /// suffixed with `_id` for many-to-one fields.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let column = match field_type {
            FieldType::Many2One { .. } => format!("{}_id", snake_case(&name)),
            _ => snake_case(&name),
        };
        Self {
            name,
            column,
            field_type,
            stored: true,
            related: None,
            compute: None,
            depends: Vec::new(),
        }
    }

    /// Shorthand for a boolean field.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    /// Shorthand for an integer field.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    /// Shorthand for a float field.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    /// Shorthand for a text field.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    /// Shorthand for a many-to-one field.
    pub fn many2one(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(name, FieldType::Many2One { model: model.into() })
    }

    /// Shorthand for a one-to-many field.
    pub fn one2many(
        name: impl Into<String>,
        model: impl Into<String>,
        reverse_field: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            FieldType::One2Many {
                model: model.into(),
                reverse_field: reverse_field.into(),
            },
        )
    }

    /// Shorthand for a many-to-many field with a default link table.
    pub fn many2many(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::Many2Many {
                model: model.into(),
                link: None,
            },
        )
    }

    /// A field mirroring the value at `path`. Its type is resolved by the
    /// registry.
    pub fn related(name: impl Into<String>, path: impl Into<String>) -> Self {
        let mut field = Self::new(name, FieldType::Text);
        field.related = Some(path.into());
        field.stored = false;
        field
    }

    /// Set the column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Set the link table of a many-to-many field.
    pub fn link_table(mut self, link: LinkTable) -> Self {
        if let FieldType::Many2Many { link: slot, .. } = &mut self.field_type {
            *slot = Some(link);
        }
        self
    }

    /// Make this a computed field. It is not stored unless [`stored`](Self::stored)
    /// is called afterwards.
    pub fn compute<F>(mut self, depends: &[&str], compute: F) -> Self
    where
        F: Fn(&FieldMap) -> Result<Value> + Send + Sync + 'static,
    {
        self.compute = Some(Arc::new(compute));
        self.depends = depends.iter().map(|d| (*d).to_string()).collect();
        self.stored = false;
        self
    }

    /// Set the stored flag.
    pub fn stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    /// True if the field has a column in the model's table.
    pub fn has_column(&self) -> bool {
        self.stored && self.related.is_none() && !self.field_type.is_x2many()
    }

    /// True if create/write may carry a value for this field.
    pub fn is_writable(&self) -> bool {
        self.has_column() || matches!(self.field_type, FieldType::Many2Many { .. })
    }

    /// True if the select query can fetch this field (column, join or
    /// sub-select). Non-stored computed fields are evaluated after the fetch.
    pub fn is_retrievable(&self) -> bool {
        self.has_column() || self.related.is_some() || self.field_type.is_x2many()
    }

    /// True for computed fields.
    pub fn is_computed(&self) -> bool {
        self.compute.is_some()
    }

    /// True if `name` is the declared or the column name of this field.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.column == name
    }
}

impl fmt::Debug for FieldInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldInfo")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("field_type", &self.field_type)
            .field("stored", &self.stored)
            .field("related", &self.related)
            .field("computed", &self.compute.is_some())
            .field("depends", &self.depends)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_columns() {
        assert_eq!(FieldInfo::text("UserName").column, "user_name");
        assert_eq!(FieldInfo::many2one("Profile", "Profile").column, "profile_id");
        assert_eq!(FieldInfo::integer("Age").column("years").column, "years");
    }

    #[test]
    fn test_storage_classification() {
        let name = FieldInfo::text("Name");
        assert!(name.has_column() && name.is_writable() && name.is_retrievable());

        let tags = FieldInfo::many2many("Tags", "Tag");
        assert!(!tags.has_column());
        assert!(tags.is_writable());
        assert!(tags.is_retrievable());

        let posts = FieldInfo::one2many("Posts", "Post", "User");
        assert!(!posts.is_writable());
        assert!(posts.is_retrievable());

        let computed = FieldInfo::integer("Double").compute(&["Age"], |m| {
            Ok(Value::Int(m.get("Age").and_then(Value::as_i64).unwrap_or(0) * 2))
        });
        assert!(!computed.is_retrievable());
        assert!(computed.clone().stored(true).has_column());

        let related = FieldInfo::related("ProfileAge", "Profile.Age");
        assert!(!related.is_writable());
        assert!(related.is_retrievable());
    }

    #[test]
    fn test_coerce() {
        assert_eq!(FieldType::Boolean.coerce(Value::Int(1)), Ok(Value::Bool(true)));
        assert_eq!(FieldType::Float.coerce(Value::Int(2)), Ok(Value::Double(2.0)));
        assert!(FieldType::Integer.coerce(Value::from("12")).is_err());

        let m2o = FieldType::Many2One {
            model: "Profile".into(),
        };
        assert_eq!(m2o.coerce(Value::Ids(vec![4])), Ok(Value::Int(4)));
        assert_eq!(m2o.coerce(Value::Ids(vec![])), Ok(Value::Null));
        assert!(m2o.coerce(Value::Ids(vec![1, 2])).is_err());

        let m2m = FieldType::Many2Many {
            model: "Tag".into(),
            link: None,
        };
        assert_eq!(m2m.coerce(Value::from("1|2")), Ok(Value::Ids(vec![1, 2])));
        assert_eq!(m2m.coerce(Value::Null), Ok(Value::Ids(vec![])));
    }

    #[test]
    fn test_field_type_serializes_with_kind_tag() {
        let json = serde_json::to_value(FieldType::Many2One {
            model: "Profile".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"kind": "many2one", "model": "Profile"}));
        let back: FieldType = serde_json::from_value(json).unwrap();
        assert!(back.is_many2one());
    }

    #[test]
    fn test_link_table_mirror() {
        let link = LinkTable::new("post_tag_rel", "post_id", "tag_id");
        let mirror = link.mirrored();
        assert_eq!(mirror.local_column, "tag_id");
        assert_eq!(mirror.remote_column, "post_id");
    }
}
