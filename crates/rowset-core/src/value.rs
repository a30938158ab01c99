//! Dynamic values exchanged between record collections, the cache and the
//! executor.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Number;

/// Separator of the identifier list encoding used for one-to-many and
/// many-to-many values (`"3|7|12"`).
pub const IDS_SEPARATOR: char = '|';

/// A dynamically-typed field value.
///
/// Relational values follow one rule: a many-to-one is an `Int` (or `Null`),
/// one-to-many and many-to-many are `Ids`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL NULL / never set.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer, also used for record identifiers.
    Int(i64),
    /// Double precision float.
    Double(f64),
    /// Text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Identifiers of related records.
    Ids(Vec<i64>),
}

impl Value {
    /// True if this value is `Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view. Booleans coerce to 0/1.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view. Integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Boolean view. Integers are truthy when non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Identifier list view. A single `Int` is a one-element list and `Null`
    /// the empty list, so many-to-one and x-to-many read the same way.
    pub fn as_ids(&self) -> Option<Vec<i64>> {
        match self {
            Value::Ids(ids) => Some(ids.clone()),
            Value::Int(id) => Some(vec![*id]),
            Value::Null => Some(Vec::new()),
            Value::Text(s) => decode_ids(s).ok(),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Ids(_) => "ids",
        }
    }

    /// Convert into a JSON value for typed-record deserialization.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(v) => serde_json::Value::Number((*v).into()),
            Value::Double(v) => {
                Number::from_f64(*v).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => {
                serde_json::Value::Array(b.iter().map(|x| serde_json::Value::from(*x)).collect())
            }
            Value::Ids(ids) => {
                serde_json::Value::Array(ids.iter().map(|x| serde_json::Value::from(*x)).collect())
            }
        }
    }

    /// Convert from a JSON value produced by serializing a typed record.
    ///
    /// Arrays of integers become `Ids`; objects and mixed arrays are rejected
    /// with a description of what was received.
    pub fn from_json(json: &serde_json::Value) -> std::result::Result<Self, String> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Double))
                .ok_or_else(|| format!("number {n} out of range")),
            serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| item.as_i64().ok_or_else(|| format!("non-integer item {item}")))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Ids),
            serde_json::Value::Object(_) => Err("nested objects are not field values".to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Ids(ids) => write!(f, "[{}]", encode_ids(ids)),
        }
    }
}

/// Encode identifiers as a `|`-joined list.
pub fn encode_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(&IDS_SEPARATOR.to_string())
}

/// Decode a `|`-joined identifier list. The empty string is the empty list.
pub fn decode_ids(encoded: &str) -> std::result::Result<Vec<i64>, String> {
    if encoded.trim().is_empty() {
        return Ok(Vec::new());
    }
    encoded
        .split(IDS_SEPARATOR)
        .map(|part| {
            part.trim()
                .parse::<i64>()
                .map_err(|e| format!("bad identifier `{part}`: {e}"))
        })
        .collect()
}

/// Remove duplicates while keeping the first occurrence order.
pub fn dedup_ids(ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Ids(v)
    }
}

impl From<&[i64]> for Value {
    fn from(v: &[i64]) -> Self {
        Value::Ids(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// An order-irrelevant mapping from field name to value.
///
/// Used as the input of create/write and as the per-record slate stored in
/// the cache.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldMap(BTreeMap<String, Value>);

impl FieldMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Insert a value, returning the previous one.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Get a value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Remove a value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// True if the field is present (even if `Null`).
    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Field names.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Iterate entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &Value) -> bool) {
        self.0.retain(|k, v| keep(k, v));
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rename keys according to `substitutions` (`from -> to`).
    pub fn substitute_keys(&mut self, substitutions: &BTreeMap<String, String>) {
        for (from, to) in substitutions {
            if let Some(value) = self.0.remove(from) {
                self.0.insert(to.clone(), value);
            }
        }
    }

    /// Convert into a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl IntoIterator for FieldMap {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
