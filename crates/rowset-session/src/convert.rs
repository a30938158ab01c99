//! Conversion between field maps and typed records.
//!
//! A typed record is any serde type whose JSON field names are the column
//! names of the model (`user_name`, `profile_id`, `tags`). Relational lists
//! travel as arrays of identifiers, many-to-one as a single identifier.

use rowset_core::{Error, FieldMap, FieldType, ModelInfo, Result, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A statically typed view of a model's records.
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Default)]
/// struct User {
///     id: i64,
///     user_name: String,
///     profile_id: Option<i64>,
/// }
///
/// impl TypedRecord for User {
///     fn set_id(&mut self, id: i64) {
///         self.id = id;
///     }
/// }
/// ```
pub trait TypedRecord: Serialize + DeserializeOwned {
    /// Receive the identifier generated on creation.
    fn set_id(&mut self, id: i64);
}

/// Serialize `record` into a field map keyed by declared field names.
pub fn to_field_map<T: Serialize>(model: &ModelInfo, record: &T) -> Result<FieldMap> {
    let json = serde_json::to_value(record)?;
    let serde_json::Value::Object(object) = json else {
        tracing::error!(model = model.name(), "Typed record is not a struct");
        return Err(Error::conversion(
            model.name(),
            "*",
            "typed records must serialize to an object",
        ));
    };
    let mut map = FieldMap::new();
    for (key, json) in &object {
        let field = model.field_info(key)?;
        let value = match (&field.field_type, json) {
            (FieldType::Binary, serde_json::Value::Array(items)) => items
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(Value::Bytes)
                .ok_or_else(|| "expected an array of bytes".to_string()),
            _ => Value::from_json(json),
        }
        .map_err(|message| {
            tracing::error!(model = model.name(), field = %field.name, error = %message, "Cannot convert typed record");
            Error::conversion(model.name(), &field.name, message)
        })?;
        map.insert(field.name.clone(), value);
    }
    Ok(map)
}

/// Build a typed record from a cached slate keyed by declared field names.
pub fn from_field_map<T: DeserializeOwned>(model: &ModelInfo, slate: &FieldMap) -> Result<T> {
    let mut object = serde_json::Map::new();
    for (name, value) in slate.iter() {
        if let Some(field) = model.find_field(name) {
            object.insert(field.column.clone(), value.to_json());
        }
    }
    serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
        tracing::error!(model = model.name(), error = %e, "Cannot build typed record");
        Error::Serde(e)
    })
}
