//! Per-environment record cache.
//!
//! The cache maps `(model, id)` to the full field slate fetched for that
//! record. A read replaces the whole slate at once, so one record never
//! mixes values from two different fetches. A field that is absent from the
//! slate was never fetched; a field present with [`Value::Null`] was fetched
//! as null.

use std::collections::HashMap;

use rowset_core::{FieldMap, Value};

/// Field values of the records read in one environment.
#[derive(Debug, Default)]
pub struct Cache {
    entries: HashMap<(String, i64), FieldMap>,
}

impl Cache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slate of `(model, id)` with `fields`.
    pub fn add_entry(&mut self, model: &str, id: i64, fields: FieldMap) {
        self.entries.insert((model.to_string(), id), fields);
    }

    /// Cached value of one field, `None` if never fetched.
    pub fn get(&self, model: &str, id: i64, field: &str) -> Option<&Value> {
        self.get_record(model, id).and_then(|slate| slate.get(field))
    }

    /// Cached slate of one record.
    pub fn get_record(&self, model: &str, id: i64) -> Option<&FieldMap> {
        self.entries.get(&(model.to_string(), id))
    }

    /// True only if every field is cached for every id.
    pub fn check_if_in_cache<S: AsRef<str>>(&self, model: &str, ids: &[i64], fields: &[S]) -> bool {
        ids.iter().all(|id| {
            self.get_record(model, *id)
                .is_some_and(|slate| fields.iter().all(|f| slate.contains_key(f.as_ref())))
        })
    }

    /// Drop the slates of `ids`.
    pub fn invalidate_records(&mut self, model: &str, ids: &[i64]) {
        for id in ids {
            self.entries.remove(&(model.to_string(), *id));
        }
    }

    /// Drop `field` from every cached record of `model`.
    pub fn invalidate_field(&mut self, model: &str, field: &str) {
        for ((m, _), slate) in &mut self.entries {
            if m == model {
                slate.remove(field);
            }
        }
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
