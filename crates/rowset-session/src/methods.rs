//! Layered model methods.
//!
//! A method is defined per model and may be overridden any number of
//! times; each definition becomes a new layer on top of the previous ones.
//! [`RecordCollection::call`](crate::RecordCollection::call) runs the top
//! layer and [`RecordCollection::super_call`](crate::RecordCollection::super_call)
//! runs the layer right below the one currently executing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rowset_core::{Result, Value};

use crate::recordset::RecordCollection;

/// One method layer.
pub type MethodFn =
    Arc<dyn for<'env> Fn(&RecordCollection<'env>, &[Value]) -> Result<Value> + Send + Sync>;

/// A method invocation on the call stack of a record collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Method name.
    pub method: String,
    /// Index of the layer being executed, 0 being the base definition.
    pub layer: usize,
}

/// Method layers of every model.
#[derive(Clone, Default)]
pub struct MethodTable {
    layers: HashMap<(String, String), Vec<MethodFn>>,
}

impl MethodTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer for `method` on `model`, overriding the previous ones.
    pub fn define<F>(mut self, model: &str, method: &str, body: F) -> Self
    where
        F: for<'env> Fn(&RecordCollection<'env>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.layers
            .entry((model.to_string(), method.to_string()))
            .or_default()
            .push(Arc::new(body));
        self
    }

    /// Layers of `method` on `model`, base first.
    pub fn layers(&self, model: &str, method: &str) -> &[MethodFn] {
        self.layers
            .get(&(model.to_string(), method.to_string()))
            .map_or(&[], Vec::as_slice)
    }

    /// True if `model` defines `method`.
    pub fn has_method(&self, model: &str, method: &str) -> bool {
        !self.layers(model, method).is_empty()
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self
            .layers
            .iter()
            .map(|((model, method), layers)| format!("{model}.{method}x{}", layers.len()))
            .collect();
        methods.sort();
        f.debug_struct("MethodTable")
            .field("methods", &methods)
            .finish()
    }
}
