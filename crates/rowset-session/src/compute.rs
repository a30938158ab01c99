//! Computed fields.
//!
//! Non-stored computed fields are evaluated after each fetch from the values
//! of their dependencies, which are added to the fetch list. Stored computed
//! fields live in a column and are recomputed whenever a create or write
//! touches one of their dependencies, using the registry's trigger map.

use std::collections::BTreeMap;

use rowset_core::{
    Error, FieldInfo, FieldMap, ID_FIELD, ModelInfo, Registry, Result, Row, Value, dedup_ids,
};
use rowset_query::{Condition, Operator, Query};

use crate::environment::Environment;

/// Columns to fetch and fields to compute for one read.
#[derive(Debug)]
pub(crate) struct FetchPlan<'r> {
    /// Fetch keys: `ID` first, then declared names and dependency paths.
    pub fetch: Vec<String>,
    /// Non-stored computed fields, dependencies first.
    pub computed: Vec<&'r FieldInfo>,
}

impl<'r> FetchPlan<'r> {
    /// Plan the read of `fields`.
    pub fn for_fields(
        registry: &'r Registry,
        model: &'r ModelInfo,
        fields: &[&'r FieldInfo],
    ) -> Result<Self> {
        let mut plan = Self::empty();
        for field in fields {
            plan.add_field(registry, model, field)?;
        }
        Ok(plan)
    }

    /// Plan the read of the dependencies of `field` only.
    pub fn for_inputs(
        registry: &'r Registry,
        model: &'r ModelInfo,
        field: &'r FieldInfo,
    ) -> Result<Self> {
        let mut plan = Self::empty();
        plan.add_inputs(registry, model, field)?;
        Ok(plan)
    }

    fn empty() -> Self {
        Self {
            fetch: vec![ID_FIELD.to_string()],
            computed: Vec::new(),
        }
    }

    fn push(&mut self, key: &str) {
        if !self.fetch.iter().any(|k| k == key) {
            self.fetch.push(key.to_string());
        }
    }

    fn add_field(
        &mut self,
        registry: &'r Registry,
        model: &'r ModelInfo,
        field: &'r FieldInfo,
    ) -> Result<()> {
        if field.is_retrievable() {
            self.push(&field.name);
        } else if field.is_computed() && !self.computed.iter().any(|c| c.name == field.name) {
            self.add_inputs(registry, model, field)?;
            self.computed.push(field);
        }
        Ok(())
    }

    fn add_inputs(
        &mut self,
        registry: &'r Registry,
        model: &'r ModelInfo,
        field: &'r FieldInfo,
    ) -> Result<()> {
        for dep in &field.depends {
            if dep.contains('.') {
                let steps = registry.resolve_path(model.name(), dep)?;
                if steps.last().is_some_and(|s| !s.field.is_retrievable()) {
                    return Err(Error::InvalidPath {
                        model: model.name().to_string(),
                        path: dep.clone(),
                        reason: "computed fields of related records cannot be fetched".to_string(),
                    });
                }
                self.push(dep);
            } else {
                self.add_field(registry, model, model.field_info(dep)?)?;
            }
        }
        Ok(())
    }
}

/// Turn a fetched row into a field map keyed by fetch keys, normalizing
/// every value to its field type.
pub(crate) fn scan_row(
    registry: &Registry,
    model: &ModelInfo,
    fetch: &[String],
    row: &Row,
) -> Result<(i64, FieldMap)> {
    let mut map = FieldMap::new();
    for (i, key) in fetch.iter().enumerate() {
        let raw = row.try_get(i)?.clone();
        let field = if key.contains('.') {
            registry
                .resolve_path(model.name(), key)?
                .last()
                .map(|s| s.field)
                .ok_or_else(|| Error::unknown_field(model.name(), key))?
        } else {
            model.field_info(key)?
        };
        let value = field.field_type.coerce(raw).map_err(|message| {
            tracing::error!(model = model.name(), field = %key, error = %message, "Scanned value does not fit field");
            Error::conversion(model.name(), key, message)
        })?;
        map.insert(key.clone(), value);
    }
    let id = map
        .get(ID_FIELD)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Scan(format!("row of `{}` without identifier", model.name())))?;
    Ok((id, map))
}

/// Evaluate one computed field from the values already in `row`.
pub(crate) fn evaluate(model: &ModelInfo, field: &FieldInfo, row: &FieldMap) -> Result<Value> {
    let Some(compute) = &field.compute else {
        return Ok(row.get(&field.name).cloned().unwrap_or_default());
    };
    let inputs: FieldMap = field
        .depends
        .iter()
        .map(|dep| {
            let value = row
                .get(dep)
                .or_else(|| {
                    model
                        .find_field(dep)
                        .and_then(|f| row.get(&f.name))
                })
                .cloned()
                .unwrap_or_default();
            (dep.clone(), value)
        })
        .collect();
    let value = compute(&inputs)?;
    field.field_type.coerce(value).map_err(|message| {
        tracing::error!(model = model.name(), field = %field.name, error = %message, "Computed value does not fit field");
        Error::conversion(model.name(), &field.name, message)
    })
}

/// Evaluate `computed` in order, storing each result in `row`.
pub(crate) fn apply(model: &ModelInfo, row: &mut FieldMap, computed: &[&FieldInfo]) -> Result<()> {
    for field in computed {
        let value = evaluate(model, field, row)?;
        row.insert(field.name.clone(), value);
    }
    Ok(())
}

/// React to a change of `changed` fields on records `ids` of `model`:
/// drop stale cached values of derived fields and recompute every stored
/// computed field depending on them.
pub(crate) fn propagate(
    env: &Environment,
    model: &str,
    ids: &[i64],
    changed: &[String],
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let registry = env.registry();
    let mut pending: BTreeMap<(String, String), Vec<i64>> = BTreeMap::new();
    for field in changed {
        for trigger in registry.triggers(model, field) {
            if !trigger.stored {
                env.cache_mut().invalidate_field(&trigger.model, &trigger.field);
                continue;
            }
            let targets = match &trigger.path {
                None => ids.to_vec(),
                Some(path) => {
                    env.pool(&trigger.model)?
                        .search(&Condition::leaf(
                            path.as_str(),
                            Operator::In,
                            Value::Ids(ids.to_vec()),
                        ))
                        .force_lazy_load()?
                        .ids()
                        .to_vec()
                }
            };
            pending
                .entry((trigger.model.clone(), trigger.field.clone()))
                .or_default()
                .extend(targets);
        }
    }
    for ((model, field), targets) in pending {
        let targets = dedup_ids(targets);
        if !targets.is_empty() {
            recompute_stored(env, &model, &targets, &field)?;
        }
    }
    Ok(())
}

/// Recompute and persist the stored computed `field` of `ids`.
#[tracing::instrument(level = "debug", skip(env, ids), fields(records = ids.len()))]
fn recompute_stored(env: &Environment, model: &str, ids: &[i64], field: &str) -> Result<()> {
    let registry = env.registry();
    let info = registry.get(model)?;
    let field_info = info.field_info(field)?;
    let plan = FetchPlan::for_inputs(registry, info, field_info)?;
    let (sql, params) = env.renderer(model)?.select(&Query::for_ids(ids), &plan.fetch)?;
    let rows = env.executor()?.query(&sql, &params)?;

    let mut values = Vec::with_capacity(rows.len());
    for row in &rows {
        let (id, mut map) = scan_row(registry, info, &plan.fetch, row)?;
        apply(info, &mut map, &plan.computed)?;
        values.push((id, evaluate(info, field_info, &map)?));
    }
    for (id, value) in values {
        env.pool(model)?
            .with_ids(&[id])
            .write(FieldMap::new().with(field_info.name.clone(), value))?;
    }
    Ok(())
}
