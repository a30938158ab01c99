//! Record collections.
//!
//! A [`RecordCollection`] is an immutable value: a model, a query, and once
//! resolved the identifiers the query matched. Shape methods (`filter`,
//! `order_by`, `limit`, ...) return a new collection and never touch the
//! database. Values are read through the environment cache, which is
//! filled by [`read`](RecordCollection::read) and consulted by
//! [`get`](RecordCollection::get).

use std::collections::BTreeMap;
use std::fmt;

use rowset_core::{
    Error, FieldInfo, FieldMap, FieldType, ID_FIELD, ModelInfo, Result, Value, dedup_ids,
};
use rowset_query::{Condition, Operator, Query};
use serde::de::DeserializeOwned;

use crate::compute::{self, FetchPlan};
use crate::convert::{self, TypedRecord};
use crate::environment::Environment;
use crate::methods::Frame;

/// An ordered set of records of one model, bound to an environment.
#[derive(Clone)]
pub struct RecordCollection<'env> {
    env: &'env Environment,
    model: &'env ModelInfo,
    ids: Vec<i64>,
    resolved: bool,
    query: Query,
    call_stack: Vec<Frame>,
}

impl<'env> RecordCollection<'env> {
    pub(crate) fn new(env: &'env Environment, model: &'env ModelInfo) -> Self {
        Self {
            env,
            model,
            ids: Vec::new(),
            resolved: false,
            query: Query::new(),
            call_stack: Vec::new(),
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// The environment this collection reads through.
    pub fn env(&self) -> &'env Environment {
        self.env
    }

    /// The model metadata.
    pub fn model(&self) -> &'env ModelInfo {
        self.model
    }

    /// The model name.
    pub fn model_name(&self) -> &'env str {
        self.model.name()
    }

    /// Identifiers known so far. Empty until the collection is resolved.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Number of known identifiers.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when no identifier is known.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether the identifiers have been fetched or given.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// The query this collection stands for.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// A resolved collection of the same model holding exactly `ids`
    /// (duplicates dropped, first occurrence kept).
    pub fn with_ids(&self, ids: &[i64]) -> Self {
        let ids = dedup_ids(ids.iter().copied());
        Self {
            env: self.env,
            model: self.model,
            query: Query::for_ids(&ids),
            ids,
            resolved: true,
            call_stack: self.call_stack.clone(),
        }
    }

    /// Same collection with another query. A resolved collection falls
    /// back to unresolved; its query already holds `ID IN (ids)`, so the
    /// next fetch can only narrow the known records.
    fn with_query(&self, query: Query) -> Self {
        let mut rc = self.clone();
        rc.query = query;
        rc.ids.clear();
        rc.resolved = false;
        rc
    }

    // ========================================================================
    // Shape
    // ========================================================================

    /// Narrow to records where `field op value`.
    pub fn filter(&self, field: &str, op: Operator, value: impl Into<Value>) -> Self {
        self.search(&Condition::leaf(field, op, value))
    }

    /// Narrow to records where NOT `field op value`.
    pub fn exclude(&self, field: &str, op: Operator, value: impl Into<Value>) -> Self {
        self.search(&Condition::leaf(field, op, value).not())
    }

    /// Narrow with a whole condition.
    pub fn search(&self, cond: &Condition) -> Self {
        self.with_query(self.query.clone().filter(cond))
    }

    pub fn order_by(&self, exprs: &[&str]) -> Self {
        self.with_query(self.query.clone().order_by(exprs))
    }

    pub fn group_by(&self, exprs: &[&str]) -> Self {
        self.with_query(self.query.clone().group_by(exprs))
    }

    pub fn limit(&self, limit: u64) -> Self {
        self.with_query(self.query.clone().limit(limit))
    }

    pub fn offset(&self, offset: u64) -> Self {
        self.with_query(self.query.clone().offset(offset))
    }

    pub fn distinct(&self) -> Self {
        self.with_query(self.query.clone().distinct(true))
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Resolve the identifiers unless already resolved.
    pub fn lazy_load(&self) -> Result<Self> {
        if self.resolved {
            return Ok(self.clone());
        }
        self.force_lazy_load()
    }

    /// Run the query for identifiers only. The cache is left untouched.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub fn force_lazy_load(&self) -> Result<Self> {
        let (sql, params) = self
            .env
            .renderer(self.model.name())?
            .select(&self.query, &[ID_FIELD])?;
        let rows = self.env.executor()?.query(&sql, &params)?;
        let ids = rows
            .iter()
            .map(|row| {
                row.try_get(0)?.as_i64().ok_or_else(|| {
                    Error::Scan(format!("non-integer identifier in `{}`", self.model.name()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.with_ids(&ids))
    }

    /// Read every field into the cache.
    pub fn load(&self) -> Result<Self> {
        self.read(&[])
    }

    /// Fetch `fields` (all fields when empty) of the matching records into
    /// the cache and return the collection of the fetched records.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub fn read(&self, fields: &[&str]) -> Result<Self> {
        if self.resolved && self.ids.is_empty() {
            return Ok(self.clone());
        }
        let registry = self.env.registry();
        let requested: Vec<&FieldInfo> = if fields.is_empty() {
            self.model.fields().iter().collect()
        } else {
            fields
                .iter()
                .map(|f| self.model.field_info(f))
                .collect::<Result<_>>()?
        };
        let plan = FetchPlan::for_fields(registry, self.model, &requested)?;
        let (sql, params) = self
            .env
            .renderer(self.model.name())?
            .select(&self.query, &plan.fetch)?;
        let rows = self.env.executor()?.query(&sql, &params)?;

        let mut slates = Vec::with_capacity(rows.len());
        for row in &rows {
            let (id, mut slate) = compute::scan_row(registry, self.model, &plan.fetch, row)?;
            compute::apply(self.model, &mut slate, &plan.computed)?;
            slate.retain(|key, _| !key.contains('.'));
            slates.push((id, slate));
        }
        let fetched: Vec<i64> = slates.iter().map(|(id, _)| *id).collect();
        {
            let mut cache = self.env.cache_mut();
            for (id, slate) in slates {
                cache.add_entry(self.model.name(), id, slate);
            }
        }

        tracing::debug!(
            model = self.model.name(),
            records = fetched.len(),
            columns = plan.fetch.len(),
            "Records read"
        );
        Ok(self.with_ids(&fetched))
    }

    /// Number of records matching the query, without fetching them.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub fn search_count(&self) -> Result<u64> {
        let (sql, params) = self.env.renderer(self.model.name())?.count(&self.query)?;
        let count = self.env.executor()?.query_scalar(&sql, &params)?;
        count
            .as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| Error::Scan(format!("invalid COUNT result {count:?}")))
    }

    // ========================================================================
    // Single Record Access
    // ========================================================================

    /// Value of `field` on the first record.
    ///
    /// The zero value of the field type is returned for an empty
    /// collection. A cache miss triggers a read.
    pub fn get(&self, field: &str) -> Result<Value> {
        let info = self.model.field_info(field)?;
        let rc = self.lazy_load()?;
        let Some(&id) = rc.ids.first() else {
            return Ok(zero_value(info));
        };
        let cached = self.env.cache().get(self.model.name(), id, &info.name).cloned();
        if let Some(value) = cached {
            return Ok(value);
        }
        tracing::trace!(model = self.model.name(), id, field = %info.name, "Cache miss");
        let reread = rc.with_ids(&rc.ids);
        if self.env.config().read_full_record_on_miss {
            reread.read(&[])?;
        } else {
            reread.read(&[info.name.as_str()])?;
        }
        let cached = self.env.cache().get(self.model.name(), id, &info.name).cloned();
        Ok(cached.unwrap_or_else(|| zero_value(info)))
    }

    /// Records pointed to by the relational `field` of the first record.
    pub fn get_records(&self, field: &str) -> Result<RecordCollection<'env>> {
        let info = self.model.field_info(field)?;
        let Some(target) = info.field_type.relation_model() else {
            tracing::error!(model = self.model.name(), field = %info.name, "Field is not relational");
            return Err(Error::InvalidPath {
                model: self.model.name().to_string(),
                path: info.name.clone(),
                reason: "not a relational field".to_string(),
            });
        };
        let target = self.env.registry().get(target)?;
        let ids = self.get(&info.name)?.as_ids().unwrap_or_default();
        Ok(RecordCollection::new(self.env, target).with_ids(&ids))
    }

    /// The resolved collection, which must hold exactly one record.
    pub fn ensure_one(&self) -> Result<Self> {
        let rc = self.lazy_load()?;
        if rc.ids.len() != 1 {
            tracing::error!(model = self.model.name(), received = %rc, "Expected a singleton");
            return Err(Error::NotSingleton {
                model: self.model.name().to_string(),
                received: rc.to_string(),
            });
        }
        Ok(rc)
    }

    /// Identifier of the single record.
    pub fn id(&self) -> Result<i64> {
        Ok(self.ensure_one()?.ids[0])
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// One singleton collection per record, in order.
    pub fn records(&self) -> Result<Vec<Self>> {
        let rc = self.lazy_load()?;
        Ok(rc.ids.iter().map(|id| rc.with_ids(&[*id])).collect())
    }

    /// Records of either collection, without duplicates, `self` first.
    pub fn union(&self, other: &RecordCollection<'_>) -> Result<Self> {
        if self.model.name() != other.model.name() {
            tracing::error!(
                expected = self.model.name(),
                received = other.model.name(),
                "Union of different models"
            );
            return Err(Error::ModelMismatch {
                expected: self.model.name().to_string(),
                received: other.model.name().to_string(),
            });
        }
        let left = self.lazy_load()?;
        let right = other.lazy_load()?;
        let ids: Vec<i64> = left.ids.iter().chain(&right.ids).copied().collect();
        Ok(self.with_ids(&ids))
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Insert a record and return the singleton collection holding it.
    ///
    /// `ID` and fields that cannot be written are ignored. Many-to-many
    /// values are stored as link rows.
    #[tracing::instrument(level = "debug", skip(self, data), fields(model = self.model.name()))]
    pub fn create(&self, data: FieldMap) -> Result<Self> {
        let mut data = self.normalize(data)?;
        let links = self.split_many2many(&mut data)?;
        let renderer = self.env.renderer(self.model.name())?;
        let executor = self.env.executor()?;

        let (sql, params) = renderer.insert(&data)?;
        let id = executor.insert(&sql, &params)?;
        for (field, targets) in &links {
            if let Some((sql, params)) = renderer.link_many2many(field, id, targets)? {
                executor.execute(&sql, &params)?;
            }
        }
        tracing::info!(model = self.model.name(), id, "Record created");

        // Every stored computed field of the new record starts stale.
        let created = self.with_ids(&[id]);
        let changed = self.model.field_names();
        let watched = self.watched_many2one(&changed);
        let mut targets = BTreeMap::new();
        collect_targets(&mut targets, &watched, &data);
        created.after_change(&changed)?;
        created.propagate_inverse(targets)?;
        Ok(created)
    }

    /// Insert a typed record and write the generated identifier back.
    pub fn create_record<T: TypedRecord>(&self, record: &mut T) -> Result<Self> {
        let data = convert::to_field_map(self.model, record)?;
        let created = self.create(data)?;
        record.set_id(created.id()?);
        Ok(created)
    }

    /// Update every record of the collection with `data`.
    ///
    /// Many-to-many values replace the whole link set of each record.
    #[tracing::instrument(level = "debug", skip(self, data), fields(model = self.model.name()))]
    pub fn write(&self, data: FieldMap) -> Result<()> {
        let rc = self.lazy_load()?;
        if rc.ids.is_empty() {
            tracing::debug!(model = self.model.name(), "Nothing to write");
            return Ok(());
        }
        let mut data = self.normalize(data)?;
        if data.is_empty() {
            return Ok(());
        }
        let changed: Vec<String> = data.keys().cloned().collect();
        let links = self.split_many2many(&mut data)?;
        let watched = self.watched_many2one(&changed);
        let mut targets = rc.current_targets(&watched)?;
        collect_targets(&mut targets, &watched, &data);

        let renderer = self.env.renderer(self.model.name())?;
        let executor = self.env.executor()?;
        if let Some((sql, params)) = renderer.update(&Query::for_ids(&rc.ids), &data)? {
            executor.execute(&sql, &params)?;
        }
        for (field, linked) in &links {
            if let Some((sql, params)) = renderer.unlink_many2many(field, &rc.ids)? {
                executor.execute(&sql, &params)?;
            }
            for id in &rc.ids {
                if let Some((sql, params)) = renderer.link_many2many(field, *id, linked)? {
                    executor.execute(&sql, &params)?;
                }
            }
        }
        tracing::info!(
            model = self.model.name(),
            records = rc.ids.len(),
            fields = ?changed,
            "Records written"
        );

        rc.after_change(&changed)?;
        rc.propagate_inverse(targets)
    }

    /// Write a single field.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        self.write(FieldMap::new().with(field, value))
    }

    /// Delete the records, with their link rows, and return how many rows
    /// the database removed.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub fn unlink(&self) -> Result<u64> {
        let rc = self.lazy_load()?;
        if rc.ids.is_empty() {
            return Ok(0);
        }
        let registry = self.env.registry();
        let executor = self.env.executor()?;
        let renderer = self.env.renderer(self.model.name())?;
        let fields = self.model.field_names();
        let watched = self.watched_many2one(&fields);
        let targets = rc.current_targets(&watched)?;

        for field in self.model.fields() {
            if matches!(field.field_type, FieldType::Many2Many { .. }) {
                if let Some((sql, params)) = renderer.unlink_many2many(&field.name, &rc.ids)? {
                    executor.execute(&sql, &params)?;
                }
            }
        }
        for (model, field) in registry.referencing_fields(self.model.name()) {
            let info = registry.get(&model)?.field_info(&field)?;
            if matches!(info.field_type, FieldType::Many2Many { .. }) {
                let statement = self
                    .env
                    .renderer(&model)?
                    .unlink_many2many_targets(&field, &rc.ids)?;
                if let Some((sql, params)) = statement {
                    executor.execute(&sql, &params)?;
                }
            }
        }
        let (sql, params) = renderer.delete(&Query::for_ids(&rc.ids))?;
        let deleted = executor.execute(&sql, &params)?;
        tracing::info!(model = self.model.name(), records = deleted, "Records deleted");

        rc.after_change(&fields)?;
        rc.propagate_inverse(targets)?;
        Ok(deleted)
    }

    /// Declared names of the writable fields in `data`, values untouched.
    fn normalize(&self, data: FieldMap) -> Result<FieldMap> {
        let mut normalized = FieldMap::new();
        for (key, value) in data {
            let field = self.model.field_info(&key)?;
            if field.name == ID_FIELD || !field.is_writable() {
                tracing::debug!(model = self.model.name(), field = %field.name, "Ignoring read-only field");
                continue;
            }
            normalized.insert(field.name.clone(), value);
        }
        Ok(normalized)
    }

    /// Move many-to-many values out of `data`.
    fn split_many2many(&self, data: &mut FieldMap) -> Result<Vec<(String, Vec<i64>)>> {
        let mut links = Vec::new();
        for field in self.model.fields() {
            if !matches!(field.field_type, FieldType::Many2Many { .. }) {
                continue;
            }
            let Some(value) = data.remove(&field.name) else {
                continue;
            };
            let ids = match field.field_type.coerce(value) {
                Ok(Value::Ids(ids)) => dedup_ids(ids),
                Ok(other) => {
                    return Err(Error::conversion(
                        self.model.name(),
                        &field.name,
                        format!("expected identifiers, received {}", other.type_name()),
                    ));
                }
                Err(message) => {
                    tracing::error!(model = self.model.name(), field = %field.name, error = %message, "Invalid link value");
                    return Err(Error::conversion(self.model.name(), &field.name, message));
                }
            };
            links.push((field.name.clone(), ids));
        }
        Ok(links)
    }

    /// Many-to-one fields among `names` whose inverse one-to-many has
    /// dependents.
    fn watched_many2one(&self, names: &[String]) -> Vec<&'env FieldInfo> {
        let registry = self.env.registry();
        names
            .iter()
            .filter_map(|name| self.model.find_field(name))
            .filter(|field| field.field_type.is_many2one() && field.has_column())
            .filter(|field| {
                registry
                    .inverse_one2many(self.model.name(), &field.name)
                    .iter()
                    .any(|(model, inverse)| !registry.triggers(model, inverse).is_empty())
            })
            .collect()
    }

    /// Targets currently stored in the `watched` fields of the records.
    fn current_targets(&self, watched: &[&FieldInfo]) -> Result<BTreeMap<String, Vec<i64>>> {
        let mut targets = BTreeMap::new();
        if watched.is_empty() {
            return Ok(targets);
        }
        let fetch: Vec<String> = std::iter::once(ID_FIELD.to_string())
            .chain(watched.iter().map(|f| f.name.clone()))
            .collect();
        let (sql, params) = self
            .env
            .renderer(self.model.name())?
            .select(&Query::for_ids(&self.ids), &fetch)?;
        let rows = self.env.executor()?.query(&sql, &params)?;
        for row in &rows {
            let (_, slate) = compute::scan_row(self.env.registry(), self.model, &fetch, row)?;
            collect_targets(&mut targets, watched, &slate);
        }
        Ok(targets)
    }

    /// Drop stale cache entries after the records changed, then recompute
    /// what depends on `changed`.
    fn after_change(&self, changed: &[String]) -> Result<()> {
        let registry = self.env.registry();
        {
            let mut cache = self.env.cache_mut();
            cache.invalidate_records(self.model.name(), &self.ids);
            for (model, field) in registry.referencing_fields(self.model.name()) {
                cache.invalidate_field(&model, &field);
            }
        }
        compute::propagate(self.env, self.model.name(), &self.ids, changed)
    }

    /// Recompute fields depending on the one-to-many inverses of changed
    /// many-to-one fields, for both old and new targets.
    fn propagate_inverse(&self, targets: BTreeMap<String, Vec<i64>>) -> Result<()> {
        let registry = self.env.registry();
        for (field, ids) in targets {
            let ids = dedup_ids(ids);
            for (model, inverse) in registry.inverse_one2many(self.model.name(), &field) {
                compute::propagate(self.env, &model, &ids, &[inverse])?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Typed Records
    // ========================================================================

    /// The first record as `T`, if any.
    pub fn read_first<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let rc = self.lazy_load()?;
        let Some(&id) = rc.ids.first() else {
            return Ok(None);
        };
        rc.with_ids(&[id]).read(&[])?;
        self.typed(id).map(Some)
    }

    /// Every record as `T`, in collection order.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let rc = self.read(&[])?;
        rc.ids.iter().map(|id| self.typed(*id)).collect()
    }

    fn typed<T: DeserializeOwned>(&self, id: i64) -> Result<T> {
        let slate = self
            .env
            .cache()
            .get_record(self.model.name(), id)
            .cloned()
            .unwrap_or_default();
        convert::from_field_map(self.model, &slate)
    }

    // ========================================================================
    // Methods
    // ========================================================================

    /// Run the top layer of `method`.
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        let layers = self.env.methods().layers(self.model.name(), method).len();
        if layers == 0 {
            tracing::error!(model = self.model.name(), method, "Unknown method");
            return Err(Error::UnknownMethod {
                model: self.model.name().to_string(),
                method: method.to_string(),
            });
        }
        self.invoke(method, layers - 1, args)
    }

    /// Run the layer below the one currently executing.
    pub fn super_call(&self, args: &[Value]) -> Result<Value> {
        let Some(frame) = self.call_stack.last() else {
            tracing::error!(model = self.model.name(), "super_call outside of a method");
            return Err(Error::NoSuperMethod {
                model: self.model.name().to_string(),
                method: String::new(),
            });
        };
        if frame.layer == 0 {
            tracing::error!(model = self.model.name(), method = %frame.method, "No lower layer");
            return Err(Error::NoSuperMethod {
                model: self.model.name().to_string(),
                method: frame.method.clone(),
            });
        }
        self.invoke(&frame.method, frame.layer - 1, args)
    }

    fn invoke(&self, method: &str, layer: usize, args: &[Value]) -> Result<Value> {
        let depth = self.call_stack.len();
        if depth >= self.env.config().max_call_depth {
            tracing::error!(model = self.model.name(), method, depth, "Method call depth exceeded");
            return Err(Error::RecursionLimit {
                model: self.model.name().to_string(),
                depth,
            });
        }
        let body = &self.env.methods().layers(self.model.name(), method)[layer];
        let mut rc = self.clone();
        rc.call_stack.push(Frame {
            method: method.to_string(),
            layer,
        });
        tracing::trace!(model = self.model.name(), method, layer, depth, "Calling method");
        body(&rc, args)
    }
}

/// Add the identifiers held by `watched` fields of `slate` to `targets`.
fn collect_targets(
    targets: &mut BTreeMap<String, Vec<i64>>,
    watched: &[&FieldInfo],
    slate: &FieldMap,
) {
    for field in watched {
        if let Some(ids) = slate.get(&field.name).and_then(Value::as_ids) {
            targets.entry(field.name.clone()).or_default().extend(ids);
        }
    }
}

fn zero_value(field: &FieldInfo) -> Value {
    field.field_type.coerce(Value::Null).unwrap_or_default()
}

/// The identifiers of a collection, resolving it first. This is the value
/// relational fields take, e.g. `posts.set("Tags", Value::try_from(&tags)?)`.
impl TryFrom<&RecordCollection<'_>> for Value {
    type Error = Error;

    fn try_from(rc: &RecordCollection<'_>) -> Result<Self> {
        Ok(Value::Ids(rc.lazy_load()?.ids))
    }
}

impl PartialEq for RecordCollection<'_> {
    fn eq(&self, other: &Self) -> bool {
        let mut left = self.ids.clone();
        let mut right = other.ids.clone();
        left.sort_unstable();
        right.sort_unstable();
        self.model.name() == other.model.name() && left == right
    }
}

impl fmt::Display for RecordCollection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.ids.iter().map(ToString::to_string).collect();
        write!(f, "{}({})", self.model.name(), ids.join(","))
    }
}

impl fmt::Debug for RecordCollection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCollection")
            .field("model", &self.model.name())
            .field("ids", &self.ids)
            .field("resolved", &self.resolved)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}
