//! The transactional environment.
//!
//! An [`Environment`] owns one executor, one [`Cache`] and the method table.
//! Record collections borrow it; none of them hold a resource of their own.
//! The environment is a scoped resource: [`commit`](Environment::commit) and
//! [`rollback`](Environment::rollback) consume it, and dropping it without
//! either rolls the transaction back.

use std::cell::{Ref, RefCell, RefMut};
use std::sync::Arc;

use rowset_core::{Error, Executor, FieldMap, Registry, Result};
use rowset_query::{Dialect, QueryRenderer};

use crate::cache::Cache;
use crate::methods::MethodTable;
use crate::recordset::RecordCollection;

// ============================================================================
// Environment Configuration
// ============================================================================

/// Configuration for [`Environment`] behavior.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// SQL dialect of the executor.
    pub dialect: Dialect,
    /// Whether a cache miss on one field reads every field of the
    /// collection's records, instead of the missing field alone.
    pub read_full_record_on_miss: bool,
    /// Maximum nesting of method calls.
    pub max_call_depth: usize,
    /// Whether to issue BEGIN on creation and COMMIT/ROLLBACK on release.
    pub begin_transaction: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            read_full_record_on_miss: true,
            max_call_depth: 64,
            begin_transaction: true,
        }
    }
}

impl EnvironmentConfig {
    /// Set the SQL dialect.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the cache-miss policy.
    pub fn read_full_record_on_miss(mut self, full: bool) -> Self {
        self.read_full_record_on_miss = full;
        self
    }

    /// Set the method call depth limit.
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Set whether the environment manages the transaction.
    pub fn begin_transaction(mut self, begin: bool) -> Self {
        self.begin_transaction = begin;
        self
    }
}

// ============================================================================
// Environment
// ============================================================================

/// A transaction, its cache and its method table.
///
/// Not `Sync`: the cache is unsynchronized, so an environment and the
/// collections derived from it belong to one thread at a time.
pub struct Environment {
    registry: Arc<Registry>,
    executor: Option<Box<dyn Executor>>,
    cache: RefCell<Cache>,
    methods: Arc<MethodTable>,
    config: EnvironmentConfig,
}

impl Environment {
    /// Open an environment with the default configuration.
    pub fn new(registry: Arc<Registry>, executor: Box<dyn Executor>) -> Result<Self> {
        Self::with_config(registry, executor, EnvironmentConfig::default())
    }

    /// Open an environment, beginning a transaction if configured.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn with_config(
        registry: Arc<Registry>,
        executor: Box<dyn Executor>,
        config: EnvironmentConfig,
    ) -> Result<Self> {
        if config.begin_transaction {
            tracing::info!("Beginning transaction");
            executor.execute("BEGIN", &[])?;
        }
        Ok(Self {
            registry,
            executor: Some(executor),
            cache: RefCell::new(Cache::new()),
            methods: Arc::new(MethodTable::new()),
            config,
        })
    }

    /// Use `methods` for [`RecordCollection::call`].
    pub fn with_methods(mut self, methods: impl Into<Arc<MethodTable>>) -> Self {
        self.methods = methods.into();
        self
    }

    /// The model registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The configuration.
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// The method table.
    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    /// Read access to the cache.
    pub fn cache(&self) -> Ref<'_, Cache> {
        self.cache.borrow()
    }

    pub(crate) fn cache_mut(&self) -> RefMut<'_, Cache> {
        self.cache.borrow_mut()
    }

    pub(crate) fn executor(&self) -> Result<&dyn Executor> {
        self.executor.as_deref().ok_or(Error::ClosedEnvironment)
    }

    pub(crate) fn renderer(&self, model: &str) -> Result<QueryRenderer<'_>> {
        QueryRenderer::new(&self.registry, model, self.config.dialect)
    }

    /// A fresh, unresolved collection over every record of `model`.
    pub fn pool(&self, model: &str) -> Result<RecordCollection<'_>> {
        let info = self.registry.get(model)?;
        Ok(RecordCollection::new(self, info))
    }

    /// Create one record and return its identifier.
    pub fn create(&self, model: &str, data: FieldMap) -> Result<i64> {
        self.pool(model)?.create(data)?.id()
    }

    /// Write `data` on the record `id` of `model`.
    pub fn write(&self, model: &str, id: i64, data: FieldMap) -> Result<()> {
        self.pool(model)?.with_ids(&[id]).write(data)
    }

    /// Commit the transaction and hand the executor back.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(mut self) -> Result<Box<dyn Executor>> {
        self.finish("COMMIT")
    }

    /// Roll the transaction back and hand the executor back.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(mut self) -> Result<Box<dyn Executor>> {
        self.finish("ROLLBACK")
    }

    fn finish(&mut self, statement: &str) -> Result<Box<dyn Executor>> {
        let executor = self.executor.take().ok_or(Error::ClosedEnvironment)?;
        self.cache.borrow_mut().clear();
        if self.config.begin_transaction {
            tracing::info!(statement, "Ending transaction");
            executor.execute(statement, &[])?;
        }
        Ok(executor)
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        let Some(executor) = self.executor.take() else {
            return;
        };
        if self.config.begin_transaction {
            tracing::warn!("Environment dropped without commit, rolling back");
            if let Err(e) = executor.execute("ROLLBACK", &[]) {
                tracing::error!(error = %e, "Rollback on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("open", &self.executor.is_some())
            .field("cached_records", &self.cache.borrow().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
