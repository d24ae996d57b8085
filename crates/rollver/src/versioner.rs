//! Versioner facade and request-scoped migrator
//!
//! [`Versioner`] is the application-owned engine: constructed once at
//! startup, migrations registered against it, then shared across request
//! handlers. [`Migrator`] is the short-lived handle bound to one resolved
//! caller version; it exposes the marshal/unmarshal operations.

use crate::builder::GraphBuilder;
use crate::cache::GraphCache;
use crate::error::RollverError;
use crate::graph::TypeGraph;
use crate::migration::{CancelHandle, MigrationContext, TypeMigration};
use crate::reflect::{Reflect, ReflectAny, TypeInfo};
use crate::registry::MigrationRegistry;
use crate::version::{Version, VersionFormat};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Construction options for a [`Versioner`].
#[derive(Debug, Clone)]
pub struct VersionerConfig {
    /// Version the current data model corresponds to
    pub current_version: String,

    /// Format every version string must parse in
    pub format: VersionFormat,
}

/// Supplies the raw version string a caller advertised.
///
/// The transport layer (header reader, query parser, account lookup)
/// implements this; the engine only needs the string. An absent version
/// resolves to the zero version, i.e. the oldest behavior.
pub trait VersionSource {
    /// Raw version string, if the caller advertised one
    fn version(&self) -> Option<&str>;
}

impl VersionSource for &str {
    fn version(&self) -> Option<&str> {
        Some(*self)
    }
}

impl VersionSource for String {
    fn version(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl VersionSource for Option<&str> {
    fn version(&self) -> Option<&str> {
        *self
    }
}

impl VersionSource for Option<String> {
    fn version(&self) -> Option<&str> {
        self.as_deref()
    }
}

struct VersionerInner {
    current: Version,
    registry: MigrationRegistry,
    cache: GraphCache,
}

/// The migration engine.
///
/// Cheap to clone; clones share the registry and graph cache. Registration
/// and request handling may run concurrently: a migration registered while
/// requests are in flight is either fully visible to a given request or
/// not visible at all, never partially applied.
#[derive(Clone)]
pub struct Versioner {
    inner: Arc<VersionerInner>,
}

impl std::fmt::Debug for Versioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Versioner")
            .field("current_version", &self.inner.current)
            .finish_non_exhaustive()
    }
}

impl Versioner {
    /// Create an engine serving `config.current_version`.
    ///
    /// # Errors
    /// Returns [`RollverError::InvalidVersion`] if the current version does
    /// not parse in the configured format.
    pub fn new(config: VersionerConfig) -> Result<Self, RollverError> {
        let current = Version::parse(&config.current_version, config.format)?;
        Ok(Self {
            inner: Arc::new(VersionerInner {
                current,
                registry: MigrationRegistry::new(config.format),
                cache: GraphCache::new(),
            }),
        })
    }

    /// Version the current data model corresponds to
    #[inline]
    #[must_use]
    pub fn current_version(&self) -> &Version {
        &self.inner.current
    }

    /// Register a migration for type `T` at `version`.
    ///
    /// `T` must be a user-declared named type; built-in primitives and
    /// anonymous composites are rejected. Registering the same
    /// `(type, version)` pair again overwrites the earlier migration.
    ///
    /// Graphs for every known type and version are eagerly rebuilt so
    /// steady-state requests hit the cache. A failed eager build is logged
    /// and dropped; the affected graph is built again on first use.
    ///
    /// # Errors
    /// Returns a configuration error for an unparseable version or a
    /// disallowed type.
    pub fn register<T: Reflect>(
        &self,
        version: &str,
        migration: impl TypeMigration + 'static,
    ) -> Result<(), RollverError> {
        let info = T::type_info();
        self.inner
            .registry
            .register(version, info, Arc::new(migration))?;
        self.inner.cache.note_type(info);
        self.prebuild_graphs();
        Ok(())
    }

    /// Resolve a caller version from a transport-layer source.
    ///
    /// # Errors
    /// Returns [`RollverError::InvalidVersion`] if a version string is
    /// present but does not parse.
    pub fn bind(&self, source: &dyn VersionSource) -> Result<Migrator, RollverError> {
        self.migrator(source.version())
    }

    /// Create a request-scoped [`Migrator`] for a raw caller version.
    ///
    /// `None` (or an empty string) resolves to the zero version so
    /// unversioned callers get the oldest behavior.
    ///
    /// # Errors
    /// Returns [`RollverError::InvalidVersion`] if the string does not
    /// parse in the configured format.
    pub fn migrator(&self, raw: Option<&str>) -> Result<Migrator, RollverError> {
        let format = self.inner.registry.format();
        let from = match raw {
            None => format.zero(),
            Some(s) if s.trim().is_empty() => format.zero(),
            Some(s) => Version::parse(s, format)?,
        };
        let context = MigrationContext::new(from, self.inner.current.clone());
        Ok(Migrator {
            inner: Arc::clone(&self.inner),
            context,
        })
    }

    /// Rebuild cached graphs for every known type at every known version.
    /// Types with dynamically-typed fields are skipped; their graphs are
    /// value-dependent and always built per call.
    fn prebuild_graphs(&self) {
        let snapshot = self.inner.registry.snapshot();
        for info in self.inner.cache.known_types() {
            if info.has_dynamic_fields() {
                continue;
            }
            for version in snapshot.versions() {
                match GraphBuilder::new(&snapshot, version).build_type(info) {
                    Ok(graph) => {
                        self.inner
                            .cache
                            .insert(info.key(), version.as_str(), Arc::new(graph));
                    }
                    Err(err) => {
                        // Drop the stale entry too; first use rebuilds and
                        // surfaces the error to the caller.
                        self.inner.cache.remove(info.key(), version.as_str());
                        tracing::warn!(
                            "eager graph build for {} at {} failed: {}",
                            info.display_name(),
                            version,
                            err
                        );
                    }
                }
            }
        }
    }
}

/// Request-scoped handle bound to one resolved caller version.
///
/// Immutable after construction and safe to share for multiple marshal and
/// unmarshal calls within one request's lifetime.
#[derive(Clone)]
pub struct Migrator {
    inner: Arc<VersionerInner>,
    context: MigrationContext,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Migrator {
    /// Version the caller speaks
    #[inline]
    #[must_use]
    pub fn from_version(&self) -> &Version {
        self.context.caller_version()
    }

    /// Version the system currently serves
    #[inline]
    #[must_use]
    pub fn to_version(&self) -> &Version {
        self.context.current_version()
    }

    /// Whether the caller already speaks the current version
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.from_version() == self.to_version()
    }

    /// Context handed to migration functions
    #[inline]
    #[must_use]
    pub fn context(&self) -> &MigrationContext {
        &self.context
    }

    /// Handle for cancelling in-flight migrations on this migrator
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.context.cancel_flag())
    }

    /// Attach a deadline; migration functions observe it through the
    /// context
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.context.set_deadline(deadline);
        self
    }

    /// Encode `value` for the bound caller version.
    ///
    /// The graph is built from the live value, so dynamically-typed fields
    /// are migrated according to their concrete runtime types. A graph
    /// with no reachable migrations delegates to the plain codec.
    ///
    /// # Errors
    /// Codec failures and migration failures; on error the input value is
    /// untouched since transformation happens on a detached tree.
    pub fn marshal<T>(&self, value: &T) -> Result<Vec<u8>, RollverError>
    where
        T: Reflect + Serialize,
    {
        let start = Instant::now();
        let result = self.marshal_inner(value);
        self.observe(start.elapsed());
        result
    }

    /// Decode `bytes`, sent in the bound caller version, into the current
    /// data model.
    ///
    /// # Errors
    /// Codec failures and migration failures.
    pub fn unmarshal<T>(&self, bytes: &[u8]) -> Result<T, RollverError>
    where
        T: Reflect + DeserializeOwned,
    {
        let start = Instant::now();
        let result = self.unmarshal_inner(bytes);
        self.observe(start.elapsed());
        result
    }

    fn marshal_inner<T>(&self, value: &T) -> Result<Vec<u8>, RollverError>
    where
        T: Reflect + Serialize,
    {
        if self.is_current() {
            return Ok(serde_json::to_vec(value)?);
        }
        let graph = self.value_graph(value)?;
        if graph.is_empty() {
            return Ok(serde_json::to_vec(value)?);
        }
        let tree = serde_json::to_value(value)?;
        let tree = graph.migrate_backward(&self.context, tree)?;
        Ok(serde_json::to_vec(&tree)?)
    }

    fn unmarshal_inner<T>(&self, bytes: &[u8]) -> Result<T, RollverError>
    where
        T: Reflect + DeserializeOwned,
    {
        if self.is_current() {
            return Ok(serde_json::from_slice(bytes)?);
        }
        let graph = self.static_graph(T::type_info())?;
        if graph.is_empty() {
            return Ok(serde_json::from_slice(bytes)?);
        }
        let tree: Value = serde_json::from_slice(bytes)?;
        let tree = graph.migrate_forward(&self.context, tree)?;
        Ok(serde_json::from_value(tree)?)
    }

    fn value_graph(&self, value: &dyn ReflectAny) -> Result<Arc<TypeGraph>, RollverError> {
        let info = value.info();
        if !info.has_dynamic_fields() {
            return self.static_graph(info);
        }
        let snapshot = self.inner.registry.snapshot();
        let graph =
            GraphBuilder::new(&snapshot, self.context.caller_version()).build_value(value)?;
        Ok(Arc::new(graph))
    }

    fn static_graph(&self, info: TypeInfo) -> Result<Arc<TypeGraph>, RollverError> {
        let caller = self.context.caller_version();
        if info.has_dynamic_fields() {
            // Value-dependent types never enter the cache.
            let snapshot = self.inner.registry.snapshot();
            let graph = GraphBuilder::new(&snapshot, caller).build_type(info)?;
            return Ok(Arc::new(graph));
        }

        if let Some(graph) = self.inner.cache.get(info.key(), caller.as_str()) {
            return Ok(graph);
        }
        let snapshot = self.inner.registry.snapshot();
        let graph = Arc::new(GraphBuilder::new(&snapshot, caller).build_type(info)?);
        self.inner.cache.note_type(info);
        self.inner
            .cache
            .insert(info.key(), caller.as_str(), Arc::clone(&graph));
        Ok(graph)
    }

    fn observe(&self, elapsed: Duration) {
        let histogram = metrics::histogram!(
            "rollver_migration_seconds",
            "from" => self.from_version().to_string(),
            "to" => self.to_version().to_string()
        );
        histogram.record(elapsed.as_secs_f64());
    }
}
