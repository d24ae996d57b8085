//! Migration registry
//!
//! Maps `(type, version)` to a registered [`TypeMigration`] and owns the
//! ascending version sequence. One write lock guards both, so a reader
//! never observes a partially sorted sequence.

use crate::error::RollverError;
use crate::migration::TypeMigration;
use crate::reflect::{TypeInfo, TypeKey};
use crate::version::{Version, VersionFormat};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) struct MigrationRegistry {
    format: VersionFormat,
    state: RwLock<RegistryState>,
}

struct RegistryState {
    /// Ascending; index 0 is always the zero version
    versions: Vec<Version>,
    types: HashMap<TypeKey, TypeEntry>,
}

#[derive(Clone)]
struct TypeEntry {
    info: TypeInfo,
    by_version: HashMap<String, Arc<dyn TypeMigration>>,
}

impl MigrationRegistry {
    pub(crate) fn new(format: VersionFormat) -> Self {
        Self {
            format,
            state: RwLock::new(RegistryState {
                versions: vec![format.zero()],
                types: HashMap::new(),
            }),
        }
    }

    pub(crate) fn format(&self) -> VersionFormat {
        self.format
    }

    /// Register a migration for a named type at a version.
    ///
    /// Only user-declared named types are accepted; built-in primitives and
    /// anonymous composites are rejected. Re-registering the same
    /// `(type, version)` pair overwrites the previous entry.
    pub(crate) fn register(
        &self,
        version: &str,
        info: TypeInfo,
        migration: Arc<dyn TypeMigration>,
    ) -> Result<(), RollverError> {
        if info.name().is_none() {
            return Err(RollverError::UnsupportedType {
                name: info.key().rust_name(),
            });
        }
        let parsed = Version::parse(version, self.format)?;

        let mut state = self.state.write();
        if !state.versions.contains(&parsed) {
            state.versions.push(parsed);
            Version::sort_ascending(&mut state.versions);
        }
        state
            .types
            .entry(info.key())
            .or_insert_with(|| TypeEntry {
                info,
                by_version: HashMap::new(),
            })
            .by_version
            .insert(version.trim().to_string(), migration);
        Ok(())
    }

    /// Consistent read view for graph construction.
    ///
    /// A build works entirely off one snapshot, so a registration racing
    /// with an in-flight request is either fully visible to that request
    /// or not visible at all.
    pub(crate) fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.read();
        RegistrySnapshot {
            versions: state.versions.clone(),
            types: state.types.clone(),
        }
    }
}

/// Point-in-time copy of the registry contents.
pub(crate) struct RegistrySnapshot {
    versions: Vec<Version>,
    types: HashMap<TypeKey, TypeEntry>,
}

impl RegistrySnapshot {
    /// All known versions, ascending
    pub(crate) fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// Every registered type with its shape
    pub(crate) fn registered_types(&self) -> impl Iterator<Item = (TypeKey, TypeInfo)> + '_ {
        self.types.iter().map(|(key, entry)| (*key, entry.info))
    }

    /// Migrations for `key` at versions strictly newer than `caller`,
    /// ascending. This is exactly the list to apply, in order, to move
    /// that type's data between the caller's version and the current one.
    pub(crate) fn migrations_for(
        &self,
        key: TypeKey,
        caller: &Version,
    ) -> Vec<Arc<dyn TypeMigration>> {
        let Some(entry) = self.types.get(&key) else {
            return Vec::new();
        };
        self.versions
            .iter()
            .filter(|v| caller.is_older_than(v))
            .filter_map(|v| entry.by_version.get(v.as_str()).cloned())
            .collect()
    }
}
