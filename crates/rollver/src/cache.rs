//! Concurrent graph cache
//!
//! Built graphs are stored per `(type, caller version)` pair. Concurrent
//! misses for the same key may each build redundantly and converge to an
//! equivalent value; builds are idempotent so this is tolerated rather
//! than lock-serialized. Entries are overwritten by eager rebuilds after
//! registration and otherwise never invalidated.

use crate::graph::TypeGraph;
use crate::reflect::{TypeInfo, TypeKey};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, PartialEq, Eq, Hash)]
struct GraphKey {
    type_key: TypeKey,
    version: String,
}

pub(crate) struct GraphCache {
    graphs: DashMap<GraphKey, Arc<TypeGraph>>,

    /// Every type a graph was ever requested for, so eager rebuilds after
    /// a late registration also refresh lazily discovered composite roots.
    known_types: DashMap<TypeKey, TypeInfo>,
}

impl GraphCache {
    pub(crate) fn new() -> Self {
        Self {
            graphs: DashMap::new(),
            known_types: DashMap::new(),
        }
    }

    pub(crate) fn get(&self, type_key: TypeKey, version: &str) -> Option<Arc<TypeGraph>> {
        self.graphs
            .get(&GraphKey {
                type_key,
                version: version.to_string(),
            })
            .map(|entry| Arc::clone(&entry))
    }

    pub(crate) fn insert(&self, type_key: TypeKey, version: &str, graph: Arc<TypeGraph>) {
        self.graphs.insert(
            GraphKey {
                type_key,
                version: version.to_string(),
            },
            graph,
        );
    }

    pub(crate) fn remove(&self, type_key: TypeKey, version: &str) {
        self.graphs.remove(&GraphKey {
            type_key,
            version: version.to_string(),
        });
    }

    /// Record a type for future eager rebuilds
    pub(crate) fn note_type(&self, info: TypeInfo) {
        self.known_types.insert(info.key(), info);
    }

    pub(crate) fn known_types(&self) -> Vec<TypeInfo> {
        self.known_types.iter().map(|entry| *entry.value()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphNode;
    use crate::reflect::Reflect;

    struct Sample;

    fn empty_graph() -> Arc<TypeGraph> {
        let node = GraphNode::new(TypeKey::of::<Sample>());
        Arc::new(TypeGraph::new(vec![node], 0))
    }

    #[test]
    fn get_miss_then_hit() {
        let cache = GraphCache::new();
        let key = TypeKey::of::<Sample>();
        assert!(cache.get(key, "2024-01-01").is_none());

        cache.insert(key, "2024-01-01", empty_graph());
        assert!(cache.get(key, "2024-01-01").is_some());
        assert!(cache.get(key, "2023-01-01").is_none());
    }

    #[test]
    fn remove_clears_entry() {
        let cache = GraphCache::new();
        let key = TypeKey::of::<Sample>();
        cache.insert(key, "2024-01-01", empty_graph());
        cache.remove(key, "2024-01-01");
        assert!(cache.get(key, "2024-01-01").is_none());
    }

    #[test]
    fn known_types_deduplicate() {
        let cache = GraphCache::new();
        cache.note_type(String::type_info());
        cache.note_type(String::type_info());
        assert_eq!(cache.known_types().len(), 1);
    }
}
