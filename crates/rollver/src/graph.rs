//! Type dependency graph and its traversal
//!
//! A [`TypeGraph`] is an arena of nodes, one per type reachable from a
//! payload, each holding that type's applicable migrations plus links to
//! its migrated children. Nodes reference each other by arena index, which
//! lets self-referential type graphs exist without reference cycles.
//!
//! Traversal walks a decoded tree in lock-step with the graph:
//! - forward (old wire shape toward current): children first, then this
//!   node's migrations oldest to newest
//! - backward (current toward old wire shape): this node's migrations
//!   newest to oldest, then children

use crate::error::MigrationError;
use crate::migration::{MigrationContext, TypeMigration};
use crate::reflect::TypeKey;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Reserved field-map key naming the element type of a collection. Never
/// appears on the wire.
pub(crate) const ELEMENT_KEY: &str = "$elem";

pub(crate) type NodeId = usize;

/// One type's place in the dependency graph.
pub(crate) struct GraphNode {
    #[allow(dead_code)]
    pub(crate) key: TypeKey,

    /// Wire name (or [`ELEMENT_KEY`]) to child node
    pub(crate) fields: HashMap<&'static str, NodeId>,

    /// Migrations applicable at the bound version, ascending by version
    pub(crate) migrations: Vec<Arc<dyn TypeMigration>>,
}

impl GraphNode {
    pub(crate) fn new(key: TypeKey) -> Self {
        Self {
            key,
            fields: HashMap::new(),
            migrations: Vec::new(),
        }
    }
}

/// Dependency graph for one root type at one caller version.
pub(crate) struct TypeGraph {
    nodes: Vec<GraphNode>,
    root: NodeId,
    empty: bool,
}

impl TypeGraph {
    /// Finish a built arena: prune links to subtrees that carry no
    /// migration anywhere, so an all-empty graph short-circuits to the
    /// plain codec.
    pub(crate) fn new(mut nodes: Vec<GraphNode>, root: NodeId) -> Self {
        let mut live = vec![false; nodes.len()];
        // Fixpoint instead of recursion: cycles in the arena make a single
        // DFS pass miss liveness that flows around the loop.
        loop {
            let mut changed = false;
            for i in 0..nodes.len() {
                if live[i] {
                    continue;
                }
                let alive = !nodes[i].migrations.is_empty()
                    || nodes[i].fields.values().any(|&child| live[child]);
                if alive {
                    live[i] = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for node in &mut nodes {
            node.fields.retain(|_, child| live[*child]);
        }
        let empty = !live.get(root).copied().unwrap_or(false);
        Self { nodes, root, empty }
    }

    /// Whether no migration is reachable anywhere in this graph
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.empty
    }

    /// Move decoded data from the caller's older version toward current.
    ///
    /// Children are normalized to the shapes their own migrations expect
    /// before this node's migrations run.
    pub(crate) fn migrate_forward(
        &self,
        ctx: &MigrationContext,
        data: Value,
    ) -> Result<Value, MigrationError> {
        if self.empty {
            return Ok(data);
        }
        self.forward(self.root, data, ctx)
    }

    /// Move decoded data from current toward the caller's older version.
    ///
    /// This node regresses itself first, then its now-correctly-shaped
    /// children.
    pub(crate) fn migrate_backward(
        &self,
        ctx: &MigrationContext,
        data: Value,
    ) -> Result<Value, MigrationError> {
        if self.empty {
            return Ok(data);
        }
        self.backward(self.root, data, ctx)
    }

    fn forward(
        &self,
        id: NodeId,
        mut data: Value,
        ctx: &MigrationContext,
    ) -> Result<Value, MigrationError> {
        let node = &self.nodes[id];
        match &mut data {
            Value::Object(map) => {
                for (name, child) in &node.fields {
                    let Some(slot) = map.get_mut(*name) else {
                        continue;
                    };
                    if slot.is_null() {
                        continue;
                    }
                    let taken = slot.take();
                    *slot = self.forward(*child, taken, ctx)?;
                }
            }
            Value::Array(items) => {
                if let Some(&element) = node.fields.get(ELEMENT_KEY) {
                    for item in items.iter_mut() {
                        let taken = item.take();
                        *item = self.forward(element, taken, ctx)?;
                    }
                }
            }
            _ => {}
        }

        for migration in &node.migrations {
            data = migration.migrate_forward(ctx, data)?;
        }
        Ok(data)
    }

    fn backward(
        &self,
        id: NodeId,
        mut data: Value,
        ctx: &MigrationContext,
    ) -> Result<Value, MigrationError> {
        let node = &self.nodes[id];
        for migration in node.migrations.iter().rev() {
            data = migration.migrate_backward(ctx, data)?;
        }
        if data.is_null() {
            return Ok(data);
        }

        match &mut data {
            Value::Object(map) => {
                for (name, child) in &node.fields {
                    let Some(slot) = map.get_mut(*name) else {
                        continue;
                    };
                    if slot.is_null() {
                        continue;
                    }
                    let taken = slot.take();
                    *slot = self.backward(*child, taken, ctx)?;
                }
            }
            Value::Array(items) => {
                if let Some(&element) = node.fields.get(ELEMENT_KEY) {
                    for item in items.iter_mut() {
                        let taken = item.take();
                        *item = self.backward(element, taken, ctx)?;
                    }
                }
            }
            _ => {}
        }
        Ok(data)
    }
}
