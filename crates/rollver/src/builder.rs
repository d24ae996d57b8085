//! Graph construction
//!
//! Two entry points over one walker: [`GraphBuilder::build_type`] discovers
//! reachable types from a static shape description, and
//! [`GraphBuilder::build_value`] discovers them from a live value, which is
//! the only way to resolve dynamically-typed fields before the value is
//! flattened into the generic tree.
//!
//! Cycle handling: the node id is recorded in the visited map *before* the
//! type's children are expanded, so a re-encountered type links to the
//! in-progress node instead of recursing. Recursion depth is bounded by the
//! number of distinct types regardless of cyclic references.

use crate::error::RollverError;
use crate::graph::{GraphNode, NodeId, TypeGraph, ELEMENT_KEY};
use crate::reflect::{ReflectAny, Shape, TypeInfo, TypeKey, ValueShape};
use crate::registry::RegistrySnapshot;
use crate::version::Version;
use std::collections::HashMap;

pub(crate) struct GraphBuilder<'a> {
    snapshot: &'a RegistrySnapshot,
    caller: &'a Version,
    nodes: Vec<GraphNode>,
    visited: HashMap<TypeKey, NodeId>,
}

impl<'a> GraphBuilder<'a> {
    pub(crate) fn new(snapshot: &'a RegistrySnapshot, caller: &'a Version) -> Self {
        Self {
            snapshot,
            caller,
            nodes: Vec::new(),
            visited: HashMap::new(),
        }
    }

    /// Build the graph for a type's declared shape.
    pub(crate) fn build_type(mut self, info: TypeInfo) -> Result<TypeGraph, RollverError> {
        let root = self.visit_type(info)?;
        Ok(TypeGraph::new(self.nodes, root))
    }

    /// Build the graph for a live value, resolving dynamically-typed
    /// fields to their concrete runtime types.
    pub(crate) fn build_value(mut self, value: &dyn ReflectAny) -> Result<TypeGraph, RollverError> {
        let root = self.visit_value(value)?;
        Ok(TypeGraph::new(self.nodes, root))
    }

    fn alloc(&mut self, key: TypeKey) -> NodeId {
        self.nodes.push(GraphNode::new(key));
        self.nodes.len() - 1
    }

    fn visit_type(&mut self, info: TypeInfo) -> Result<NodeId, RollverError> {
        if let Some(&id) = self.visited.get(&info.key()) {
            return Ok(id);
        }
        let id = self.alloc(info.key());
        self.visited.insert(info.key(), id);
        self.nodes[id].migrations = self.snapshot.migrations_for(info.key(), self.caller);

        match info.underlying_shape()? {
            Shape::Struct(fields) => {
                for field in fields() {
                    let child = self.visit_type((field.info)())?;
                    self.nodes[id].fields.insert(field.key(), child);
                }
            }
            Shape::List(element) | Shape::Map(element) => {
                let child = self.visit_type(element())?;
                self.nodes[id].fields.insert(ELEMENT_KEY, child);
            }
            Shape::Scalar | Shape::Dynamic => {}
            Shape::Newtype(_) => unreachable!("underlying_shape resolves newtype wrappers"),
        }
        Ok(id)
    }

    fn visit_value(&mut self, value: &dyn ReflectAny) -> Result<NodeId, RollverError> {
        let info = value.info();
        // Shapes without dynamic fields are value-independent; share the
        // type-driven walk (and its memoization).
        if !info.has_dynamic_fields() {
            return self.visit_type(info);
        }

        match value.runtime_shape() {
            ValueShape::Nil => Ok(self.alloc(info.key())),
            ValueShape::Scalar => {
                let id = self.alloc(info.key());
                self.nodes[id].migrations = self.snapshot.migrations_for(info.key(), self.caller);
                Ok(id)
            }
            ValueShape::Struct(fields) => {
                let id = self.alloc(info.key());
                self.nodes[id].migrations = self.snapshot.migrations_for(info.key(), self.caller);
                for (wire_name, field_value) in fields {
                    let child = self.visit_value(field_value)?;
                    self.nodes[id].fields.insert(wire_name, child);
                }
                Ok(id)
            }
            ValueShape::List(first) => {
                let id = self.alloc(info.key());
                self.nodes[id].migrations = self.snapshot.migrations_for(info.key(), self.caller);
                if let Some(element) = first {
                    let child = self.visit_value(element)?;
                    self.nodes[id].fields.insert(ELEMENT_KEY, child);
                }
                Ok(id)
            }
            // The concrete value stands in for the dynamic slot entirely.
            ValueShape::Dynamic(inner) => match inner {
                None => Ok(self.alloc(info.key())),
                Some(concrete) => self.visit_value(concrete),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use crate::migration::{FnMigration, MigrationContext, TypeMigration};
    use crate::reflect::{Dynamic, Reflect};
    use crate::registry::MigrationRegistry;
    use crate::version::VersionFormat;
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[derive(serde::Serialize)]
    struct User {
        username: String,
    }

    crate::reflect_struct!(User, "User", {
        username: String,
    });

    #[derive(serde::Serialize)]
    struct Project {
        name: String,
        lead: Option<Box<User>>,
    }

    crate::reflect_struct!(Project, "Project", {
        name: String,
        lead: Option<Box<User>>,
    });

    #[derive(serde::Serialize)]
    struct Workspace {
        users: Vec<User>,
        projects: std::collections::HashMap<String, Project>,
    }

    crate::reflect_struct!(Workspace, "Workspace", {
        users: Vec<User>,
        projects: std::collections::HashMap<String, Project>,
    });

    #[derive(serde::Serialize)]
    struct Category {
        label: String,
        children: Vec<Category>,
    }

    crate::reflect_struct!(Category, "Category", {
        label: String,
        children: Vec<Category>,
    });

    #[derive(serde::Serialize)]
    struct Envelope {
        kind: String,
        payload: Dynamic,
    }

    crate::reflect_struct!(Envelope, "Envelope", {
        kind: String,
        payload: Dynamic,
    });

    fn rename_email(_ctx: &MigrationContext, mut value: Value) -> Result<Value, MigrationError> {
        let Some(map) = value.as_object_mut() else {
            return Err(MigrationError::unexpected_shape("object", &value));
        };
        if let Some(email) = map.remove("email") {
            map.insert("username".to_string(), email);
        }
        Ok(value)
    }

    fn restore_email(_ctx: &MigrationContext, mut value: Value) -> Result<Value, MigrationError> {
        let Some(map) = value.as_object_mut() else {
            return Err(MigrationError::unexpected_shape("object", &value));
        };
        if let Some(username) = map.remove("username") {
            map.insert("email".to_string(), username);
        }
        Ok(value)
    }

    fn user_migration() -> Arc<dyn TypeMigration> {
        Arc::new(FnMigration::new(rename_email, restore_email))
    }

    fn registry_with_user_migration() -> MigrationRegistry {
        let registry = MigrationRegistry::new(VersionFormat::Date);
        registry
            .register("2023-06-01", User::type_info(), user_migration())
            .unwrap();
        registry
    }

    fn ctx() -> MigrationContext {
        MigrationContext::new(
            VersionFormat::Date.zero(),
            Version::parse("2024-01-01", VersionFormat::Date).unwrap(),
        )
    }

    #[test]
    fn static_graph_reaches_nested_types() {
        let registry = registry_with_user_migration();
        let snapshot = registry.snapshot();
        let zero = VersionFormat::Date.zero();
        let graph = GraphBuilder::new(&snapshot, &zero)
            .build_type(Workspace::type_info())
            .unwrap();

        assert!(!graph.is_empty());
        let data = json!({
            "users": [{"email": "a@x"}, {"email": "b@x"}],
            "projects": null,
        });
        let out = graph.migrate_forward(&ctx(), data).unwrap();
        assert_eq!(
            out,
            json!({
                "users": [{"username": "a@x"}, {"username": "b@x"}],
                "projects": null,
            })
        );
    }

    #[test]
    fn static_graph_empty_without_registrations() {
        let registry = MigrationRegistry::new(VersionFormat::Date);
        let snapshot = registry.snapshot();
        let zero = VersionFormat::Date.zero();
        let graph = GraphBuilder::new(&snapshot, &zero)
            .build_type(Workspace::type_info())
            .unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn static_graph_empty_for_caller_at_current() {
        let registry = registry_with_user_migration();
        let snapshot = registry.snapshot();
        let caller = Version::parse("2023-06-01", VersionFormat::Date).unwrap();
        let graph = GraphBuilder::new(&snapshot, &caller)
            .build_type(User::type_info())
            .unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn cyclic_type_terminates_and_migrates_every_depth() {
        let registry = MigrationRegistry::new(VersionFormat::Date);
        registry
            .register(
                "2023-06-01",
                Category::type_info(),
                Arc::new(FnMigration::new(
                    |_ctx: &MigrationContext, mut value: Value| {
                        if let Some(map) = value.as_object_mut() {
                            map.insert("seen".to_string(), json!(true));
                        }
                        Ok(value)
                    },
                    |_ctx: &MigrationContext, v: Value| Ok(v),
                )),
            )
            .unwrap();
        let snapshot = registry.snapshot();
        let zero = VersionFormat::Date.zero();
        let graph = GraphBuilder::new(&snapshot, &zero)
            .build_type(Category::type_info())
            .unwrap();

        let data = json!({
            "label": "a",
            "children": [
                {"label": "b", "children": [
                    {"label": "c", "children": []}
                ]}
            ]
        });
        let out = graph.migrate_forward(&ctx(), data).unwrap();
        assert_eq!(out["seen"], json!(true));
        assert_eq!(out["children"][0]["seen"], json!(true));
        assert_eq!(out["children"][0]["children"][0]["seen"], json!(true));
    }

    #[test]
    fn runtime_graph_resolves_dynamic_payload() {
        let registry = registry_with_user_migration();
        let snapshot = registry.snapshot();
        let zero = VersionFormat::Date.zero();

        let envelope = Envelope {
            kind: "user".into(),
            payload: Dynamic::new(User {
                username: "a@x".into(),
            }),
        };
        let graph = GraphBuilder::new(&snapshot, &zero)
            .build_value(&envelope)
            .unwrap();
        assert!(!graph.is_empty());

        let data = json!({"kind": "user", "payload": {"username": "a@x"}});
        let out = graph.migrate_backward(&ctx(), data).unwrap();
        assert_eq!(out, json!({"kind": "user", "payload": {"email": "a@x"}}));
    }

    #[test]
    fn runtime_graph_dynamic_collection_uses_first_element() {
        let registry = registry_with_user_migration();
        let snapshot = registry.snapshot();
        let zero = VersionFormat::Date.zero();

        let envelope = Envelope {
            kind: "users".into(),
            payload: Dynamic::new(vec![
                User {
                    username: "a@x".into(),
                },
                User {
                    username: "b@x".into(),
                },
            ]),
        };
        let graph = GraphBuilder::new(&snapshot, &zero)
            .build_value(&envelope)
            .unwrap();

        let data = json!({
            "kind": "users",
            "payload": [{"username": "a@x"}, {"username": "b@x"}],
        });
        let out = graph.migrate_backward(&ctx(), data).unwrap();
        assert_eq!(
            out,
            json!({
                "kind": "users",
                "payload": [{"email": "a@x"}, {"email": "b@x"}],
            })
        );
    }

    #[test]
    fn runtime_graph_nil_dynamic_is_empty() {
        let registry = registry_with_user_migration();
        let snapshot = registry.snapshot();
        let zero = VersionFormat::Date.zero();

        let envelope = Envelope {
            kind: "none".into(),
            payload: Dynamic::null(),
        };
        let graph = GraphBuilder::new(&snapshot, &zero)
            .build_value(&envelope)
            .unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn runtime_graph_unregistered_payload_passes_through() {
        let registry = registry_with_user_migration();
        let snapshot = registry.snapshot();
        let zero = VersionFormat::Date.zero();

        let envelope = Envelope {
            kind: "project".into(),
            payload: Dynamic::new(Project {
                name: "p".into(),
                lead: None,
            }),
        };
        let graph = GraphBuilder::new(&snapshot, &zero)
            .build_value(&envelope)
            .unwrap();
        // Project itself has no migrations, but its lead field reaches User.
        assert!(!graph.is_empty());

        let envelope = Envelope {
            kind: "count".into(),
            payload: Dynamic::new(7u32),
        };
        let graph = GraphBuilder::new(&snapshot, &zero)
            .build_value(&envelope)
            .unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn runtime_delegates_to_static_for_plain_types() {
        let registry = registry_with_user_migration();
        let snapshot = registry.snapshot();
        let zero = VersionFormat::Date.zero();

        let workspace = Workspace {
            users: vec![],
            projects: std::collections::HashMap::new(),
        };
        let graph = GraphBuilder::new(&snapshot, &zero)
            .build_value(&workspace)
            .unwrap();
        // Same reachability as the static walk, even with empty collections.
        assert!(!graph.is_empty());
    }
}
