//! Schema migration: a DAG of named, invertible operations applied to the
//! raw config tree before it is bound to the typed model.
//!
//! Built-in migrations and operator-declared `migration` blocks share one
//! graph and one shortest-path search, so there is exactly one code path
//! for "how do I get from vN to vTarget", not two.

pub mod builtin;
pub mod ops;

use std::collections::{HashMap, VecDeque};

use crate::error::Error;
use crate::raw::{self, RawNode};
use ops::MigrationOp;

#[derive(Clone, Debug, PartialEq)]
pub struct Migration {
    pub from: String,
    pub to: String,
    pub ops: Vec<MigrationOp>,
}

pub struct MigrationGraph {
    migrations: Vec<Migration>,
}

impl MigrationGraph {
    pub fn with_builtins() -> Self {
        Self {
            migrations: builtin::builtins(),
        }
    }

    /// Extends the graph with operator-declared migrations from config.
    /// Built-ins and declared migrations share this one graph.
    pub fn extend(&mut self, declared: Vec<Migration>) {
        self.migrations.extend(declared);
    }

    fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<&Migration>> {
        if from == to {
            return Some(Vec::new());
        }

        let mut edges: HashMap<&str, Vec<&Migration>> = HashMap::new();
        for m in &self.migrations {
            edges.entry(m.from.as_str()).or_default().push(m);
        }

        let mut visited = HashMap::new();
        visited.insert(from, None::<&Migration>);
        let mut queue = VecDeque::new();
        queue.push_back(from);

        while let Some(node) = queue.pop_front() {
            if node == to {
                break;
            }
            if let Some(outgoing) = edges.get(node) {
                for m in outgoing {
                    if !visited.contains_key(m.to.as_str()) {
                        visited.insert(&m.to, Some(m));
                        queue.push_back(&m.to);
                    }
                }
            }
        }

        if !visited.contains_key(to) {
            return None;
        }

        let mut path = Vec::new();
        let mut cursor = to;
        while cursor != from {
            let m = visited.get(cursor).copied().flatten()?;
            path.push(m);
            cursor = m.from.as_str();
        }
        path.reverse();
        Some(path)
    }

    /// Applies the shortest migration path from the tree's declared
    /// `schema_version` to `target_version`, advancing the version field on
    /// success. Unknown version or missing path → `ConfigUnsupportedVersion`.
    pub fn apply(&self, mut tree: RawNode, target_version: &str) -> Result<RawNode, Error> {
        let current_version = tree
            .get_path("schema_version")
            .and_then(|n| n.as_str())
            .ok_or_else(|| Error::ConfigUnsupportedVersion("<missing>".to_string()))?
            .to_string();

        let path = self
            .shortest_path(&current_version, target_version)
            .ok_or_else(|| Error::ConfigUnsupportedVersion(current_version.clone()))?;

        for migration in path {
            for op in &migration.ops {
                op.apply(&mut tree)?;
            }
        }

        tree.set_path(
            "schema_version",
            crate::raw::RawNode::synthetic(crate::raw::RawValue::String(target_version.to_string())),
        );

        Ok(tree)
    }

    /// Computes the inverse of a forward path, for downgrade tooling only —
    /// never exercised during a normal apply.
    pub fn invert_path(&self, from: &str, to: &str, tree_before_forward: &RawNode) -> Option<Vec<MigrationOp>> {
        let path = self.shortest_path(from, to)?;
        let mut tree = tree_before_forward.clone();
        let mut inverses = Vec::new();
        for migration in &path {
            for op in &migration.ops {
                inverses.push(op.invert(&tree));
                op.apply(&mut tree).ok()?;
            }
        }
        inverses.reverse();
        Some(inverses)
    }
}

/// Reads `migration "from" "to" { ... }` blocks out of the raw tree (§4.C
/// "operator-declared migrations"). Ops of a given kind (`add_block`,
/// `remove_block`, `rename_field`, `move_field`, `set_default`) run in the
/// fixed order below regardless of declaration order, since cross-kind
/// interaction within one migration step is not a supported pattern here —
/// the ordering favors adding/defaulting before renaming/moving before
/// removing, so a field exists under its new name before anything that
/// might reference it is torn down.
pub fn parse_declared(tree: &RawNode) -> Vec<Migration> {
    let Some(migrations) = tree.get("migrations").and_then(|n| n.as_array()) else {
        return Vec::new();
    };

    migrations
        .iter()
        .filter_map(|node| {
            let from = node.get("from")?.as_str()?.to_string();
            let to = node.get("to")?.as_str()?.to_string();
            Some(Migration {
                from,
                to,
                ops: parse_ops(node),
            })
        })
        .collect()
}

fn parse_ops(migration_node: &RawNode) -> Vec<MigrationOp> {
    let mut ops = Vec::new();

    if let Some(nodes) = migration_node.get("set_defaults").and_then(|n| n.as_array()) {
        for node in nodes {
            if let (Some(path), Some(value)) = (node.get("path").and_then(|n| n.as_str()), node.get("value")) {
                ops.push(MigrationOp::SetDefault {
                    path: path.to_string(),
                    value: raw::to_json(value),
                });
            }
        }
    }

    if let Some(nodes) = migration_node.get("add_blocks").and_then(|n| n.as_array()) {
        for node in nodes {
            if let Some(path) = node.get("path").and_then(|n| n.as_str()) {
                let default = node.get("default").map(raw::to_json).unwrap_or(serde_json::json!({}));
                ops.push(MigrationOp::AddBlock {
                    path: path.to_string(),
                    default,
                });
            }
        }
    }

    if let Some(nodes) = migration_node.get("rename_fields").and_then(|n| n.as_array()) {
        for node in nodes {
            if let (Some(from), Some(to)) = (node.get("from").and_then(|n| n.as_str()), node.get("to").and_then(|n| n.as_str())) {
                ops.push(MigrationOp::RenameField {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
    }

    if let Some(nodes) = migration_node.get("move_fields").and_then(|n| n.as_array()) {
        for node in nodes {
            if let (Some(from), Some(to)) = (node.get("from").and_then(|n| n.as_str()), node.get("to").and_then(|n| n.as_str())) {
                ops.push(MigrationOp::MoveField {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
    }

    if let Some(nodes) = migration_node.get("remove_blocks").and_then(|n| n.as_array()) {
        for node in nodes {
            if let Some(path) = node.get("path").and_then(|n| n.as_str()) {
                ops.push(MigrationOp::RemoveBlock { path: path.to_string() });
            }
        }
    }

    ops
}
