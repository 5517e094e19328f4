//! The five migration primitives. Each operation knows how to invert
//! itself given the tree it is about to be applied to, so the migrator can
//! build a downgrade path without a second, hand-maintained set of
//! declarations.

use crate::error::Error;
use crate::raw::{self, RawNode, RawValue};

#[derive(Clone, Debug, PartialEq)]
pub enum MigrationOp {
    AddBlock { path: String, default: serde_json::Value },
    RemoveBlock { path: String },
    /// Relocates a field, possibly across object boundaries and possibly
    /// changing its leaf name — `rename_field` and `move_field` are the
    /// same tree surgery (remove at `from`, insert at `to`) under two
    /// names depending on the intent being described.
    RenameField { from: String, to: String },
    MoveField { from: String, to: String },
    SetDefault { path: String, value: serde_json::Value },
}

impl MigrationOp {
    pub fn apply(&self, tree: &mut RawNode) -> Result<(), Error> {
        match self {
            MigrationOp::AddBlock { path, default } => {
                if tree.get_path(path).is_none() {
                    let node = raw::from_json(default.clone(), &tree.position);
                    tree.set_path(path, node);
                }
                Ok(())
            }
            MigrationOp::RemoveBlock { path } => {
                tree.remove_path(path);
                Ok(())
            }
            MigrationOp::RenameField { from, to } | MigrationOp::MoveField { from, to } => {
                if let Some(node) = tree.remove_path(from) {
                    tree.set_path(to, node);
                }
                Ok(())
            }
            MigrationOp::SetDefault { path, value } => {
                if tree.get_path(path).is_none() {
                    let node = raw::from_json(value.clone(), &tree.position);
                    tree.set_path(path, node);
                }
                Ok(())
            }
        }
    }

    /// Inverts this operation given the tree state *before* `apply` runs,
    /// so `RemoveBlock`'s inverse can restore exactly what was removed.
    /// Used only for downgrade tooling, never at apply time.
    pub fn invert(&self, pre_apply_tree: &RawNode) -> MigrationOp {
        match self {
            MigrationOp::AddBlock { path, .. } => MigrationOp::RemoveBlock { path: path.clone() },
            MigrationOp::RemoveBlock { path } => {
                let default = pre_apply_tree
                    .get_path(path)
                    .map(raw::to_json)
                    .unwrap_or(serde_json::Value::Null);
                MigrationOp::AddBlock {
                    path: path.clone(),
                    default,
                }
            }
            MigrationOp::RenameField { from, to } => MigrationOp::RenameField {
                from: to.clone(),
                to: from.clone(),
            },
            MigrationOp::MoveField { from, to } => MigrationOp::MoveField {
                from: to.clone(),
                to: from.clone(),
            },
            MigrationOp::SetDefault { path, .. } => {
                let prior = pre_apply_tree.get_path(path);
                match prior {
                    Some(node) => MigrationOp::SetDefault {
                        path: path.clone(),
                        value: raw::to_json(node),
                    },
                    None => MigrationOp::RemoveBlock { path: path.clone() },
                }
            }
        }
    }
}
