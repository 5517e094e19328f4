//! HCL-style config loading.
//!
//! Parses the root file with `hcl-rs`, walks the resulting `hcl::Body`,
//! resolves `include "path"` (cycle-checked) and `env(NAME)` /
//! `env(NAME, "default")` function calls, and re-homogenizes the result
//! into [`crate::raw::RawNode`] — the untyped tree the migrator operates on.

pub mod env;
pub mod include;

use std::future::Future;
use std::pin::Pin;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{Error, Position};
use crate::raw::{RawNode, RawValue};
use include::Visited;

/// Block identifiers that accumulate into a named array field rather than
/// overwriting a single object field when declared more than once.
const PLURAL_FIELDS: &[(&str, &str)] = &[
    ("zone", "zones"),
    ("interface", "interfaces"),
    ("policy", "policies"),
    ("qos_policy", "qos_policies"),
    ("nat", "nats"),
    ("class", "classes"),
    ("rule", "rules"),
    ("api", "api"),
    ("dhcp", "dhcp"),
    ("migration", "migrations"),
    ("add_block", "add_blocks"),
    ("remove_block", "remove_blocks"),
    ("rename_field", "rename_fields"),
    ("move_field", "move_fields"),
    ("set_default", "set_defaults"),
];

/// Top-level block identifiers accepted by the loader (§6 "Blocks:").
/// `system` is kept here even though the current schema version flattens it
/// away (§4.C's 1.1→1.2 `rename_field` migration) — the loader runs before
/// migration and must still accept configs written against older schema
/// versions. `migration` blocks are consumed by the migrator, not bound into
/// `Config`, but are a legal top-level declaration.
const TOP_LEVEL_BLOCKS: &[&str] = &[
    "zone",
    "interface",
    "policy",
    "nat",
    "qos_policy",
    "dhcp",
    "dns",
    "mdns",
    "system",
    "web",
    "api",
    "syslog",
    "migration",
];

/// Block identifiers whose labels are injected as named fields into the
/// block's body before it is merged into the tree.
const LABEL_FIELDS: &[(&str, &[&str])] = &[
    ("zone", &["name"]),
    ("interface", &["name"]),
    ("policy", &["from_zone", "to_zone"]),
    ("qos_policy", &["name"]),
    ("class", &["name"]),
    ("rule", &["name"]),
    ("nat", &["name"]),
    ("api", &["name"]),
    ("migration", &["from", "to"]),
    ("add_block", &["path"]),
    ("remove_block", &["path"]),
    ("rename_field", &["from", "to"]),
    ("move_field", &["from", "to"]),
    ("set_default", &["path"]),
];

pub async fn load(root: &Utf8Path) -> Result<RawNode, Error> {
    let mut visited = Visited::default();
    load_file(root, &mut visited).await
}

fn load_file<'a>(
    path: &'a Utf8Path,
    visited: &'a mut Visited,
) -> Pin<Box<dyn Future<Output = Result<RawNode, Error>> + Send + 'a>> {
    Box::pin(async move {
        visited.enter(path)?;
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(Error::IO)?;
        let body: hcl::Body = hcl::from_str(&content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let fields = walk_body(body, path, visited, true).await?;
        visited.exit();
        Ok(RawNode::new(RawValue::Object(fields), (path.to_path_buf(), 0)))
    })
}

fn walk_body<'a>(
    body: hcl::Body,
    path: &'a Utf8Path,
    visited: &'a mut Visited,
    is_root: bool,
) -> Pin<Box<dyn Future<Output = Result<Vec<(String, RawNode)>, Error>> + Send + 'a>> {
    Box::pin(async move {
        let mut fields: Vec<(String, RawNode)> = Vec::new();

        for structure in body.into_iter() {
            match structure {
                hcl::Structure::Attribute(attr) => {
                    let pos: Position = (path.to_path_buf(), 0);
                    let value = expr_to_raw(attr.expr())?;
                    upsert(&mut fields, attr.key().to_string(), RawNode::new(value, pos));
                }
                hcl::Structure::Block(block) => {
                    let ident = block.identifier().to_string();

                    if ident == "include" {
                        let included = label_str(&block, 0).ok_or_else(|| Error::ConfigParse {
                            path: path.to_path_buf(),
                            message: "include requires a path label".to_string(),
                        })?;
                        let resolved = include::resolve_path(path, &included);
                        let included_tree = load_file(&resolved, visited).await?;
                        if let RawValue::Object(included_fields) = included_tree.value {
                            for (k, v) in included_fields {
                                upsert(&mut fields, k, v);
                            }
                        }
                        continue;
                    }

                    // §4.B: "unknown top-level blocks -> ConfigUnknownBlock".
                    // Nested blocks (a policy's `rule`, a qos_policy's
                    // `class`, ...) are validated by the typed binding step
                    // instead, since their legal identifiers vary by parent.
                    if is_root && !TOP_LEVEL_BLOCKS.contains(&ident.as_str()) {
                        return Err(Error::ConfigUnknownBlock {
                            block: ident,
                            path: path.to_path_buf(),
                            line: block_line(&block),
                        });
                    }

                    let pos: Position = (path.to_path_buf(), 0);
                    let mut inner = walk_body(block.body().clone(), path, visited, false).await?;
                    inject_labels(&ident, &block, &mut inner, &pos);
                    let node = RawNode::new(RawValue::Object(inner), pos);
                    merge_into(&mut fields, &ident, node);
                }
            }
        }

        Ok(fields)
    })
}

/// `hcl-rs`'s parsed AST does not carry source spans by default; until the
/// loader threads real line tracking through, unknown-block diagnostics
/// report line 0 rather than fabricating a number.
fn block_line(_block: &hcl::Block) -> u32 {
    0
}

fn upsert(fields: &mut Vec<(String, RawNode)>, key: String, value: RawNode) {
    if let Some(existing) = fields.iter_mut().find(|(k, _)| *k == key) {
        existing.1 = value;
    } else {
        fields.push((key, value));
    }
}

/// Merges a freshly parsed block into the accumulated field list: into an
/// array for known-repeatable block identifiers, otherwise as a plain
/// single field (last declaration wins).
fn merge_into(fields: &mut Vec<(String, RawNode)>, ident: &str, node: RawNode) {
    if let Some((_, plural)) = PLURAL_FIELDS.iter().find(|(id, _)| *id == ident) {
        match fields.iter_mut().find(|(k, _)| k == plural) {
            Some((_, existing)) => {
                if let RawValue::Array(items) = &mut existing.value {
                    items.push(node);
                }
            }
            None => {
                let pos = node.position.clone();
                fields.push((plural.to_string(), RawNode::new(RawValue::Array(vec![node]), pos)));
            }
        }
    } else {
        upsert(fields, ident.to_string(), node);
    }
}

fn label_str(block: &hcl::Block, index: usize) -> Option<String> {
    block.labels().get(index).map(|label| match label {
        hcl::BlockLabel::String(s) => s.clone(),
        hcl::BlockLabel::Identifier(ident) => ident.to_string(),
    })
}

fn inject_labels(ident: &str, block: &hcl::Block, fields: &mut Vec<(String, RawNode)>, pos: &Position) {
    if let Some((_, names)) = LABEL_FIELDS.iter().find(|(id, _)| *id == ident) {
        for (index, name) in names.iter().enumerate() {
            if let Some(label) = label_str(block, index) {
                upsert(fields, name.to_string(), RawNode::new(RawValue::String(label), pos.clone()));
            }
        }
    }
}

fn expr_to_raw(expr: &hcl::Expression) -> Result<RawValue, Error> {
    use hcl::Expression as E;

    match expr {
        E::Null => Ok(RawValue::Null),
        E::Bool(b) => Ok(RawValue::Bool(*b)),
        E::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(RawValue::Int(i))
            } else {
                Ok(RawValue::Float(n.as_f64().unwrap_or_default()))
            }
        }
        E::String(s) => Ok(RawValue::String(s.clone())),
        E::Array(items) => {
            let converted = items
                .iter()
                .map(|e| expr_to_raw(e).map(RawNode::synthetic))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RawValue::Array(converted))
        }
        E::Object(obj) => {
            let mut fields = Vec::new();
            for (key, value) in obj.iter() {
                fields.push((key.to_string(), RawNode::synthetic(expr_to_raw(value)?)));
            }
            Ok(RawValue::Object(fields))
        }
        E::FuncCall(call) if call.name.as_str() == "env" => {
            let name = call
                .args
                .first()
                .and_then(expr_as_str)
                .ok_or_else(|| Error::ConfigParse {
                    path: Utf8PathBuf::from("<env>"),
                    message: "env() requires a string name argument".to_string(),
                })?;
            let default = call.args.get(1).and_then(expr_as_str);
            Ok(RawValue::String(env::resolve(&name, default.as_deref())?))
        }
        other => Err(Error::ConfigParse {
            path: Utf8PathBuf::from("<expr>"),
            message: format!("unsupported expression kind: {other:?}"),
        }),
    }
}

fn expr_as_str(expr: &hcl::Expression) -> Option<String> {
    match expr {
        hcl::Expression::String(s) => Some(s.clone()),
        _ => None,
    }
}
