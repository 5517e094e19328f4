//! The loader's output: an untyped nested tree annotated with source
//! positions, and the tree surgery the migrator performs on it before the
//! typed model ever sees it.
//!
//! Object keys keep declaration order (a `Vec<(String, RawNode)>` rather
//! than a map) since later steps — index assignment in particular — depend
//! on the order blocks were written in, not an arbitrary hash order.

use camino::Utf8PathBuf;

use crate::error::Position;

#[derive(Clone, Debug, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<RawNode>),
    Object(Vec<(String, RawNode)>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawNode {
    pub value: RawValue,
    pub position: Position,
}

impl RawNode {
    pub fn new(value: RawValue, position: Position) -> Self {
        Self { value, position }
    }

    pub fn synthetic(value: RawValue) -> Self {
        Self {
            value,
            position: (Utf8PathBuf::from("<migration>"), 0),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            RawValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.value {
            RawValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&[(String, RawNode)]> {
        match &self.value {
            RawValue::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Vec<(String, RawNode)>> {
        match &mut self.value {
            RawValue::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RawNode]> {
        match &self.value {
            RawValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&RawNode> {
        self.as_object()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut RawNode> {
        self.as_object_mut()?.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Dotted-path lookup, e.g. `"system.ip_forwarding"`.
    pub fn get_path(&self, path: &str) -> Option<&RawNode> {
        let mut node = self;
        for segment in path.split('.') {
            node = node.get(segment)?;
        }
        Some(node)
    }

    /// Insert or replace a top-level-or-nested field addressed by a dotted path,
    /// creating intermediate objects as needed.
    pub fn set_path(&mut self, path: &str, value: RawNode) {
        let mut segments = path.split('.').peekable();
        let mut node = self;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                match node.as_object_mut() {
                    Some(fields) => {
                        if let Some(existing) = fields.iter_mut().find(|(k, _)| k == segment) {
                            existing.1 = value;
                        } else {
                            fields.push((segment.to_string(), value));
                        }
                    }
                    None => {
                        node.value = RawValue::Object(vec![(segment.to_string(), value)]);
                    }
                }
                return;
            }
            let fields = match &mut node.value {
                RawValue::Object(fields) => fields,
                _ => {
                    node.value = RawValue::Object(Vec::new());
                    match &mut node.value {
                        RawValue::Object(fields) => fields,
                        _ => unreachable!(),
                    }
                }
            };
            if !fields.iter().any(|(k, _)| k == segment) {
                fields.push((segment.to_string(), RawNode::synthetic(RawValue::Object(Vec::new()))));
            }
            node = &mut fields.iter_mut().find(|(k, _)| k == segment).unwrap().1;
        }
    }

    /// Remove and return a dotted-path field.
    pub fn remove_path(&mut self, path: &str) -> Option<RawNode> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop()?;
        let mut node = self;
        for segment in &segments {
            node = node.get_mut(segment)?;
        }
        let fields = node.as_object_mut()?;
        let idx = fields.iter().position(|(k, _)| k == last)?;
        Some(fields.remove(idx).1)
    }
}

/// Converts the raw tree to `serde_json::Value` so the typed model can bind
/// to it with an ordinary `#[derive(Deserialize)]`, and position information
/// is discarded at that point (errors raised past this point are
/// `ConfigRefUnknown`/`ConfigConflict`, which carry positions recovered from
/// the *name*, not the node, since the canonical model no longer has nodes).
pub fn to_json(node: &RawNode) -> serde_json::Value {
    match &node.value {
        RawValue::Null => serde_json::Value::Null,
        RawValue::Bool(b) => serde_json::Value::Bool(*b),
        RawValue::Int(i) => serde_json::Value::Number((*i).into()),
        RawValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        RawValue::String(s) => serde_json::Value::String(s.clone()),
        RawValue::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        RawValue::Object(fields) => {
            let map = fields.iter().map(|(k, v)| (k.clone(), to_json(v))).collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Builds a raw tree from a `serde_json::Value`, stamping every node with
/// the same position (typically the including file, since a freshly parsed
/// JSON document carries no per-node source spans).
pub fn from_json(value: serde_json::Value, position: &Position) -> RawNode {
    let raw = match value {
        serde_json::Value::Null => RawValue::Null,
        serde_json::Value::Bool(b) => RawValue::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                RawValue::Int(i)
            } else {
                RawValue::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => RawValue::String(s),
        serde_json::Value::Array(items) => {
            RawValue::Array(items.into_iter().map(|v| from_json(v, position)).collect())
        }
        serde_json::Value::Object(map) => {
            RawValue::Object(map.into_iter().map(|(k, v)| (k, from_json(v, position))).collect())
        }
    };
    RawNode::new(raw, position.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> Position {
        (Utf8PathBuf::from("test.hcl"), 1)
    }

    #[test]
    fn set_and_get_nested_path() {
        let mut root = RawNode::new(RawValue::Object(Vec::new()), pos());
        root.set_path("system.ip_forwarding", RawNode::new(RawValue::Bool(true), pos()));
        assert_eq!(root.get_path("system.ip_forwarding").and_then(|n| n.as_bool()), Some(true));
    }

    #[test]
    fn remove_path_returns_removed_node() {
        let mut root = RawNode::new(RawValue::Object(Vec::new()), pos());
        root.set_path("system.ip_forwarding", RawNode::new(RawValue::Bool(true), pos()));
        let removed = root.remove_path("system.ip_forwarding").unwrap();
        assert_eq!(removed.as_bool(), Some(true));
        assert!(root.get_path("system.ip_forwarding").is_none());
    }
}
