//! Built-in migrations shipped in-crate so `flywall validate` works against
//! historical configs without requiring an operator-declared migration file.

use crate::migrate::Migration;
use crate::migrate::ops::MigrationOp;

pub fn builtins() -> Vec<Migration> {
    vec![
        Migration {
            from: "1.0".to_string(),
            to: "1.1".to_string(),
            ops: vec![MigrationOp::AddBlock {
                path: "ebpf".to_string(),
                default: serde_json::json!({ "enabled": false }),
            }],
        },
        Migration {
            from: "1.1".to_string(),
            to: "1.2".to_string(),
            ops: vec![MigrationOp::RenameField {
                from: "system.ip_forwarding".to_string(),
                to: "ip_forwarding".to_string(),
            }],
        },
    ]
}
