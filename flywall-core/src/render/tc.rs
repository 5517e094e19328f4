//! `tc` artifact tree: HTB qdisc/class hierarchy plus `fw` filters keyed by
//! the fwmark the mangle table stamps onto matching packets (§4.E, §8 S1).
//!
//! Unlike nft, there is no `tc -f` batch mode, so the artifact serializes to
//! one argv per invocation (`Vec<Vec<String>>`) rather than a single script.

use crate::model::config::Config;
use crate::model::qos::Rate;

/// Class indices start at `0xa` so the rendered classid reads `1:a`, `1:b`,
/// ... matching the worked example in §8 S1.
const CLASS_IDX_BASE: u32 = 0xa;

#[derive(Clone, Debug, PartialEq)]
pub struct TcQdisc {
    pub interface: String,
    pub handle: String,
    pub default_class: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TcClass {
    pub interface: String,
    pub parent: String,
    pub classid: String,
    pub rate_kbps: u32,
    pub ceil_kbps: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TcFilter {
    pub interface: String,
    pub parent: String,
    pub fwmark: u32,
    pub flowid: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TcTree {
    pub qdiscs: Vec<TcQdisc>,
    pub classes: Vec<TcClass>,
    pub filters: Vec<TcFilter>,
}

fn classid(class_idx: u8) -> String {
    format!("1:{:x}", CLASS_IDX_BASE + class_idx as u32)
}

fn resolve_rate(rate: &Rate, direction_mbps: u32) -> u32 {
    match rate {
        Rate::Percent(pct) => direction_mbps * 1000 * (*pct as u32) / 100,
        Rate::Absolute(bw) => bw.mbps * 1000,
    }
}

/// One HTB hierarchy per enabled interface-bound QoS policy, downstream
/// (download) direction; upload shaping uses the same class layout against
/// `upload_mbps` on a second qdisc (ingress redirected to an ifb is out of
/// scope here — §4.E Non-goals).
pub fn render_tc(config: &Config) -> TcTree {
    let mut tree = TcTree::default();

    for policy in &config.qos_policies {
        if !policy.enabled {
            continue;
        }
        let Some(policy_idx) = policy.policy_idx else { continue };
        let iface = policy.interface.to_string();

        tree.qdiscs.push(TcQdisc {
            interface: iface.clone(),
            handle: "1:".to_string(),
            default_class: classid(0),
        });

        for class in &policy.classes {
            let Some(class_idx) = class.class_idx else { continue };
            let rate_kbps = resolve_rate(&class.rate, policy.download_mbps);
            tree.classes.push(TcClass {
                interface: iface.clone(),
                parent: "1:".to_string(),
                classid: classid(class_idx),
                rate_kbps,
                ceil_kbps: policy.download_mbps * 1000,
            });
        }

        for rule in &policy.rules {
            let Some(fwmark) = rule.fwmark else { continue };
            let Some(class) = policy.classes.iter().find(|c| c.name == rule.class) else {
                continue;
            };
            let Some(class_idx) = class.class_idx else { continue };
            tree.filters.push(TcFilter {
                interface: iface.clone(),
                parent: "1:".to_string(),
                fwmark,
                flowid: classid(class_idx),
            });
        }

        let _ = policy_idx;
    }

    tree
}

/// Per-item argv builders, one per tc verb × action. The reconciler diffs
/// structured [`TcQdisc`]/[`TcClass`]/[`TcFilter`] values against the
/// previously-applied tree and picks add/change/del per item (§4.F: tc has
/// no batch mode, so each mutation is its own invocation); [`serialize_tc`]
/// below just calls the `_add` builders for every item, for the initial
/// apply where there is no prior tree to diff against.
pub fn qdisc_add(q: &TcQdisc) -> Vec<String> {
    vec![
        "qdisc".to_string(),
        "add".to_string(),
        "dev".to_string(),
        q.interface.clone(),
        "root".to_string(),
        "handle".to_string(),
        q.handle.clone(),
        "htb".to_string(),
        "default".to_string(),
        q.default_class.trim_start_matches("1:").to_string(),
    ]
}

pub fn qdisc_del(q: &TcQdisc) -> Vec<String> {
    vec!["qdisc".to_string(), "del".to_string(), "dev".to_string(), q.interface.clone(), "root".to_string()]
}

fn class_htb_argv(verb: &str, c: &TcClass) -> Vec<String> {
    vec![
        "class".to_string(),
        verb.to_string(),
        "dev".to_string(),
        c.interface.clone(),
        "parent".to_string(),
        c.parent.clone(),
        "classid".to_string(),
        c.classid.clone(),
        "htb".to_string(),
        "rate".to_string(),
        format!("{}kbit", c.rate_kbps),
        "ceil".to_string(),
        format!("{}kbit", c.ceil_kbps),
    ]
}

pub fn class_add(c: &TcClass) -> Vec<String> {
    class_htb_argv("add", c)
}

/// `tc class change` rewrites rate/ceil on an existing classid in place,
/// avoiding a del+add that would transiently drop the class's filters.
pub fn class_change(c: &TcClass) -> Vec<String> {
    class_htb_argv("change", c)
}

pub fn class_del(c: &TcClass) -> Vec<String> {
    vec![
        "class".to_string(),
        "del".to_string(),
        "dev".to_string(),
        c.interface.clone(),
        "parent".to_string(),
        c.parent.clone(),
        "classid".to_string(),
        c.classid.clone(),
    ]
}

fn filter_fw_argv(verb: &str, f: &TcFilter) -> Vec<String> {
    vec![
        "filter".to_string(),
        verb.to_string(),
        "dev".to_string(),
        f.interface.clone(),
        "parent".to_string(),
        f.parent.clone(),
        "protocol".to_string(),
        "ip".to_string(),
        "handle".to_string(),
        format!("{:#x}", f.fwmark),
        "fw".to_string(),
        "flowid".to_string(),
        f.flowid.clone(),
    ]
}

pub fn filter_add(f: &TcFilter) -> Vec<String> {
    filter_fw_argv("add", f)
}

/// `tc filter replace` re-points an existing fwmark handle at a new
/// classid without a del+add gap during which marked packets would fall
/// back to the qdisc's default class.
pub fn filter_replace(f: &TcFilter) -> Vec<String> {
    filter_fw_argv("replace", f)
}

pub fn filter_del(f: &TcFilter) -> Vec<String> {
    vec![
        "filter".to_string(),
        "del".to_string(),
        "dev".to_string(),
        f.interface.clone(),
        "parent".to_string(),
        f.parent.clone(),
        "protocol".to_string(),
        "ip".to_string(),
        "handle".to_string(),
        format!("{:#x}", f.fwmark),
        "fw".to_string(),
    ]
}

/// Lowers a tree into the argv vectors executed one `tc` invocation at a
/// time (§4.F: non-atomic, journaled individually). Used for the initial
/// apply (no prior tree); subsequent applies go through the reconciler's
/// diff-and-pick-verb path using the per-item builders above.
pub fn serialize_tc(tree: &TcTree) -> Vec<Vec<String>> {
    let mut cmds = Vec::new();
    cmds.extend(tree.qdiscs.iter().map(qdisc_add));
    cmds.extend(tree.classes.iter().map(class_add));
    cmds.extend(tree.filters.iter().map(filter_add));
    cmds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{InterfaceName, QosClassName, QosPolicyName};
    use crate::model::config::SchemaVersion;
    use crate::model::qos::{Bandwidth, QosClass, QosMatch, QosPolicy, QosRule};

    fn config_with_one_policy() -> Config {
        let mut config = Config {
            schema_version: SchemaVersion("1.2".to_string()),
            ip_forwarding: true,
            mss_clamping: false,
            enable_flow_offload: false,
            state_dir: "/var/lib/flywall".to_string(),
            zones: Vec::new(),
            interfaces: Vec::new(),
            policies: Vec::new(),
            nats: Vec::new(),
            qos_policies: Vec::new(),
            dhcp: Vec::new(),
            dns: None,
            mdns: None,
            ebpf: None,
            web: None,
            api: Vec::new(),
            syslog: None,
        };
        config.qos_policies.push(QosPolicy {
            name: QosPolicyName::new("wan-shaping"),
            interface: InterfaceName::new("eth0"),
            enabled: true,
            upload_mbps: 10,
            download_mbps: 100,
            classes: vec![
                QosClass {
                    name: QosClassName::new("bulk"),
                    priority: 2,
                    rate: Rate::Percent(20),
                    class_idx: Some(0),
                },
                QosClass {
                    name: QosClassName::new("voip"),
                    priority: 0,
                    rate: Rate::Absolute(Bandwidth { mbps: 5 }),
                    class_idx: Some(1),
                },
            ],
            rules: vec![QosRule {
                name: "voip-rule".to_string(),
                class: QosClassName::new("voip"),
                matches: QosMatch::default(),
                fwmark: Some(0xF001),
            }],
            policy_idx: Some(0),
        });
        config
    }

    #[test]
    fn s1_classids_start_at_hex_a() {
        let config = config_with_one_policy();
        let tree = render_tc(&config);
        assert_eq!(tree.classes[0].classid, "1:a");
        assert_eq!(tree.classes[1].classid, "1:b");
    }

    #[test]
    fn s1_filter_handle_matches_fwmark() {
        let config = config_with_one_policy();
        let tree = render_tc(&config);
        let cmds = serialize_tc(&tree);
        let filter_cmd = cmds.iter().find(|c| c[0] == "filter").unwrap();
        assert!(filter_cmd.contains(&"0xf001".to_string()));
        assert!(filter_cmd.contains(&"1:b".to_string()));
    }

    #[test]
    fn class_change_reuses_add_argv_shape_with_change_verb() {
        let config = config_with_one_policy();
        let tree = render_tc(&config);
        let add = class_add(&tree.classes[0]);
        let change = class_change(&tree.classes[0]);
        assert_eq!(add[0], "class");
        assert_eq!(add[1], "add");
        assert_eq!(change[1], "change");
        assert_eq!(add[2..], change[2..]);
    }

    #[test]
    fn filter_del_omits_flowid() {
        let config = config_with_one_policy();
        let tree = render_tc(&config);
        let del = filter_del(&tree.filters[0]);
        assert!(!del.contains(&"flowid".to_string()));
        assert!(del.contains(&"0xf001".to_string()));
    }

    #[test]
    fn disabled_policy_renders_nothing() {
        let mut config = config_with_one_policy();
        config.qos_policies[0].enabled = false;
        let tree = render_tc(&config);
        assert!(tree.qdiscs.is_empty());
        assert!(tree.classes.is_empty());
        assert!(tree.filters.is_empty());
    }
}
