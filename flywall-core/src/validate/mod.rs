//! Validator & Expander (§4.D): cross-reference resolution, default
//! materialization, stable index assignment, and conflict rejection.
//!
//! Steps run in the order the spec lists them and are pure — same input
//! `Config` always produces the same `CanonicalConfig` or the same error,
//! which is what lets the reconciler treat "nothing changed" reloads and
//! rollback byte-identity (§8 invariants 2-3) as checkable facts rather
//! than best-effort behavior.

mod cidr;

use std::collections::{HashMap, HashSet};

use crate::error::Error;
use crate::ident::{InterfaceName, QosClassName, ZoneName};
use crate::model::config::{CanonicalConfig, Config};
use crate::model::leaf::DnsConfig;
use crate::model::qos::{self, MAX_QOS_POLICIES, Rate};

pub fn validate(mut config: Config) -> Result<CanonicalConfig, Error> {
    resolve_references(&config)?;
    materialize_defaults(&mut config);
    assign_indices(&mut config);
    reject_conflicts(&config)?;
    Ok(CanonicalConfig::new(config))
}

/// Step 2: default materialization (§4.D step 2). `#[serde(default)]` on
/// individual fields covers defaults *within* a declared block (syslog's
/// port/protocol/tag/facility, dns's mode/listen_port when the surrounding
/// block is present but a field is not), but an absent `dns` block itself
/// has no field to default — the spec still calls for DNS mode "forward"
/// when absent, so that materializes here, as a step of the validator
/// rather than a quirk of whether the author wrote a `dns { ... }` block at
/// all. This keeps defaulting observable in the canonical model (§4.A)
/// instead of leaving "no dns block" and "dns block with explicit
/// mode=forward" as two distinct but equivalent states downstream.
fn materialize_defaults(config: &mut Config) {
    config.dns.get_or_insert_with(DnsConfig::default);
}

fn ref_unknown(kind: &str, name: impl Into<String>) -> Error {
    Error::ConfigRefUnknown {
        kind: kind.to_string(),
        name: name.into(),
    }
}

fn conflict(message: impl Into<String>) -> Error {
    Error::ConfigConflict {
        message: message.into(),
        position: None,
    }
}

/// Step 1: resolve all cross-references (zone names, interface names, QoS
/// class references). Unresolved -> `ConfigRefUnknown{kind,name}`.
fn resolve_references(config: &Config) -> Result<(), Error> {
    let zones: HashSet<&ZoneName> = config.zones.iter().map(|z| &z.name).collect();
    let interfaces: HashSet<&InterfaceName> = config.interfaces.iter().map(|i| &i.name).collect();

    for interface in &config.interfaces {
        if let Some(zone) = &interface.zone {
            if !zones.contains(zone) {
                return Err(ref_unknown("zone", zone.as_str()));
            }
        }
    }

    for policy in &config.policies {
        if !zones.contains(&policy.from_zone) {
            return Err(ref_unknown("zone", policy.from_zone.as_str()));
        }
        if !zones.contains(&policy.to_zone) {
            return Err(ref_unknown("zone", policy.to_zone.as_str()));
        }
    }

    for nat in &config.nats {
        if let Some(iface) = &nat.in_interface {
            if !interfaces.contains(iface) {
                return Err(ref_unknown("interface", iface.as_str()));
            }
        }
        if let Some(iface) = &nat.out_interface {
            if !interfaces.contains(iface) {
                return Err(ref_unknown("interface", iface.as_str()));
            }
        }
    }

    for dhcp in &config.dhcp {
        if !interfaces.contains(&dhcp.interface) {
            return Err(ref_unknown("interface", dhcp.interface.as_str()));
        }
    }

    for policy in &config.qos_policies {
        if !interfaces.contains(&policy.interface) {
            return Err(ref_unknown("interface", policy.interface.as_str()));
        }
        let classes: HashSet<&QosClassName> = policy.classes.iter().map(|c| &c.name).collect();
        for rule in &policy.rules {
            if !classes.contains(&rule.class) {
                return Err(ref_unknown("qos class", rule.class.as_str()));
            }
        }
    }

    Ok(())
}

/// Step 3: assign declaration-order indices (policies, classes within a
/// policy) and record each QoS rule's `fwmark` (§3 derived fields).
fn assign_indices(config: &mut Config) {
    for (policy_idx, policy) in config.qos_policies.iter_mut().enumerate() {
        let policy_idx = policy_idx as u8;
        policy.policy_idx = Some(policy_idx);

        let mut class_idx_by_name: HashMap<QosClassName, u8> = HashMap::new();
        for (class_idx, class) in policy.classes.iter_mut().enumerate() {
            let class_idx = class_idx as u8;
            class.class_idx = Some(class_idx);
            class_idx_by_name.insert(class.name.clone(), class_idx);
        }

        for rule in policy.rules.iter_mut() {
            if let Some(&class_idx) = class_idx_by_name.get(&rule.class) {
                rule.fwmark = Some(qos::fwmark(policy_idx, class_idx));
            }
        }
    }
}

/// Step 4: reject conflicts - duplicate names, overlapping static IPv4,
/// DHCP on a disabled interface or alongside static IPv4 on the same
/// interface, QoS rate overshoot, mark-range overflow.
fn reject_conflicts(config: &Config) -> Result<(), Error> {
    if config.qos_policies.len() > MAX_QOS_POLICIES {
        return Err(conflict(format!(
            "{} qos_policy blocks declared, exceeding the {}-policy fwmark allocation bound",
            config.qos_policies.len(),
            MAX_QOS_POLICIES
        )));
    }

    reject_duplicates("zone", config.zones.iter().map(|z| z.name.as_str()))?;
    reject_duplicates("interface", config.interfaces.iter().map(|i| i.name.as_str()))?;
    reject_duplicates("qos_policy", config.qos_policies.iter().map(|p| p.name.as_str()))?;
    reject_duplicates("api key", config.api.iter().map(|a| a.name.as_str()))?;

    for policy in &config.qos_policies {
        reject_duplicates("qos class", policy.classes.iter().map(|c| c.name.as_str()))?;

        let percent_sum: u32 = policy
            .classes
            .iter()
            .filter_map(|c| match c.rate {
                Rate::Percent(pct) => Some(pct as u32),
                Rate::Absolute(_) => None,
            })
            .sum();
        if percent_sum > 100 {
            return Err(conflict(format!(
                "qos_policy `{}` classes sum to {}% of bandwidth, exceeding 100%",
                policy.name, percent_sum
            )));
        }
    }

    let disabled_interfaces: HashSet<&InterfaceName> = config
        .interfaces
        .iter()
        .filter(|i| i.disabled)
        .map(|i| &i.name)
        .collect();
    for dhcp in &config.dhcp {
        if disabled_interfaces.contains(&dhcp.interface) {
            return Err(conflict(format!(
                "dhcp scope declared on disabled interface `{}`",
                dhcp.interface
            )));
        }
    }

    for interface in &config.interfaces {
        if interface.dhcp && !interface.ipv4.is_empty() {
            return Err(conflict(format!(
                "interface `{}` declares both `dhcp = true` and static `ipv4` addresses",
                interface.name
            )));
        }
    }

    reject_overlapping_static_ipv4(config)?;

    Ok(())
}

fn reject_duplicates<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(conflict(format!("duplicate {kind} name `{name}`")));
        }
    }
    Ok(())
}

/// Interfaces with no `zone` form their own broadcast domain of one; a
/// shared zone is what puts two interfaces on the same wire in practice,
/// so overlap is only checked within a zone.
fn reject_overlapping_static_ipv4(config: &Config) -> Result<(), Error> {
    let mut by_zone: HashMap<Option<&ZoneName>, Vec<(&InterfaceName, cidr::Cidr)>> = HashMap::new();

    for interface in &config.interfaces {
        if interface.disabled || interface.dhcp {
            continue;
        }
        for addr in &interface.ipv4 {
            let Some(parsed) = cidr::Cidr::parse(addr) else {
                continue;
            };
            by_zone
                .entry(interface.zone.as_ref())
                .or_default()
                .push((&interface.name, parsed));
        }
    }

    for (zone, members) in &by_zone {
        if zone.is_none() {
            continue;
        }
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                let (name_a, cidr_a) = &members[i];
                let (name_b, cidr_b) = &members[j];
                if name_a != name_b && cidr_a.overlaps(cidr_b) {
                    return Err(conflict(format!(
                        "overlapping static IPv4 between `{name_a}` and `{name_b}` on zone `{}`",
                        zone.unwrap()
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{InterfaceName, PolicyRuleName, QosClassName, QosPolicyName, ZoneName};
    use crate::model::config::SchemaVersion;
    use crate::model::interface::Interface;
    use crate::model::policy::{Action, Match, Policy, Rule};
    use crate::model::qos::{QosClass, QosMatch, QosPolicy, QosRule};
    use crate::model::zone::Zone;

    fn base_config() -> Config {
        Config {
            schema_version: SchemaVersion("1.2".to_string()),
            ip_forwarding: false,
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
        }
    }

    fn iface(name: &str, zone: Option<&str>, ipv4: &[&str]) -> Interface {
        Interface {
            name: InterfaceName::new(name),
            zone: zone.map(ZoneName::new),
            ipv4: ipv4.iter().map(|s| s.to_string()).collect(),
            ipv6: Vec::new(),
            dhcp: false,
            disabled: false,
            mtu: None,
        }
    }

    #[test]
    fn rejects_unknown_zone_reference() {
        let mut config = base_config();
        config.interfaces.push(iface("eth1", Some("lan"), &[]));
        let err = validate(config).unwrap_err();
        assert!(matches!(err, Error::ConfigRefUnknown { kind, name } if kind == "zone" && name == "lan"));
    }

    #[test]
    fn rejects_duplicate_zone_names() {
        let mut config = base_config();
        config.zones.push(Zone::new("lan"));
        config.zones.push(Zone::new("LAN"));
        let err = validate(config).unwrap_err();
        assert!(matches!(err, Error::ConfigConflict { .. }));
    }

    #[test]
    fn s1_qos_fwmark_assignment() {
        let mut config = base_config();
        config.interfaces.push(iface("eth1", None, &[]));
        config.qos_policies.push(QosPolicy {
            name: QosPolicyName::new("lan-qos"),
            interface: InterfaceName::new("eth1"),
            enabled: true,
            upload_mbps: 20,
            download_mbps: 100,
            classes: vec![
                QosClass {
                    name: QosClassName::new("voip"),
                    priority: 1,
                    rate: Rate::Percent(10),
                    class_idx: None,
                },
                QosClass {
                    name: QosClassName::new("web"),
                    priority: 3,
                    rate: Rate::Percent(50),
                    class_idx: None,
                },
            ],
            rules: vec![
                QosRule {
                    name: "sip-rule".to_string(),
                    class: QosClassName::new("voip"),
                    matches: QosMatch {
                        proto: Some("udp".to_string()),
                        dest_port: Some(5060),
                        ..Default::default()
                    },
                    fwmark: None,
                },
                QosRule {
                    name: "http-rule".to_string(),
                    class: QosClassName::new("web"),
                    matches: QosMatch {
                        proto: Some("tcp".to_string()),
                        dest_port: Some(80),
                        ..Default::default()
                    },
                    fwmark: None,
                },
            ],
            policy_idx: None,
        });

        let canonical = validate(config).unwrap();
        let policy = &canonical.get().qos_policies[0];
        assert_eq!(policy.policy_idx, Some(0));
        assert_eq!(policy.classes[0].class_idx, Some(0));
        assert_eq!(policy.classes[1].class_idx, Some(1));
        assert_eq!(policy.rules[0].fwmark, Some(0xF000));
        assert_eq!(policy.rules[1].fwmark, Some(0xF001));
    }

    #[test]
    fn rejects_qos_rate_over_100_percent() {
        let mut config = base_config();
        config.interfaces.push(iface("eth1", None, &[]));
        config.qos_policies.push(QosPolicy {
            name: QosPolicyName::new("lan-qos"),
            interface: InterfaceName::new("eth1"),
            enabled: true,
            upload_mbps: 20,
            download_mbps: 100,
            classes: vec![
                QosClass {
                    name: QosClassName::new("a"),
                    priority: 1,
                    rate: Rate::Percent(60),
                    class_idx: None,
                },
                QosClass {
                    name: QosClassName::new("b"),
                    priority: 1,
                    rate: Rate::Percent(60),
                    class_idx: None,
                },
            ],
            rules: Vec::new(),
            policy_idx: None,
        });
        let err = validate(config).unwrap_err();
        assert!(matches!(err, Error::ConfigConflict { .. }));
    }

    #[test]
    fn rejects_overlapping_static_ipv4_same_zone() {
        let mut config = base_config();
        config.zones.push(Zone::new("lan"));
        config.interfaces.push(iface("eth1", Some("lan"), &["192.168.1.1/24"]));
        config.interfaces.push(iface("eth2", Some("lan"), &["192.168.1.254/24"]));
        let err = validate(config).unwrap_err();
        assert!(matches!(err, Error::ConfigConflict { .. }));
    }

    #[test]
    fn allows_non_overlapping_static_ipv4() {
        let mut config = base_config();
        config.zones.push(Zone::new("lan"));
        config.interfaces.push(iface("eth1", Some("lan"), &["192.168.1.1/24"]));
        config.interfaces.push(iface("eth2", Some("lan"), &["10.0.0.1/24"]));
        assert!(validate(config).is_ok());
    }

    #[test]
    fn rejects_dhcp_on_disabled_interface() {
        let mut config = base_config();
        let mut disabled = iface("eth1", None, &[]);
        disabled.disabled = true;
        config.interfaces.push(disabled);
        config.dhcp.push(crate::model::leaf::DhcpScope {
            interface: InterfaceName::new("eth1"),
            range_start: "192.168.1.100".parse().unwrap(),
            range_end: "192.168.1.200".parse().unwrap(),
            lease_time: std::time::Duration::from_secs(3600),
            dns: Vec::new(),
            domain: None,
        });
        let err = validate(config).unwrap_err();
        assert!(matches!(err, Error::ConfigConflict { .. }));
    }

    #[test]
    fn rejects_dhcp_with_static_ipv4_on_same_interface() {
        let mut config = base_config();
        let mut interface = iface("eth1", None, &["192.168.1.1/24"]);
        interface.dhcp = true;
        config.interfaces.push(interface);
        let err = validate(config).unwrap_err();
        assert!(matches!(err, Error::ConfigConflict { .. }));
    }

    #[test]
    fn allows_dhcp_without_static_ipv4() {
        let mut config = base_config();
        let mut interface = iface("eth1", None, &[]);
        interface.dhcp = true;
        config.interfaces.push(interface);
        assert!(validate(config).is_ok());
    }

    #[test]
    fn rejects_more_than_240_qos_policies() {
        let mut config = base_config();
        config.interfaces.push(iface("eth1", None, &[]));
        for i in 0..241 {
            config.qos_policies.push(QosPolicy {
                name: QosPolicyName::new(format!("p{i}")),
                interface: InterfaceName::new("eth1"),
                enabled: true,
                upload_mbps: 1,
                download_mbps: 1,
                classes: Vec::new(),
                rules: Vec::new(),
                policy_idx: None,
            });
        }
        let err = validate(config).unwrap_err();
        assert!(matches!(err, Error::ConfigConflict { .. }));
    }

    #[test]
    fn s3_default_drop_policy_rule_order_preserved() {
        let mut config = base_config();
        config.zones.push(Zone::new("lan"));
        config.zones.push(Zone::new("wan"));
        config.policies.push(Policy {
            from_zone: ZoneName::new("lan"),
            to_zone: ZoneName::new("wan"),
            rules: vec![Rule {
                name: PolicyRuleName::new("allow-out"),
                action: Action::Accept,
                jump_target: None,
                matches: Match::default(),
            }],
        });
        let canonical = validate(config).unwrap();
        assert_eq!(canonical.get().policies[0].rules.len(), 1);
    }

    #[test]
    fn dns_materializes_forward_mode_when_block_absent() {
        let config = base_config();
        assert!(config.dns.is_none());
        let canonical = validate(config).unwrap();
        let dns = canonical.get().dns.as_ref().expect("dns should be materialized when absent");
        assert_eq!(dns.mode, "forward");
        assert_eq!(dns.listen_port, 53);
    }

    #[test]
    fn syslog_defaults_match_invariant_6() {
        let mut config = base_config();
        config.syslog = Some(crate::model::leaf::SyslogConfig {
            host: Some("10.0.0.9".to_string()),
            port: 514,
            protocol: "udp".to_string(),
            tag: "flywall".to_string(),
            facility: 1,
        });
        let canonical = validate(config).unwrap();
        let syslog = canonical.get().syslog.as_ref().unwrap();
        assert_eq!(syslog.port, 514);
        assert_eq!(syslog.protocol, "udp");
        assert_eq!(syslog.tag, "flywall");
        assert_eq!(syslog.facility, 1);
    }
}
