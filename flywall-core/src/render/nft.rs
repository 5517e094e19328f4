//! nft artifact trees (filter/mangle/nat) and their shared serializer.
//!
//! One tree shape (`NftTable`/`NftChain`/`NftRule`) and one
//! `serialize_nft` function cover all three nft-family artifact kinds, so
//! there is one nft-script grammar writer, not three (§4.E "[ADDED]").

use std::fmt::Write as _;

use crate::model::config::Config;
use crate::model::policy::Action;
use crate::model::qos::QosMatch;

pub const NFLOG_GROUP: u16 = 100;

#[derive(Clone, Debug, PartialEq)]
pub struct NftTable {
    pub family: String,
    pub name: String,
    pub chains: Vec<NftChain>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NftChain {
    pub name: String,
    /// `Some` for a base chain attached to a netfilter hook; `None` for a
    /// regular chain only reachable via `jump`/`goto`.
    pub hook: Option<ChainHook>,
    pub rules: Vec<NftRule>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChainHook {
    pub kind: String,
    pub hook: String,
    pub priority: i32,
    pub policy: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NftRule {
    pub matches: Vec<MatchExpr>,
    pub log: bool,
    pub verdict: Option<Verdict>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MatchExpr {
    Proto(String),
    SrcAddr(String),
    DestAddr(String),
    SrcPort(u16),
    DestPort(u16),
    Iifname(Vec<String>),
    Oifname(Vec<String>),
    Mark(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Accept,
    Drop,
    Reject,
    Jump(String),
    Masquerade,
    Snat(Option<String>, Option<u16>),
    Dnat(Option<String>, Option<u16>),
    MarkSet(u32),
}

fn match_for(proto: &Option<String>, src: &Option<String>, dest: &Option<String>, sp: Option<u16>, dp: Option<u16>) -> Vec<MatchExpr> {
    let mut m = Vec::new();
    if let Some(p) = proto {
        m.push(MatchExpr::Proto(p.clone()));
    }
    if let Some(s) = src {
        m.push(MatchExpr::SrcAddr(s.clone()));
    }
    if let Some(d) = dest {
        m.push(MatchExpr::DestAddr(d.clone()));
    }
    if let Some(p) = sp {
        m.push(MatchExpr::SrcPort(p));
    }
    if let Some(p) = dp {
        m.push(MatchExpr::DestPort(p));
    }
    m
}

fn zone_chain_name(from: &str, to: &str) -> String {
    format!("{from}_{to}")
}

/// Interfaces belonging to a zone, in declaration order.
fn zone_interfaces<'a>(config: &'a Config, zone: &str) -> Vec<&'a str> {
    config
        .interfaces
        .iter()
        .filter(|i| !i.disabled && i.zone.as_ref().map(|z| z.as_str()) == Some(zone))
        .map(|i| i.name.as_str())
        .collect()
}

/// `nft/filter`: family `inet flywall`, chains `input`/`forward`/`output`
/// plus one chain per declared zone pair, each ending in a default drop.
pub fn render_filter(config: &Config) -> NftTable {
    let mut chains = vec![
        NftChain {
            name: "input".to_string(),
            hook: Some(ChainHook {
                kind: "filter".to_string(),
                hook: "input".to_string(),
                priority: 0,
                policy: "accept".to_string(),
            }),
            rules: Vec::new(),
        },
        NftChain {
            name: "output".to_string(),
            hook: Some(ChainHook {
                kind: "filter".to_string(),
                hook: "output".to_string(),
                priority: 0,
                policy: "accept".to_string(),
            }),
            rules: Vec::new(),
        },
    ];

    let mut forward_rules = Vec::new();
    let mut zone_pair_chains = Vec::new();

    for policy in &config.policies {
        let chain_name = zone_chain_name(policy.from_zone.as_str(), policy.to_zone.as_str());

        let from_ifaces = zone_interfaces(config, policy.from_zone.as_str());
        let to_ifaces = zone_interfaces(config, policy.to_zone.as_str());
        let mut jump_matches = Vec::new();
        if !from_ifaces.is_empty() {
            jump_matches.push(MatchExpr::Iifname(from_ifaces.into_iter().map(String::from).collect()));
        }
        if !to_ifaces.is_empty() {
            jump_matches.push(MatchExpr::Oifname(to_ifaces.into_iter().map(String::from).collect()));
        }
        forward_rules.push(NftRule {
            matches: jump_matches,
            log: false,
            verdict: Some(Verdict::Jump(chain_name.clone())),
        });

        let mut rules: Vec<NftRule> = policy
            .rules
            .iter()
            .map(|rule| {
                let matches = match_for(
                    &rule.matches.proto,
                    &rule.matches.src,
                    &rule.matches.dest,
                    rule.matches.src_port,
                    rule.matches.dest_port,
                );
                let (log, verdict) = match rule.action {
                    Action::Accept => (false, Some(Verdict::Accept)),
                    Action::Drop => (false, Some(Verdict::Drop)),
                    Action::Reject => (false, Some(Verdict::Reject)),
                    Action::Log => (true, None),
                    Action::Jump => (false, rule.jump_target.clone().map(Verdict::Jump)),
                };
                NftRule { matches, log, verdict }
            })
            .collect();
        // §8 S3: every zone-pair chain ends in an explicit default drop.
        rules.push(NftRule {
            matches: Vec::new(),
            log: false,
            verdict: Some(Verdict::Drop),
        });

        zone_pair_chains.push(NftChain {
            name: chain_name,
            hook: None,
            rules,
        });
    }

    chains.push(NftChain {
        name: "forward".to_string(),
        hook: Some(ChainHook {
            kind: "filter".to_string(),
            hook: "forward".to_string(),
            priority: 0,
            policy: "accept".to_string(),
        }),
        rules: forward_rules,
    });
    chains.extend(zone_pair_chains);

    NftTable {
        family: "inet".to_string(),
        name: "flywall".to_string(),
        chains,
    }
}

/// `nft/mangle`: table `ip flywall`, chain `prerouting`. One rule per QoS
/// rule setting `meta mark set <fwmark>` — the fwmark contract (§3, §8.1).
pub fn render_mangle(config: &Config) -> Option<NftTable> {
    if config.qos_policies.is_empty() {
        return None;
    }

    let mut rules = Vec::new();
    for policy in &config.qos_policies {
        if !policy.enabled {
            continue;
        }
        for rule in &policy.rules {
            let Some(fwmark) = rule.fwmark else { continue };
            let q: &QosMatch = &rule.matches;
            let mut matches = match_for(&q.proto, &q.src, &q.dest, q.src_port, q.dest_port);
            matches.insert(0, MatchExpr::Oifname(vec![policy.interface.to_string()]));
            rules.push(NftRule {
                matches,
                log: false,
                verdict: Some(Verdict::MarkSet(fwmark)),
            });
        }
    }

    if rules.is_empty() {
        return None;
    }

    Some(NftTable {
        family: "ip".to_string(),
        name: "flywall".to_string(),
        chains: vec![NftChain {
            name: "prerouting".to_string(),
            hook: Some(ChainHook {
                kind: "filter".to_string(),
                hook: "prerouting".to_string(),
                priority: -150, // mangle hook priority
                policy: "accept".to_string(),
            }),
            rules,
        }],
    })
}

/// `nft/nat`: table `ip flywall-nat`, chains `prerouting`/`postrouting`.
pub fn render_nat(config: &Config) -> Option<NftTable> {
    if config.nats.is_empty() {
        return None;
    }

    use crate::model::nat::NatType;

    let mut prerouting = Vec::new();
    let mut postrouting = Vec::new();

    for nat in &config.nats {
        let matches = match_for(
            &nat.matches.proto,
            &nat.matches.src,
            &nat.matches.dest,
            nat.matches.src_port,
            nat.matches.dest_port,
        );
        match nat.kind {
            NatType::Masquerade => {
                let mut matches = matches;
                if let Some(out_if) = &nat.out_interface {
                    matches.push(MatchExpr::Oifname(vec![out_if.to_string()]));
                }
                postrouting.push(NftRule {
                    matches,
                    log: false,
                    verdict: Some(Verdict::Masquerade),
                });
            }
            NatType::Snat => {
                let mut matches = matches;
                if let Some(out_if) = &nat.out_interface {
                    matches.push(MatchExpr::Oifname(vec![out_if.to_string()]));
                }
                postrouting.push(NftRule {
                    matches,
                    log: false,
                    verdict: Some(Verdict::Snat(nat.translation.addr.clone(), nat.translation.port)),
                });
            }
            NatType::Dnat => {
                let mut matches = matches;
                if let Some(in_if) = &nat.in_interface {
                    matches.push(MatchExpr::Iifname(vec![in_if.to_string()]));
                }
                prerouting.push(NftRule {
                    matches,
                    log: false,
                    verdict: Some(Verdict::Dnat(nat.translation.addr.clone(), nat.translation.port)),
                });
            }
        }
    }

    Some(NftTable {
        family: "ip".to_string(),
        name: "flywall-nat".to_string(),
        chains: vec![
            NftChain {
                name: "prerouting".to_string(),
                hook: Some(ChainHook {
                    kind: "nat".to_string(),
                    hook: "prerouting".to_string(),
                    priority: -100,
                    policy: "accept".to_string(),
                }),
                rules: prerouting,
            },
            NftChain {
                name: "postrouting".to_string(),
                hook: Some(ChainHook {
                    kind: "nat".to_string(),
                    hook: "postrouting".to_string(),
                    priority: 100,
                    policy: "accept".to_string(),
                }),
                rules: postrouting,
            },
        ],
    })
}

fn write_match(out: &mut String, m: &MatchExpr) {
    match m {
        MatchExpr::Proto(p) => {
            let _ = write!(out, "ip protocol {p} ");
        }
        MatchExpr::SrcAddr(a) => {
            let _ = write!(out, "ip saddr {a} ");
        }
        MatchExpr::DestAddr(a) => {
            let _ = write!(out, "ip daddr {a} ");
        }
        MatchExpr::SrcPort(p) => {
            let _ = write!(out, "sport {p} ");
        }
        MatchExpr::DestPort(p) => {
            let _ = write!(out, "dport {p} ");
        }
        MatchExpr::Iifname(names) => {
            let _ = write!(out, "iifname {{ {} }} ", names.join(", "));
        }
        MatchExpr::Oifname(names) => {
            let _ = write!(out, "oifname {{ {} }} ", names.join(", "));
        }
        MatchExpr::Mark(mark) => {
            let _ = write!(out, "meta mark {mark:#06x} ");
        }
    }
}

fn write_verdict(out: &mut String, v: &Verdict) {
    match v {
        Verdict::Accept => out.push_str("accept"),
        Verdict::Drop => out.push_str("drop"),
        Verdict::Reject => out.push_str("reject"),
        Verdict::Jump(chain) => {
            let _ = write!(out, "jump {chain}");
        }
        Verdict::Masquerade => out.push_str("masquerade"),
        Verdict::Snat(addr, port) => {
            out.push_str("snat to ");
            if let Some(addr) = addr {
                out.push_str(addr);
            }
            if let Some(port) = port {
                let _ = write!(out, ":{port}");
            }
        }
        Verdict::Dnat(addr, port) => {
            out.push_str("dnat to ");
            if let Some(addr) = addr {
                out.push_str(addr);
            }
            if let Some(port) = port {
                let _ = write!(out, ":{port}");
            }
        }
        Verdict::MarkSet(mark) => {
            let _ = write!(out, "meta mark set {mark:#06x}");
        }
    }
}

/// Serializes a set of nft tables to the literal script text fed to
/// `nft -f -` (§6 kernel boundary). One function for all three nft
/// artifact kinds (filter/mangle/nat).
pub fn serialize_nft(tables: &[NftTable]) -> String {
    let mut out = String::new();
    for table in tables {
        let _ = writeln!(out, "table {} {} {{", table.family, table.name);
        for chain in &table.chains {
            let _ = write!(out, "  chain {} {{\n", chain.name);
            if let Some(hook) = &chain.hook {
                let _ = writeln!(
                    out,
                    "    type {} hook {} priority {}; policy {};",
                    hook.kind, hook.hook, hook.priority, hook.policy
                );
            }
            for rule in &chain.rules {
                out.push_str("    ");
                for m in &rule.matches {
                    write_match(&mut out, m);
                }
                if rule.log {
                    let _ = write!(out, "log group {NFLOG_GROUP} ");
                }
                if let Some(verdict) = &rule.verdict {
                    write_verdict(&mut out, verdict);
                }
                out.push('\n');
            }
            out.push_str("  }\n");
        }
        out.push_str("}\n");
    }
    out
}
