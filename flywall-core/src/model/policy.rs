use serde::{Deserialize, Serialize};

use crate::ident::{PolicyRuleName, ZoneName};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Accept,
    Drop,
    Reject,
    Log,
    Jump,
}

/// The packet-match predicate shared by policy rules and NAT blocks.
///
/// Written flat inside the owning block (`proto = "udp", dest_port = 5060`),
/// not as a nested `match { ... }` block, so the owning struct's `matches`
/// field is `#[serde(flatten)]`ed to pick these attributes up as siblings of
/// `name`/`action`/etc.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Match {
    pub proto: Option<String>,
    pub src: Option<String>,
    pub dest: Option<String>,
    pub src_port: Option<u16>,
    pub dest_port: Option<u16>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: PolicyRuleName,
    pub action: Action,
    /// Target chain for `action = jump`; `None` otherwise.
    #[serde(default)]
    pub jump_target: Option<String>,
    #[serde(flatten)]
    pub matches: Match,
}

/// An ordered rule list applied to a zone pair. Rule order within a policy
/// is preserved as written — it is not re-sorted by the renderer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub from_zone: ZoneName,
    pub to_zone: ZoneName,
    pub rules: Vec<Rule>,
}
