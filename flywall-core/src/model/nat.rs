use serde::{Deserialize, Serialize};

use crate::ident::InterfaceName;
use crate::model::policy::Match;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatType {
    Masquerade,
    Snat,
    Dnat,
}

/// Written flat inside the owning `nat` block, not as a nested
/// `translation { ... }` block, so `NatBlock::translation` is
/// `#[serde(flatten)]`ed onto it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Translation {
    pub addr: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NatBlock {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NatType,
    #[serde(default)]
    pub in_interface: Option<InterfaceName>,
    #[serde(default)]
    pub out_interface: Option<InterfaceName>,
    #[serde(flatten)]
    pub matches: Match,
    #[serde(flatten)]
    pub translation: Translation,
}
