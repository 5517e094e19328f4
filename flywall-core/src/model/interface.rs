use serde::{Deserialize, Serialize};

use crate::ident::{InterfaceName, ZoneName};

/// A kernel network interface and the policy zone it belongs to.
///
/// `dhcp = true` forbids static `ipv4` addresses (enforced in the
/// validator); `disabled = true` suppresses every artifact that would
/// otherwise reference this interface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub name: InterfaceName,
    #[serde(default)]
    pub zone: Option<ZoneName>,
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub ipv6: Vec<String>,
    #[serde(default)]
    pub dhcp: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub mtu: Option<u32>,
}
