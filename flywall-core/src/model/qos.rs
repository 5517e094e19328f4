use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ident::{InterfaceName, QosClassName, QosPolicyName};

/// An explicit bandwidth figure, always expressed in Mbps internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bandwidth {
    pub mbps: u32,
}

/// A QoS class's share of its policy's bandwidth: either a percentage of
/// the policy's direction budget, or an absolute figure.
///
/// Only `Percent` variants are summed against the "> 100%" conflict check
/// (§4.D step 4); `Absolute` classes carve out a fixed slice and are
/// excluded from that budget.
///
/// Written in config as a plain string (`rate = "10%"` / `rate = "50mbps"`,
/// §6), which the loader hands down as a JSON string — so (de)serialization
/// routes through that string form via `FromStr`/`Display`, not through the
/// variants' own field shapes directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Rate {
    Percent(u8),
    Absolute(Bandwidth),
}

impl FromStr for Rate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(pct) = s.strip_suffix('%') {
            let pct: u8 = pct.parse().map_err(|_| format!("invalid percentage rate `{s}`"))?;
            Ok(Rate::Percent(pct))
        } else if let Some(mbps) = s.strip_suffix("mbps") {
            let mbps: u32 = mbps.parse().map_err(|_| format!("invalid bandwidth rate `{s}`"))?;
            Ok(Rate::Absolute(Bandwidth { mbps }))
        } else {
            Err(format!("unrecognized rate format `{s}`, expected \"N%\" or \"Nmbps\""))
        }
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rate::Percent(pct) => write!(f, "{pct}%"),
            Rate::Absolute(bw) => write!(f, "{}mbps", bw.mbps),
        }
    }
}

impl TryFrom<String> for Rate {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Rate> for String {
    fn from(rate: Rate) -> Self {
        rate.to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QosClass {
    pub name: QosClassName,
    pub priority: u8,
    pub rate: Rate,
    /// Declaration-order index within the policy, assigned by the validator (0..255).
    /// Never present in user-written config; always absent until the validator runs.
    #[serde(default)]
    pub class_idx: Option<u8>,
}

/// Written flat inside the owning `rule` block, not as a nested `match { ... }`
/// block, so `QosRule::matches` is `#[serde(flatten)]`ed onto it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QosMatch {
    pub proto: Option<String>,
    pub src: Option<String>,
    pub dest: Option<String>,
    pub src_port: Option<u16>,
    pub dest_port: Option<u16>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QosRule {
    pub name: String,
    pub class: QosClassName,
    #[serde(flatten)]
    pub matches: QosMatch,
    /// `0xF000 + (policy_idx << 8) + class_idx`, assigned by the validator.
    /// Never present in user-written config; always absent until the validator runs.
    #[serde(default)]
    pub fwmark: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QosPolicy {
    pub name: QosPolicyName,
    pub interface: InterfaceName,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub upload_mbps: u32,
    pub download_mbps: u32,
    pub classes: Vec<QosClass>,
    pub rules: Vec<QosRule>,
    /// Declaration-order index, assigned by the validator (0..255, max 240 policies).
    /// Never present in user-written config; always absent until the validator runs.
    #[serde(default)]
    pub policy_idx: Option<u8>,
}

fn default_true() -> bool {
    true
}

/// Base of the firewall-mark range reserved for QoS fwmark allocation.
pub const FWMARK_BASE: u32 = 0xF000;
/// Exclusive upper bound of the reserved fwmark range.
pub const FWMARK_LIMIT: u32 = 0x10000;
/// Maximum number of QoS policies before `policy_idx << 8` would overflow the reserved range.
pub const MAX_QOS_POLICIES: usize = 240;

pub fn fwmark(policy_idx: u8, class_idx: u8) -> u32 {
    FWMARK_BASE + ((policy_idx as u32) << 8) + class_idx as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fwmark_contract() {
        assert_eq!(fwmark(0, 0), 0xF000);
        assert_eq!(fwmark(0, 1), 0xF001);
        assert_eq!(fwmark(1, 0), 0xF100);
    }

    #[test]
    fn parses_percent_and_absolute_rates() {
        assert_eq!("10%".parse::<Rate>().unwrap(), Rate::Percent(10));
        assert_eq!(
            "5mbps".parse::<Rate>().unwrap(),
            Rate::Absolute(Bandwidth { mbps: 5 })
        );
        assert!("garbage".parse::<Rate>().is_err());
    }

    /// The loader hands the migrator/binder a JSON string for `rate = "10%"`
    /// (§6), not a number or an object — this is the path `parse::<Rate>()`
    /// alone never exercises.
    #[test]
    fn deserializes_rate_from_a_json_string() {
        let pct: Rate = serde_json::from_str("\"10%\"").unwrap();
        assert_eq!(pct, Rate::Percent(10));

        let abs: Rate = serde_json::from_str("\"50mbps\"").unwrap();
        assert_eq!(abs, Rate::Absolute(Bandwidth { mbps: 50 }));

        assert!(serde_json::from_str::<Rate>("\"garbage\"").is_err());
    }

    #[test]
    fn serializes_rate_back_to_its_string_form() {
        assert_eq!(serde_json::to_string(&Rate::Percent(10)).unwrap(), "\"10%\"");
        assert_eq!(
            serde_json::to_string(&Rate::Absolute(Bandwidth { mbps: 50 })).unwrap(),
            "\"50mbps\""
        );
    }
}
