//! Normalized identifier newtypes.
//!
//! Zone and interface names are case-insensitive and compared after
//! trimming, per the schema's "all identifiers are normalized" rule. Wrapping
//! them in newtypes means normalization happens exactly once, at
//! construction, rather than being a convention callers have to remember.

use serde::{Deserialize, Serialize};
use std::fmt;

fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

macro_rules! normalized_ident {
    ($name:ident) => {
        // `#[serde(from = "String")]` rather than `transparent`: deserializing
        // straight into the tuple field would bypass normalization entirely,
        // and every identifier in config is supposed to come out
        // trimmed/lowercased (§3, §4.A) whether it was constructed with
        // `::new` or loaded from a config file. Routing through `From<String>`
        // means both paths normalize the same way.
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(from = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl AsRef<str>) -> Self {
                Self(normalize(raw.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::new(raw)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self::new(raw)
            }
        }
    };
}

normalized_ident!(ZoneName);
normalized_ident!(InterfaceName);
normalized_ident!(PolicyRuleName);
normalized_ident!(QosPolicyName);
normalized_ident!(QosClassName);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(ZoneName::new("  LAN  "), ZoneName::new("lan"));
        assert_eq!(ZoneName::new("Lan").as_str(), "lan");
    }

    /// `load_and_validate` binds through `serde_json::from_value`, not
    /// `ZoneName::new` — this exercises that actual path rather than the
    /// constructor, which normalizes regardless of serde wiring.
    #[test]
    fn deserializing_from_json_normalizes_too() {
        let zone: ZoneName = serde_json::from_str("\"  LAN  \"").unwrap();
        assert_eq!(zone, ZoneName::new("lan"));
        assert_eq!(zone.as_str(), "lan");
    }

    #[test]
    fn serializes_back_to_the_normalized_plain_string() {
        let zone = ZoneName::new("LAN");
        assert_eq!(serde_json::to_string(&zone).unwrap(), "\"lan\"");
    }
}
