//! The typed schema: every configurable entity with its invariants.
//!
//! Strongly-typed records with explicit optionality. No hidden defaults —
//! defaulting happens in [`crate::validate`] and is observable there. All
//! identifiers are normalized via [`crate::ident`]. Equality on the model is
//! structural, used by the reconciler to compare snapshots.

pub mod config;
pub mod interface;
pub mod leaf;
pub mod nat;
pub mod policy;
pub mod qos;
pub mod zone;

pub use config::{CanonicalConfig, Config, SchemaVersion};
pub use interface::Interface;
pub use leaf::{ApiKey, DhcpScope, DnsConfig, EbpfConfig, MdnsConfig, SyslogConfig, WebConfig};
pub use nat::{NatBlock, NatType};
pub use policy::{Action, Policy, Rule};
pub use qos::{QosClass, QosPolicy, QosRule, Rate};
pub use zone::Zone;
