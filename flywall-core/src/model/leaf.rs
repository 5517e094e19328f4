//! Leaf configuration records: schema and validation only, no runtime
//! implementation. DHCP/DNS/mDNS/web/API/syslog are external collaborators;
//! the engine only owns their declared shape and defaults.

use humantime_serde;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::ident::InterfaceName;

fn default_lease_time() -> Duration {
    Duration::from_secs(12 * 3600)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DhcpScope {
    pub interface: InterfaceName,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    #[serde(with = "humantime_serde", default = "default_lease_time")]
    pub lease_time: Duration,
    #[serde(default)]
    pub dns: Vec<Ipv4Addr>,
    #[serde(default)]
    pub domain: Option<String>,
}

fn default_dns_mode() -> String {
    "forward".to_string()
}

fn default_dns_port() -> u16 {
    53
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_dns_mode")]
    pub mode: String,
    #[serde(default)]
    pub upstream: Vec<String>,
    #[serde(default = "default_dns_port")]
    pub listen_port: u16,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            mode: default_dns_mode(),
            upstream: Vec::new(),
            listen_port: default_dns_port(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MdnsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub reflect_zones: Vec<String>,
}

fn default_syslog_port() -> u16 {
    514
}

fn default_syslog_protocol() -> String {
    "udp".to_string()
}

fn default_syslog_tag() -> String {
    "flywall".to_string()
}

fn default_syslog_facility() -> u8 {
    1
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyslogConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_syslog_port")]
    pub port: u16,
    #[serde(default = "default_syslog_protocol")]
    pub protocol: String,
    #[serde(default = "default_syslog_tag")]
    pub tag: String,
    #[serde(default = "default_syslog_facility")]
    pub facility: u8,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_syslog_port(),
            protocol: default_syslog_protocol(),
            tag: default_syslog_tag(),
            facility: default_syslog_facility(),
        }
    }
}

fn default_web_port() -> u16 {
    8443
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default)]
    pub listen_addr: Option<String>,
    #[serde(default = "default_web_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub tls_cert: Option<String>,
    #[serde(default)]
    pub tls_key: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            listen_port: default_web_port(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub name: String,
    pub key_hash: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Added by the built-in `1.0 -> 1.1` migration (§8 S6); no fields are
/// prescribed beyond existence of the block, so it carries a single toggle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EbpfConfig {
    #[serde(default)]
    pub enabled: bool,
}
