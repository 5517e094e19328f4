use serde::{Deserialize, Serialize};

use crate::model::interface::Interface;
use crate::model::leaf::{ApiKey, DhcpScope, DnsConfig, EbpfConfig, MdnsConfig, SyslogConfig, WebConfig};
use crate::model::nat::NatBlock;
use crate::model::policy::Policy;
use crate::model::qos::QosPolicy;
use crate::model::zone::Zone;

/// Top-level schema version string, e.g. `"1.2"`. The migrator advances it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(pub String);

impl SchemaVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The typed configuration tree, bound from the migrated raw tree but not
/// yet validated or expanded. No hidden defaults are applied at this stage —
/// fields absent from config stay `None`/empty so default materialization
/// (§4.D step 2) stays observable as a distinct, testable step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub schema_version: SchemaVersion,
    #[serde(default)]
    pub ip_forwarding: bool,
    #[serde(default)]
    pub mss_clamping: bool,
    #[serde(default)]
    pub enable_flow_offload: bool,
    pub state_dir: String,

    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub policies: Vec<Policy>,
    #[serde(default)]
    pub nats: Vec<NatBlock>,
    #[serde(default)]
    pub qos_policies: Vec<QosPolicy>,
    #[serde(default)]
    pub dhcp: Vec<DhcpScope>,
    #[serde(default)]
    pub dns: Option<DnsConfig>,
    #[serde(default)]
    pub mdns: Option<MdnsConfig>,
    #[serde(default)]
    pub ebpf: Option<EbpfConfig>,
    #[serde(default)]
    pub web: Option<WebConfig>,
    #[serde(default)]
    pub api: Vec<ApiKey>,
    #[serde(default)]
    pub syslog: Option<SyslogConfig>,
}

/// The canonical, immutable, fully validated and expanded model.
///
/// The only public constructor is the validator's exit point
/// (`crate::validate::validate`), so nothing downstream can observe an
/// unvalidated `Config` as canonical. Equality is structural — the
/// reconciler relies on it to detect "nothing changed" reloads and to
/// confirm rollback restored the exact prior state (§8 invariant 2).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalConfig {
    inner: Config,
}

impl CanonicalConfig {
    pub(crate) fn new(inner: Config) -> Self {
        Self { inner }
    }

    pub fn get(&self) -> &Config {
        &self.inner
    }
}

impl std::ops::Deref for CanonicalConfig {
    type Target = Config;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
