//! Reconciler / Applier (§4.F): diffs desired vs. observed artifacts,
//! orders mutations, and applies them atomically with rollback.
//!
//! Two kernel boundaries are mocked independently in tests — [`KernelOps`]
//! for the single atomic `nft -f -` transaction and [`TcOps`]/[`NetlinkOps`]
//! for the individually-journaled tc/addr-link mutations — the same split
//! the teacher draws between its atomic nftnl batch and its per-call
//! `NetlinkOps`, just generalized from one fwmark bypass rule-set to the
//! full filter/mangle/nat/tc/addr surface.

pub mod kernel_ops;
pub mod netlink_ops;

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::error::Error;
use crate::model::CanonicalConfig;
use crate::render::addrlink::AddrLinkOp;
use crate::render::nft::{self, NftTable};
use crate::render::tc::{self, TcClass, TcFilter, TcQdisc};
use crate::render::{self, RenderedArtifacts};
use crate::state::StateDir;

pub use kernel_ops::{KernelOps, TcOps};
pub use netlink_ops::NetlinkOps;

/// A structural diff of one subsystem's artifact collection, keyed on each
/// item's stable identity (chain name, qdisc handle, address CIDR, ...)
/// rather than positional comparison — §4.F step 1's "Operations are
/// Create, Update, Delete on named leaves".
#[derive(Clone, Debug, PartialEq)]
pub struct Diff<T> {
    pub creates: Vec<T>,
    pub updates: Vec<(T, T)>,
    pub deletes: Vec<T>,
}

impl<T> Default for Diff<T> {
    fn default() -> Self {
        Self {
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

impl<T> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Keys `current`/`next` by `key_fn` and buckets each item into
/// create/update/delete. An item present in both with an unchanged value is
/// dropped silently — it needs no mutation.
pub fn diff_by_key<T, K, F>(current: &[T], next: &[T], key_fn: F) -> Diff<T>
where
    T: Clone + PartialEq,
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    let current_by_key: HashMap<K, &T> = current.iter().map(|item| (key_fn(item), item)).collect();
    let mut seen: HashSet<K> = HashSet::new();
    let mut diff = Diff::default();

    for item in next {
        let key = key_fn(item);
        seen.insert(key.clone());
        match current_by_key.get(&key) {
            Some(&old) if old == item => {}
            Some(&old) => diff.updates.push((old.clone(), item.clone())),
            None => diff.creates.push(item.clone()),
        }
    }

    for item in current {
        if !seen.contains(&key_fn(item)) {
            diff.deletes.push(item.clone());
        }
    }

    diff
}

/// One already-applied non-atomic mutation's undo, recorded before the
/// mutation runs (§4.F step 4) so a later failure can replay the journal in
/// reverse and land back on exactly `current`.
enum JournalEntry {
    Netlink(AddrLinkOp),
    Tc(Vec<String>),
    RestoreNft(String),
}

/// Everything the reconciler needs to talk to the kernel, injected so tests
/// exercise the full diff/order/apply/rollback pipeline against mocks.
pub struct Reconciler {
    kernel: Box<dyn KernelOps>,
    tc: Box<dyn TcOps>,
    netlink: Box<dyn NetlinkOps>,
    state: StateDir,
    current: Option<CanonicalConfig>,
}

/// Summary of what an apply changed, for status reporting and tests —
/// nothing in here is re-derived by the caller, it is exactly what was
/// computed and executed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplyReport {
    pub addrlink_ops: usize,
    pub nft_tables_touched: usize,
    pub tc_ops: usize,
    pub no_op: bool,
}

impl Reconciler {
    pub fn new(kernel: Box<dyn KernelOps>, tc: Box<dyn TcOps>, netlink: Box<dyn NetlinkOps>, state: StateDir) -> Self {
        Self {
            kernel,
            tc,
            netlink,
            state,
            current: None,
        }
    }

    /// Seeds `current` from the last successfully applied snapshot, for a
    /// supervisor restarting against already-live kernel state (§4.F
    /// "possibly empty on boot, else read back from kernel at startup";
    /// the canonical-model snapshot is what "read back" resolves to here,
    /// since the model, not a live kernel dump, is what the renderer needs).
    pub fn seed_current(&mut self, current: CanonicalConfig) {
        self.current = Some(current);
    }

    pub fn current(&self) -> Option<&CanonicalConfig> {
        self.current.as_ref()
    }

    /// Runs the full diff/order/apply/rollback pipeline for `next` (§4.F
    /// steps 1-6). On success, `current` becomes `next` and both the nft
    /// backup and the canonical snapshot are persisted. On any kernel-apply
    /// failure, the journal is replayed in reverse and `current` is left
    /// untouched — its rendered artifacts are exactly what is left running.
    pub async fn apply(&mut self, next: CanonicalConfig) -> Result<ApplyReport, Error> {
        let current_artifacts = self
            .current
            .as_ref()
            .map(|c| render::render_all(c.get()))
            .unwrap_or_else(empty_artifacts);
        let next_artifacts = render::render_all(next.get());

        if current_artifacts == next_artifacts {
            return Ok(ApplyReport {
                no_op: true,
                ..Default::default()
            });
        }

        let mut journal: Vec<JournalEntry> = Vec::new();
        let report = match self.run_pipeline(&current_artifacts, &next_artifacts, &mut journal).await {
            Ok(report) => report,
            Err(err) => {
                self.rollback(journal).await?;
                return Err(err);
            }
        };

        self.state.write_snapshot(&next).await.map_err(Error::State)?;
        self.current = Some(next);
        Ok(report)
    }

    /// §4.F step 2 order: addr/link, then the single nft transaction, then
    /// tc. Each already-executed non-atomic mutation is journaled before
    /// the next one runs.
    async fn run_pipeline(
        &self,
        current: &RenderedArtifacts,
        next: &RenderedArtifacts,
        journal: &mut Vec<JournalEntry>,
    ) -> Result<ApplyReport, Error> {
        let addrlink_diff = diff_by_key(&current.addrlink, &next.addrlink, addrlink_key);
        let addrlink_ops = self.apply_addrlink(&addrlink_diff, journal).await?;

        let nft_tables_touched = self.apply_nft(current, next, journal).await?;

        let tc_ops = self.apply_tc(&current.tc.qdiscs, &next.tc.qdiscs, &current.tc.classes, &next.tc.classes, &current.tc.filters, &next.tc.filters, journal).await?;

        Ok(ApplyReport {
            addrlink_ops,
            nft_tables_touched,
            tc_ops,
            no_op: false,
        })
    }

    async fn apply_addrlink(&self, diff: &Diff<AddrLinkOp>, journal: &mut Vec<JournalEntry>) -> Result<usize, Error> {
        let mut count = 0;
        for op in diff.deletes.iter().chain(diff.creates.iter()).chain(diff.updates.iter().map(|(_, new)| new)) {
            journal.push(JournalEntry::Netlink(invert_addrlink(op)));
            self.netlink.apply(op).await?;
            count += 1;
        }
        Ok(count)
    }

    async fn apply_nft(&self, current: &RenderedArtifacts, next: &RenderedArtifacts, journal: &mut Vec<JournalEntry>) -> Result<usize, Error> {
        let current_tables = current.nft_tables();
        let next_tables = next.nft_tables();
        let table_diff = diff_by_key(&current_tables, &next_tables, nft_table_key);
        if table_diff.is_empty() {
            return Ok(0);
        }

        let backup = self.kernel.read_ruleset().await?;
        self.state.write_nft_backup(&backup).await.map_err(Error::State)?;

        let script = build_nft_script(&table_diff);
        journal.push(JournalEntry::RestoreNft(backup));
        self.kernel.apply_nft(&script).await?;

        let touched = table_diff.creates.len() + table_diff.updates.len() + table_diff.deletes.len();
        Ok(touched)
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_tc(
        &self,
        current_qdiscs: &[TcQdisc],
        next_qdiscs: &[TcQdisc],
        current_classes: &[TcClass],
        next_classes: &[TcClass],
        current_filters: &[TcFilter],
        next_filters: &[TcFilter],
        journal: &mut Vec<JournalEntry>,
    ) -> Result<usize, Error> {
        let mut count = 0;

        let qdisc_diff = diff_by_key(current_qdiscs, next_qdiscs, |q: &TcQdisc| q.interface.clone());
        for q in &qdisc_diff.creates {
            journal.push(JournalEntry::Tc(tc::qdisc_del(q)));
            self.tc.run(&tc::qdisc_add(q)).await?;
            count += 1;
        }
        for (old, new) in &qdisc_diff.updates {
            journal.push(JournalEntry::Tc(tc::qdisc_del(new)));
            self.tc.run(&tc::qdisc_del(old)).await?;
            self.tc.run(&tc::qdisc_add(new)).await?;
            count += 1;
        }
        for q in &qdisc_diff.deletes {
            journal.push(JournalEntry::Tc(tc::qdisc_add(q)));
            self.tc.run(&tc::qdisc_del(q)).await?;
            count += 1;
        }

        let class_diff = diff_by_key(current_classes, next_classes, |c: &TcClass| (c.interface.clone(), c.classid.clone()));
        for c in &class_diff.creates {
            journal.push(JournalEntry::Tc(tc::class_del(c)));
            self.tc.run(&tc::class_add(c)).await?;
            count += 1;
        }
        for (old, new) in &class_diff.updates {
            journal.push(JournalEntry::Tc(tc::class_change(old)));
            self.tc.run(&tc::class_change(new)).await?;
            count += 1;
        }
        for c in &class_diff.deletes {
            journal.push(JournalEntry::Tc(tc::class_add(c)));
            self.tc.run(&tc::class_del(c)).await?;
            count += 1;
        }

        let filter_diff = diff_by_key(current_filters, next_filters, |f: &TcFilter| (f.interface.clone(), f.fwmark));
        for f in &filter_diff.creates {
            journal.push(JournalEntry::Tc(tc::filter_del(f)));
            self.tc.run(&tc::filter_add(f)).await?;
            count += 1;
        }
        for (old, new) in &filter_diff.updates {
            journal.push(JournalEntry::Tc(tc::filter_replace(old)));
            self.tc.run(&tc::filter_replace(new)).await?;
            count += 1;
        }
        for f in &filter_diff.deletes {
            journal.push(JournalEntry::Tc(tc::filter_add(f)));
            self.tc.run(&tc::filter_del(f)).await?;
            count += 1;
        }

        Ok(count)
    }

    /// §4.F step 5: replay the journal in reverse. A failure here is
    /// `RollbackFailure` — the one error the supervisor treats as fatal.
    async fn rollback(&self, journal: Vec<JournalEntry>) -> Result<(), Error> {
        for entry in journal.into_iter().rev() {
            let result = match &entry {
                JournalEntry::Netlink(op) => self.netlink.apply(op).await,
                JournalEntry::Tc(argv) => self.tc.run(argv).await,
                JournalEntry::RestoreNft(backup) => self.kernel.apply_nft(backup).await,
            };
            result.map_err(|e| Error::RollbackFailure(e.to_string()))?;
        }
        Ok(())
    }
}

fn empty_artifacts() -> RenderedArtifacts {
    RenderedArtifacts {
        nft_filter: NftTable {
            family: "inet".to_string(),
            name: "flywall".to_string(),
            chains: Vec::new(),
        },
        nft_mangle: None,
        nft_nat: None,
        tc: Default::default(),
        addrlink: Vec::new(),
    }
}

fn addrlink_key(op: &AddrLinkOp) -> (String, &'static str, String) {
    match op {
        AddrLinkOp::SetAddr { interface, cidr } => (interface.clone(), "addr", cidr.clone()),
        AddrLinkOp::DelAddr { interface, cidr } => (interface.clone(), "addr", cidr.clone()),
        AddrLinkOp::SetMtu { interface, .. } => (interface.clone(), "mtu", String::new()),
        AddrLinkOp::LinkUp { interface } => (interface.clone(), "link", String::new()),
        AddrLinkOp::LinkDown { interface } => (interface.clone(), "link", String::new()),
    }
}

fn invert_addrlink(op: &AddrLinkOp) -> AddrLinkOp {
    match op {
        AddrLinkOp::SetAddr { interface, cidr } => AddrLinkOp::DelAddr {
            interface: interface.clone(),
            cidr: cidr.clone(),
        },
        AddrLinkOp::DelAddr { interface, cidr } => AddrLinkOp::SetAddr {
            interface: interface.clone(),
            cidr: cidr.clone(),
        },
        AddrLinkOp::SetMtu { interface, mtu } => AddrLinkOp::SetMtu {
            interface: interface.clone(),
            mtu: *mtu,
        },
        AddrLinkOp::LinkUp { interface } => AddrLinkOp::LinkDown { interface: interface.clone() },
        AddrLinkOp::LinkDown { interface } => AddrLinkOp::LinkUp { interface: interface.clone() },
    }
}

fn nft_table_key(table: &NftTable) -> (String, String) {
    (table.family.clone(), table.name.clone())
}

/// Builds the single script fed to `nft -f -` (§4.F step 3): deleted tables
/// are dropped outright, created/updated tables are declared (idempotent),
/// flushed (clears stale content from a prior apply), and repopulated —
/// one script covers create, update, and delete uniformly.
fn build_nft_script(diff: &Diff<NftTable>) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();

    for table in &diff.deletes {
        let _ = writeln!(out, "delete table {} {}", table.family, table.name);
    }

    let mut changed: Vec<NftTable> = diff.creates.clone();
    changed.extend(diff.updates.iter().map(|(_, new)| new.clone()));
    for table in &changed {
        let _ = writeln!(out, "add table {} {}", table.family, table.name);
        let _ = writeln!(out, "flush table {} {}", table.family, table.name);
    }

    out.push_str(&nft::serialize_nft(&changed));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{InterfaceName, ZoneName};
    use crate::model::config::{Config, SchemaVersion};
    use crate::model::interface::Interface;
    use crate::model::zone::Zone;
    use kernel_ops::mocks::{MockKernelOps, MockTcOps};
    use netlink_ops::mocks::MockNetlinkOps;

    fn config_with_interface(name: &str, zone: &str) -> CanonicalConfig {
        let config = Config {
            schema_version: SchemaVersion("1.2".to_string()),
            ip_forwarding: true,
            mss_clamping: false,
            enable_flow_offload: false,
            state_dir: "/var/lib/flywall".to_string(),
            zones: vec![Zone::new(zone)],
            interfaces: vec![Interface {
                name: InterfaceName::new(name),
                zone: Some(ZoneName::new(zone)),
                ipv4: vec!["192.168.1.1/24".to_string()],
                ipv6: Vec::new(),
                dhcp: false,
                disabled: false,
                mtu: None,
            }],
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
        };
        crate::validate::validate(config).unwrap()
    }

    async fn reconciler(state_dir: &std::path::Path) -> Reconciler {
        let kernel = Box::new(MockKernelOps::default());
        let state = StateDir::new(state_dir);
        state.ensure().await.unwrap();
        let tc = Box::new(MockTcOps::default());
        let netlink = Box::new(MockNetlinkOps::default());
        Reconciler::new(kernel, tc, netlink, state)
    }

    #[tokio::test]
    async fn first_apply_from_empty_current_creates_filter_table_and_addrlink_ops() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = reconciler(dir.path()).await;
        let next = config_with_interface("eth1", "lan");
        let report = rec.apply(next).await.unwrap();
        assert!(!report.no_op);
        assert_eq!(report.nft_tables_touched, 1);
        assert!(report.addrlink_ops > 0);
        assert!(rec.current().is_some());
    }

    #[tokio::test]
    async fn reapplying_identical_config_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = reconciler(dir.path()).await;
        let next = config_with_interface("eth1", "lan");
        rec.apply(next.clone()).await.unwrap();
        let report = rec.apply(next).await.unwrap();
        assert!(report.no_op);
    }

    #[tokio::test]
    async fn s4_failed_nft_apply_rolls_back_and_leaves_current_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        state.ensure().await.unwrap();

        // Build a reconciler whose KernelOps fails on the *second* apply by
        // flipping a shared flag after the first config is live.
        struct SwitchableKernelOps {
            fail: std::sync::Arc<std::sync::Mutex<bool>>,
        }
        #[async_trait::async_trait]
        impl KernelOps for SwitchableKernelOps {
            async fn apply_nft(&self, _script: &str) -> Result<(), Error> {
                if *self.fail.lock().unwrap() {
                    Err(Error::KernelApply {
                        subsystem: "nft".to_string(),
                        message: "missing interface".to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            async fn read_ruleset(&self) -> Result<String, Error> {
                Ok("table inet flywall {}\n".to_string())
            }
        }

        let fail = std::sync::Arc::new(std::sync::Mutex::new(false));
        let mut rec = Reconciler::new(
            Box::new(SwitchableKernelOps { fail: fail.clone() }),
            Box::new(kernel_ops::mocks::MockTcOps::default()),
            Box::new(netlink_ops::mocks::MockNetlinkOps::default()),
            state,
        );

        let config_a = config_with_interface("eth1", "lan");
        rec.apply(config_a.clone()).await.unwrap();

        *fail.lock().unwrap() = true;
        let config_b = config_with_interface("eth2", "wan");
        let err = rec.apply(config_b).await.unwrap_err();
        assert!(matches!(err, Error::KernelApply { .. }));

        // current is still config A — rollback left it untouched.
        assert_eq!(rec.current().unwrap(), &config_a);
    }
}
