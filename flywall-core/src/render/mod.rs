//! Renderer (component E): pure `model -> artifact` functions.
//!
//! Nothing in this module touches the kernel or the filesystem — every
//! function here takes a `&Config` and returns data. The reconciler
//! (`crate::reconcile`) is the only thing that executes or diffs these
//! artifacts against the running system.

pub mod addrlink;
pub mod nft;
pub mod tc;

use crate::model::config::Config;

pub use addrlink::AddrLinkOp;
pub use nft::NftTable;
pub use tc::TcTree;

/// One rendered artifact kind, tagged rather than boxed so `render_all`'s
/// caller can exhaustively match without downcasting.
#[derive(Clone, Debug, PartialEq)]
pub enum ArtifactKind {
    NftFilter(NftTable),
    NftMangle(Option<NftTable>),
    NftNat(Option<NftTable>),
    Tc(TcTree),
    AddrLink(Vec<AddrLinkOp>),
}

/// Everything the reconciler needs to bring the kernel in line with one
/// canonical config. Each field renders independently and in isolation —
/// a bug in the NAT renderer cannot corrupt the filter table.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedArtifacts {
    pub nft_filter: NftTable,
    pub nft_mangle: Option<NftTable>,
    pub nft_nat: Option<NftTable>,
    pub tc: TcTree,
    pub addrlink: Vec<AddrLinkOp>,
}

impl RenderedArtifacts {
    /// All nft tables destined for a single `nft -f -` transaction, in the
    /// order they must appear in the script (§4.F: one kernel-atomic batch).
    pub fn nft_tables(&self) -> Vec<NftTable> {
        let mut tables = vec![self.nft_filter.clone()];
        if let Some(mangle) = &self.nft_mangle {
            tables.push(mangle.clone());
        }
        if let Some(nat) = &self.nft_nat {
            tables.push(nat.clone());
        }
        tables
    }

    pub fn kinds(&self) -> Vec<ArtifactKind> {
        vec![
            ArtifactKind::NftFilter(self.nft_filter.clone()),
            ArtifactKind::NftMangle(self.nft_mangle.clone()),
            ArtifactKind::NftNat(self.nft_nat.clone()),
            ArtifactKind::Tc(self.tc.clone()),
            ArtifactKind::AddrLink(self.addrlink.clone()),
        ]
    }
}

pub fn render_all(config: &Config) -> RenderedArtifacts {
    RenderedArtifacts {
        nft_filter: nft::render_filter(config),
        nft_mangle: nft::render_mangle(config),
        nft_nat: nft::render_nat(config),
        tc: tc::render_tc(config),
        addrlink: addrlink::render_addrlink(config),
    }
}
