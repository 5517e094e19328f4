//! Subprocess-free kernel boundary for the addr/link artifact (§4.E
//! `addr/link`, §6 "`ip addr`, `ip link` ... individually, journaled").
//!
//! Rendered [`AddrLinkOp`]s are applied one at a time via `rtnetlink` rather
//! than shelling out to `ip`, the same "typed netlink handle behind a small
//! trait" shape the teacher uses for its own route/link manipulation, just
//! generalized from VPN peer routes to interface addresses/MTU/link state.

use std::net::IpAddr;

use async_trait::async_trait;
use futures::stream::TryStreamExt;

use crate::error::Error;
use crate::render::addrlink::AddrLinkOp;

#[async_trait]
pub trait NetlinkOps: Send + Sync {
    /// Applies one addr/link mutation. Each call opens (or reuses) a
    /// netlink handle and resolves the interface by name, since `AddrLinkOp`
    /// only carries names — the kernel boundary is link-name-addressed, the
    /// same way `ip addr`/`ip link` take `dev <name>` rather than an index.
    async fn apply(&self, op: &AddrLinkOp) -> Result<(), Error>;
}

pub struct RealNetlinkOps;

impl RealNetlinkOps {
    fn parse_cidr(cidr: &str) -> Result<(IpAddr, u8), Error> {
        let (addr, len) = cidr.split_once('/').ok_or_else(|| {
            Error::RenderError(format!("address `{cidr}` is not in CIDR notation"))
        })?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| Error::RenderError(format!("invalid address in `{cidr}`")))?;
        let prefix_len: u8 = len
            .parse()
            .map_err(|_| Error::RenderError(format!("invalid prefix length in `{cidr}`")))?;
        Ok((addr, prefix_len))
    }

    async fn link_index(handle: &rtnetlink::Handle, name: &str) -> Result<u32, Error> {
        let mut links = handle.link().get().match_name(name.to_string()).execute();
        match links.try_next().await.map_err(Error::Rtnetlink)? {
            Some(link) => Ok(link.header.index),
            None => Err(Error::RenderError(format!("interface `{name}` not found"))),
        }
    }
}

#[async_trait]
impl NetlinkOps for RealNetlinkOps {
    async fn apply(&self, op: &AddrLinkOp) -> Result<(), Error> {
        let (connection, handle, _) = rtnetlink::new_connection().map_err(Error::IO)?;
        tokio::spawn(connection);

        match op {
            AddrLinkOp::SetAddr { interface, cidr } => {
                let index = Self::link_index(&handle, interface).await?;
                let (addr, prefix_len) = Self::parse_cidr(cidr)?;
                handle
                    .address()
                    .add(index, addr, prefix_len)
                    .execute()
                    .await
                    .map_err(Error::Rtnetlink)?;
            }
            AddrLinkOp::DelAddr { interface, cidr } => {
                let index = Self::link_index(&handle, interface).await?;
                let (addr, prefix_len) = Self::parse_cidr(cidr)?;
                let mut addrs = handle.address().get().set_link_index_filter(index).execute();
                while let Some(msg) = addrs.try_next().await.map_err(Error::Rtnetlink)? {
                    let matches = msg.attributes.iter().any(|attr| {
                        matches!(attr, netlink_packet_route::address::AddressAttribute::Address(a) if *a == addr)
                    }) && msg.header.prefix_len == prefix_len;
                    if matches {
                        handle.address().del(msg).execute().await.map_err(Error::Rtnetlink)?;
                        break;
                    }
                }
            }
            AddrLinkOp::SetMtu { interface, mtu } => {
                let index = Self::link_index(&handle, interface).await?;
                handle.link().set(index).mtu(*mtu).execute().await.map_err(Error::Rtnetlink)?;
            }
            AddrLinkOp::LinkUp { interface } => {
                let index = Self::link_index(&handle, interface).await?;
                handle.link().set(index).up().execute().await.map_err(Error::Rtnetlink)?;
            }
            AddrLinkOp::LinkDown { interface } => {
                let index = Self::link_index(&handle, interface).await?;
                handle.link().set(index).down().execute().await.map_err(Error::Rtnetlink)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod mocks {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MockNetlinkOpsState {
        pub applied: Vec<AddrLinkOp>,
        pub fail_on: Option<usize>,
    }

    #[derive(Default)]
    pub struct MockNetlinkOps {
        pub state: Mutex<MockNetlinkOpsState>,
    }

    #[async_trait]
    impl NetlinkOps for MockNetlinkOps {
        async fn apply(&self, op: &AddrLinkOp) -> Result<(), Error> {
            let mut state = self.state.lock().expect("lock");
            let idx = state.applied.len();
            if state.fail_on == Some(idx) {
                return Err(Error::RenderError("mock netlink failure".to_string()));
            }
            state.applied.push(op.clone());
            Ok(())
        }
    }
}
