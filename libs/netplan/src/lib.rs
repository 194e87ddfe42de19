//! Address-plan arithmetic for the UVN.
//!
//! Derives every tunnel address, subnet and listen port from the four base
//! networks fixed in the UVN settings. The computation is a pure function of
//! its inputs: identical (settings, cells, links) always produce an
//! identical plan, which is what makes snapshots content-addressable.
//!
//! Nothing here ever hands out a partial plan. If any base network is too
//! small for the current cell or link count, the whole computation fails
//! with [`Error::CapacityExceeded`].

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod plan;

pub use plan::{AddressPlan, BackboneSlot, ParticleBlock, RootVpnPlan, RoutingSlot};

use ip_network::Ipv4Network;
use std::net::Ipv4Addr;
use uvn_model::BaseNet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("{base} base network is too small for the current deployment")]
    CapacityExceeded { base: BaseNet },
}

/// The `n`-th address inside `base`, counting the network address as 0.
pub(crate) fn nth_address(base: Ipv4Network, n: u32, which: BaseNet) -> Result<Ipv4Addr, Error> {
    let size = 1u32 << (32 - base.netmask());

    if n >= size {
        return Err(Error::CapacityExceeded { base: which });
    }

    Ok(Ipv4Addr::from(u32::from(base.network_address()) + n))
}

/// The `k`-th /31 carved sequentially out of `base`.
pub(crate) fn nth_point_to_point(
    base: Ipv4Network,
    k: u32,
    which: BaseNet,
) -> Result<Ipv4Network, Error> {
    let lower = nth_address(base, k * 2, which)?;
    let _upper = nth_address(base, k * 2 + 1, which)?;

    Ipv4Network::new(lower, 31).map_err(|_| Error::CapacityExceeded { base: which })
}

/// A block of `size` addresses starting at offset `index * size` in `base`.
pub(crate) fn nth_block(
    base: Ipv4Network,
    index: u32,
    size: u32,
    which: BaseNet,
) -> Result<Ipv4Network, Error> {
    let start = index
        .checked_mul(size)
        .ok_or(Error::CapacityExceeded { base: which })?;
    let first = nth_address(base, start, which)?;
    let _last = nth_address(base, start + (size - 1), which)?;

    let prefix = 32 - size.trailing_zeros() as u8;

    Ipv4Network::new(first, prefix).map_err(|_| Error::CapacityExceeded { base: which })
}

pub(crate) fn offset_port(base_port: u16, offset: u32, which: BaseNet) -> Result<u16, Error> {
    u32::from(base_port)
        .checked_add(offset)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or(Error::CapacityExceeded { base: which })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Network {
        let (addr, prefix) = s.split_once('/').unwrap();

        Ipv4Network::new(addr.parse().unwrap(), prefix.parse().unwrap()).unwrap()
    }

    #[test]
    fn nth_address_is_offset_from_network_address() {
        let base = net("10.1.0.0/24");

        assert_eq!(
            nth_address(base, 0, BaseNet::Backbone).unwrap(),
            Ipv4Addr::new(10, 1, 0, 0)
        );
        assert_eq!(
            nth_address(base, 5, BaseNet::Backbone).unwrap(),
            Ipv4Addr::new(10, 1, 0, 5)
        );
        assert_eq!(
            nth_address(base, 255, BaseNet::Backbone).unwrap(),
            Ipv4Addr::new(10, 1, 0, 255)
        );
    }

    #[test]
    fn nth_address_rejects_out_of_range() {
        let base = net("10.1.0.0/24");

        assert_eq!(
            nth_address(base, 256, BaseNet::Backbone),
            Err(Error::CapacityExceeded {
                base: BaseNet::Backbone
            })
        );
    }

    #[test]
    fn point_to_point_subnets_are_consecutive() {
        let base = net("10.2.0.0/29");

        assert_eq!(
            nth_point_to_point(base, 0, BaseNet::Backbone).unwrap(),
            net("10.2.0.0/31")
        );
        assert_eq!(
            nth_point_to_point(base, 3, BaseNet::Backbone).unwrap(),
            net("10.2.0.6/31")
        );
        assert!(nth_point_to_point(base, 4, BaseNet::Backbone).is_err());
    }

    #[test]
    fn blocks_are_carved_at_index_times_size() {
        let base = net("10.254.0.0/16");

        assert_eq!(
            nth_block(base, 1, 256, BaseNet::ParticlesVpn).unwrap(),
            net("10.254.1.0/24")
        );
        assert_eq!(
            nth_block(base, 255, 256, BaseNet::ParticlesVpn).unwrap(),
            net("10.254.255.0/24")
        );
        assert!(nth_block(base, 256, 256, BaseNet::ParticlesVpn).is_err());
    }
}
