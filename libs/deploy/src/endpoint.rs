use ip_network::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use uvn_keystore::{Fingerprint, KeyId, WgPublicKey};
use uvn_model::{InterfaceName, LinkId, Side};

/// Where a dialling endpoint reaches its listening peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An interface address: host address plus the prefix length of its subnet.
///
/// Not an [`Ipv4Network`]: host bits are meaningful here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfaceAddr {
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl IfaceAddr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Self {
        Self { addr, prefix }
    }
}

impl fmt::Display for IfaceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// One side of a tunnel, as the datapath will configure it.
///
/// Exactly one of `listen_port` and `peer_endpoint` is set: the listener
/// waits, the other side dials. Private key material is referenced by
/// [`KeyId`] and only resolved when an agent bundle is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEndpoint {
    pub interface: InterfaceName,
    /// Local address with the prefix length of the link's subnet.
    pub addr: IfaceAddr,
    pub peer_addr: Ipv4Addr,
    pub listen_port: Option<u16>,
    pub peer_endpoint: Option<HostPort>,
    /// This side's tunnel key.
    pub key: KeyId,
    pub public: WgPublicKey,
    pub peer_public: WgPublicKey,
    pub mtu: u16,
    /// Set when this side sits behind NAT and must keep the tunnel alive.
    pub nat: bool,
    /// The subnet covering the link.
    pub subnet: Ipv4Network,
}

impl LinkEndpoint {
    pub fn local(&self) -> Ipv4Addr {
        self.addr.addr
    }

    pub fn is_listener(&self) -> bool {
        self.listen_port.is_some()
    }
}

/// A generated tunnel: its identity, preshared key and both endpoint views.
///
/// Endpoint order follows the [`LinkId`]: side A is the smaller cell id for
/// backbone links, the registry for root-VPN and routing links, and the
/// cell agent for particle links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub preshared: KeyId,
    pub preshared_fingerprint: Fingerprint,
    pub endpoints: [LinkEndpoint; 2],
}

impl Link {
    pub fn endpoint(&self, side: Side) -> &LinkEndpoint {
        &self.endpoints[side.index()]
    }

    /// The two endpoints must mirror each other's addressing.
    pub fn is_reciprocal(&self) -> bool {
        let [a, b] = &self.endpoints;

        a.local() == b.peer_addr && b.local() == a.peer_addr
    }
}
