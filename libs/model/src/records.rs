use crate::{CellId, Email, Name, ParticleId, UvnSettings};
use ip_network::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The UVN itself: one routing domain interconnecting all registered cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uvn {
    pub name: Name,
    /// Public hostname of the registry; the root VPN and routing links dial this.
    pub address: Option<String>,
    pub owner: Email,
    pub settings: UvnSettings,
}

/// One agent and the LANs it attaches to the UVN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub name: Name,
    /// Public hostname; cells without one are assumed to sit behind NAT.
    pub address: Option<String>,
    pub allowed_lans: BTreeSet<Ipv4Network>,
    pub excluded: bool,
    pub owner: Email,
}

impl Cell {
    /// A cell reachable at a stable endpoint can terminate backbone links
    /// and host particles.
    pub fn is_public(&self) -> bool {
        self.address.is_some()
    }
}

/// A roaming client with a single VPN connection into one public cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Particle {
    pub id: ParticleId,
    pub name: Name,
    pub excluded: bool,
    pub owner: Email,
}

/// A registered operator; owns the UVN, cells or particles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: Email,
    pub display_name: String,
    pub realm: String,
    /// `sha256(email:realm:password)`, hex. The clear-text password never
    /// enters the model.
    pub credential: String,
}
