use crate::{CellId, ParticleId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a tunnel within the UVN.
///
/// Backbone links are normalised so that `a < b`; `replica` disambiguates
/// parallel edges of the multigraph. The identity is stable across
/// redeployments, which is what allows link keys to survive a snapshot
/// change that keeps the link.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LinkId {
    Backbone {
        a: CellId,
        b: CellId,
        replica: u8,
    },
    RootVpn {
        cell: CellId,
    },
    Routing {
        cell: CellId,
    },
    Particle {
        cell: CellId,
        particle: ParticleId,
    },
}

impl LinkId {
    /// A backbone link between two cells, normalising the endpoint order.
    pub fn backbone(a: CellId, b: CellId, replica: u8) -> Self {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };

        Self::Backbone { a, b, replica }
    }

    pub fn is_backbone(&self) -> bool {
        matches!(self, Self::Backbone { .. })
    }

    /// The cells this link touches (the registry side has no cell id).
    pub fn cells(&self) -> (Option<CellId>, Option<CellId>) {
        match *self {
            Self::Backbone { a, b, .. } => (Some(a), Some(b)),
            Self::RootVpn { cell } | Self::Routing { cell } => (None, Some(cell)),
            Self::Particle { cell, .. } => (Some(cell), None),
        }
    }

    pub fn touches(&self, cell: CellId) -> bool {
        let (a, b) = self.cells();

        a == Some(cell) || b == Some(cell)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Backbone { a, b, replica } => write!(f, "backbone/{a}-{b}.{replica}"),
            Self::RootVpn { cell } => write!(f, "root-vpn/{cell}"),
            Self::Routing { cell } => write!(f, "routing/{cell}"),
            Self::Particle { cell, particle } => write!(f, "particle/{cell}-{particle}"),
        }
    }
}

/// One of the two ends of a link, in the order fixed by its [`LinkId`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}
