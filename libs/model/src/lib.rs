//! Shared vocabulary for the UVN control plane.
//!
//! Every other crate in the workspace speaks in terms of the ids, names and
//! records defined here. This crate carries no allocation logic and no key
//! material, only the data model and its local invariants.

#![cfg_attr(test, allow(clippy::unwrap_used))]

#[macro_use]
mod make_id;
mod link;
mod name;
mod records;
mod settings;

pub use link::{LinkId, Side};
pub use name::{Email, InterfaceName, InvalidEmail, InvalidInterfaceName, InvalidName, Name};
pub use records::{Cell, Particle, User, Uvn};
pub use settings::{
    BaseNet, DeploymentSettings, SettingsError, StrategyKind, Timing, TimingProfile, UvnSettings,
    last_address, networks_overlap,
};

use serde::{Deserialize, Serialize};
use std::fmt;

make_id!(CellId);
make_id!(ParticleId);

#[derive(
    Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, derive_more::From,
)]
pub enum EntityId {
    Cell(CellId),
    Particle(ParticleId),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Cell(inner) => write!(f, "Cell({inner})"),
            EntityId::Particle(inner) => write!(f, "Particle({inner})"),
        }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}
