use crate::snapshot::RegistryConfig;
use crate::{Phase, Registry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use uvn_keystore::KeyStore;
use uvn_model::{Cell, CellId, Particle, ParticleId, User, Uvn};

/// The full serde image of a registry: one field per table family of the
/// hosting store (users, uvn, cells, particles, key rows, the current
/// snapshot and the id counters).
///
/// The core never touches disk; the hosting process moves dumps in and out
/// through a [`StateStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDump {
    pub uvn: Uvn,
    pub cells: Vec<Cell>,
    pub particles: Vec<Particle>,
    pub users: Vec<User>,
    pub keystore: KeyStore,
    pub next_cell: CellId,
    pub next_particle: ParticleId,
    pub generation: u64,
    pub phase: Phase,
    pub current: Option<RegistryConfig>,
}

/// What the hosting process implements to persist the registry.
pub trait StateStore {
    type Error;

    fn save(&mut self, dump: &StateDump) -> Result<(), Self::Error>;
    fn load(&self) -> Result<Option<StateDump>, Self::Error>;
}

/// In-memory store; what the tests use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    dump: Option<StateDump>,
}

impl StateStore for MemoryStore {
    type Error = Infallible;

    fn save(&mut self, dump: &StateDump) -> Result<(), Self::Error> {
        self.dump = Some(dump.clone());

        Ok(())
    }

    fn load(&self) -> Result<Option<StateDump>, Self::Error> {
        Ok(self.dump.clone())
    }
}

impl Registry {
    pub fn dump(&self) -> StateDump {
        StateDump {
            uvn: self.uvn.clone(),
            cells: self.cells.values().cloned().collect(),
            particles: self.particles.values().cloned().collect(),
            users: self.users.values().cloned().collect(),
            keystore: self.keystore.clone(),
            next_cell: self.next_cell,
            next_particle: self.next_particle,
            generation: self.generation,
            phase: self.phase,
            current: self.current.as_deref().cloned(),
        }
    }

    pub fn restore(dump: StateDump) -> Self {
        Self {
            uvn: dump.uvn,
            cells: dump
                .cells
                .into_iter()
                .map(|cell| (cell.id, cell))
                .collect::<BTreeMap<_, _>>(),
            particles: dump
                .particles
                .into_iter()
                .map(|particle| (particle.id, particle))
                .collect::<BTreeMap<_, _>>(),
            users: dump
                .users
                .into_iter()
                .map(|user| (user.email.clone(), user))
                .collect::<BTreeMap<_, _>>(),
            keystore: dump.keystore,
            next_cell: dump.next_cell,
            next_particle: dump.next_particle,
            generation: dump.generation,
            phase: dump.phase,
            current: dump.current.map(Arc::new),
        }
    }
}
