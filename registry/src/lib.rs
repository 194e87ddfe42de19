//! The authoritative UVN model and its state machine.
//!
//! A [`Registry`] owns the UVN, its cells, particles and users, the key
//! authority, and the monotonically advancing configuration generation.
//! Mutations move it between `Draft` and `Deployed`; [`Registry::redeploy`]
//! runs the strategy, the address plan, the link generator and the bundle
//! renderer, and commits a content-addressed [`RegistryConfig`] snapshot.
//!
//! Nothing intermediate is ever published: a failed transition returns a
//! typed [`Error`] and leaves the model exactly as it was.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod handle;
mod render;
mod snapshot;
mod store;

pub use handle::RegistryHandle;
pub use render::{AgentBundle, ParticleEndpoint, ParticlesVpn, RenderedEndpoint, RouterConfig};
pub use snapshot::{ConfigBody, ConfigId, RegistryConfig};
pub use store::{MemoryStore, StateDump, StateStore};

use ip_network::Ipv4Network;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uvn_deploy::{Deployment, StaticGraphIssue};
use uvn_keystore::{KeyKind, KeyOwner, KeyStore};
use uvn_model::{
    BaseNet, Cell, CellId, Email, EntityId, Name, Particle, ParticleId, SettingsError,
    TimingProfile, User, Uvn, UvnSettings, networks_overlap,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("name `{0}` is already taken")]
    NameTaken(String),
    #[error("{0} was not found")]
    NotFound(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("allowed LANs {a} and {b} overlap")]
    LanOverlap { a: Ipv4Network, b: Ipv4Network },
    #[error("allowed LAN {lan} of `{cell}` overlaps the {base} base network")]
    ReservedNetworkOverlap {
        cell: Name,
        lan: Ipv4Network,
        base: BaseNet,
    },
    #[error("{base} base network is too small for the current deployment")]
    CapacityExceeded { base: BaseNet },
    #[error("the UVN has no public cell to anchor a deployment")]
    NotDeployable,
    #[error("deployment strategy could not satisfy its contract")]
    StrategyUnsatisfiable,
    #[error("static deployment graph is invalid: {reason}")]
    InvalidStaticGraph { reason: StaticGraphIssue },
    #[error("a live key already exists for this scope")]
    KeyExists,
    #[error("no live key for this scope")]
    KeyMissing,
    #[error("another writer holds the registry lock")]
    Conflict,
    #[error(transparent)]
    InvalidSettings(#[from] SettingsError),
}

impl From<uvn_deploy::Error> for Error {
    fn from(e: uvn_deploy::Error) -> Self {
        match e {
            uvn_deploy::Error::NotDeployable => Error::NotDeployable,
            uvn_deploy::Error::StrategyUnsatisfiable => Error::StrategyUnsatisfiable,
            uvn_deploy::Error::InvalidStaticGraph { reason } => {
                Error::InvalidStaticGraph { reason }
            }
            uvn_deploy::Error::Plan(e) => e.into(),
        }
    }
}

impl From<uvn_netplan::Error> for Error {
    fn from(e: uvn_netplan::Error) -> Self {
        match e {
            uvn_netplan::Error::CapacityExceeded { base } => Error::CapacityExceeded { base },
        }
    }
}

impl From<uvn_keystore::Error> for Error {
    fn from(e: uvn_keystore::Error) -> Self {
        match e {
            uvn_keystore::Error::Exists { .. } => Error::KeyExists,
            uvn_keystore::Error::Missing { .. } => Error::KeyMissing,
        }
    }
}

/// Where the registry stands between mutations and deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// The model changed since the last committed deployment (or none was
    /// committed yet).
    Draft,
    /// The current snapshot reflects the model.
    Deployed,
}

#[derive(Debug, Clone)]
pub struct UserSpec {
    pub email: Email,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct CellSpec {
    pub name: Name,
    pub address: Option<String>,
    pub allowed_lans: BTreeSet<Ipv4Network>,
    pub owner: Email,
}

#[derive(Debug, Clone)]
pub struct ParticleSpec {
    pub name: Name,
    pub owner: Email,
}

/// Which keys a [`Registry::rekey`] call rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyScope {
    Uvn,
    Ca,
    Cell(CellId),
    Particle(ParticleId),
    /// Retire every live backbone link key; the next redeploy mints fresh
    /// tunnels.
    Backbone,
}

/// Outcome of a successful [`Registry::redeploy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redeploy {
    Committed(ConfigId),
    /// The inputs produced a snapshot byte-identical to the current one.
    Unchanged(ConfigId),
}

impl Redeploy {
    pub fn config_id(&self) -> &ConfigId {
        match self {
            Redeploy::Committed(id) | Redeploy::Unchanged(id) => id,
        }
    }
}

pub struct Registry {
    uvn: Uvn,
    cells: BTreeMap<CellId, Cell>,
    particles: BTreeMap<ParticleId, Particle>,
    users: BTreeMap<Email, User>,
    keystore: KeyStore,
    next_cell: CellId,
    next_particle: ParticleId,
    generation: u64,
    phase: Phase,
    current: Option<Arc<RegistryConfig>>,
}

impl Registry {
    /// The `Empty → Draft` transition: brings a UVN into existence with
    /// its owning user, identity keypair and root of trust.
    pub fn create(
        name: Name,
        address: Option<String>,
        owner: UserSpec,
        settings: UvnSettings,
    ) -> Result<Self, Error> {
        settings.validate()?;

        let realm = name.clone();
        let mut users = BTreeMap::new();
        users.insert(
            owner.email.clone(),
            make_user(owner, realm.as_str()),
        );

        let mut keystore = KeyStore::new();
        keystore.issue(KeyKind::Identity, KeyOwner::Uvn)?;
        keystore.issue(KeyKind::Ca, KeyOwner::Uvn)?;

        let uvn = Uvn {
            name,
            address,
            owner: users
                .keys()
                .next()
                .expect("owner was just inserted")
                .clone(),
            settings,
        };

        tracing::info!(uvn = %uvn.name, "created UVN");

        Ok(Self {
            uvn,
            cells: BTreeMap::new(),
            particles: BTreeMap::new(),
            users,
            keystore,
            next_cell: CellId::FIRST,
            next_particle: ParticleId::FIRST,
            generation: 0,
            phase: Phase::Draft,
            current: None,
        })
    }

    pub fn register_user(&mut self, actor: &Email, spec: UserSpec) -> Result<(), Error> {
        self.ensure_admin(actor)?;

        if self.users.contains_key(&spec.email) {
            return Err(Error::NameTaken(spec.email.to_string()));
        }

        let realm = self.uvn.name.as_str().to_owned();
        self.users
            .insert(spec.email.clone(), make_user(spec, &realm));
        self.phase = Phase::Draft;

        Ok(())
    }

    /// Registers a new cell, allocating the next id. Ids are dense and
    /// never reused, even after the cell is excluded.
    #[tracing::instrument(level = "debug", skip_all, fields(cell = %spec.name))]
    pub fn define_cell(&mut self, actor: &Email, spec: CellSpec) -> Result<CellId, Error> {
        self.ensure_admin(actor)?;
        self.ensure_user(&spec.owner)?;

        if self.cells.values().any(|c| c.name == spec.name) {
            return Err(Error::NameTaken(spec.name.to_string()));
        }

        self.check_lans(&spec.name, &spec.allowed_lans, None)?;

        let id = self.next_cell;
        self.next_cell = id.next();

        self.keystore.issue(KeyKind::Identity, KeyOwner::Cell(id))?;
        self.keystore.issue(
            KeyKind::Wg,
            KeyOwner::LinkEnd {
                link: uvn_model::LinkId::RootVpn { cell: id },
                side: uvn_model::Side::B,
            },
        )?;

        self.cells.insert(
            id,
            Cell {
                id,
                name: spec.name,
                address: spec.address,
                allowed_lans: spec.allowed_lans,
                excluded: false,
                owner: spec.owner,
            },
        );
        self.phase = Phase::Draft;

        tracing::info!(%id, "defined cell");

        Ok(id)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(particle = %spec.name))]
    pub fn define_particle(&mut self, actor: &Email, spec: ParticleSpec) -> Result<ParticleId, Error> {
        self.ensure_admin(actor)?;
        self.ensure_user(&spec.owner)?;

        if self.particles.values().any(|p| p.name == spec.name) {
            return Err(Error::NameTaken(spec.name.to_string()));
        }

        let id = self.next_particle;
        self.next_particle = id.next();

        self.keystore
            .issue(KeyKind::Identity, KeyOwner::Particle(id))?;

        self.particles.insert(
            id,
            Particle {
                id,
                name: spec.name,
                excluded: false,
                owner: spec.owner,
            },
        );
        self.phase = Phase::Draft;

        tracing::info!(%id, "defined particle");

        Ok(id)
    }

    pub fn exclude_cell(&mut self, actor: &Email, id: CellId) -> Result<(), Error> {
        self.ensure_admin(actor)?;

        let cell = self
            .cells
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("cell {id}")))?;
        cell.excluded = true;
        self.phase = Phase::Draft;

        tracing::info!(%id, "excluded cell");

        Ok(())
    }

    /// Clears the excluded flag. The cell's LANs re-enter the disjointness
    /// invariant, so they are validated again.
    pub fn restore_cell(&mut self, actor: &Email, id: CellId) -> Result<(), Error> {
        self.ensure_admin(actor)?;

        let (name, lans) = {
            let cell = self
                .cells
                .get(&id)
                .ok_or_else(|| Error::NotFound(format!("cell {id}")))?;

            (cell.name.clone(), cell.allowed_lans.clone())
        };
        self.check_lans(&name, &lans, Some(id))?;

        let cell = self.cells.get_mut(&id).expect("checked above");
        cell.excluded = false;
        self.phase = Phase::Draft;

        Ok(())
    }

    pub fn exclude_particle(&mut self, actor: &Email, id: ParticleId) -> Result<(), Error> {
        self.ensure_admin(actor)?;

        let particle = self
            .particles
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("particle {id}")))?;
        particle.excluded = true;
        self.phase = Phase::Draft;

        Ok(())
    }

    pub fn restore_particle(&mut self, actor: &Email, id: ParticleId) -> Result<(), Error> {
        self.ensure_admin(actor)?;

        let particle = self
            .particles
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("particle {id}")))?;
        particle.excluded = false;
        self.phase = Phase::Draft;

        Ok(())
    }

    /// Rotates the scoped keys. History is retained; see the keystore.
    pub fn rekey(&mut self, actor: &Email, scope: RekeyScope) -> Result<(), Error> {
        match scope {
            RekeyScope::Uvn => {
                self.ensure_admin(actor)?;
                self.keystore.rotate(KeyKind::Identity, KeyOwner::Uvn)?;
            }
            RekeyScope::Ca => {
                self.ensure_admin(actor)?;
                self.keystore.rotate(KeyKind::Ca, KeyOwner::Uvn)?;
            }
            RekeyScope::Cell(id) => {
                let cell = self
                    .cells
                    .get(&id)
                    .ok_or_else(|| Error::NotFound(format!("cell {id}")))?;
                self.ensure_admin_or(actor, &cell.owner.clone())?;
                self.keystore.rotate(KeyKind::Identity, KeyOwner::Cell(id))?;
            }
            RekeyScope::Particle(id) => {
                let particle = self
                    .particles
                    .get(&id)
                    .ok_or_else(|| Error::NotFound(format!("particle {id}")))?;
                self.ensure_admin_or(actor, &particle.owner.clone())?;
                self.keystore
                    .rotate(KeyKind::Identity, KeyOwner::Particle(id))?;
            }
            RekeyScope::Backbone => {
                self.ensure_admin(actor)?;

                // Keep every non-backbone link key, retire the rest.
                let keep = self
                    .current
                    .iter()
                    .flat_map(|snapshot| snapshot.body.deployment.all_links())
                    .map(|link| link.id)
                    .filter(|id| !id.is_backbone())
                    .collect::<BTreeSet<_>>();
                self.keystore.retain_link_keys(&keep);
            }
        }

        self.phase = Phase::Draft;

        tracing::info!(?scope, "rotated keys");

        Ok(())
    }

    pub fn set_timing(&mut self, actor: &Email, timing: TimingProfile) -> Result<(), Error> {
        self.ensure_admin(actor)?;

        self.uvn.settings.timing = timing;
        self.phase = Phase::Draft;

        Ok(())
    }

    pub fn set_deployment(
        &mut self,
        actor: &Email,
        deployment: uvn_model::DeploymentSettings,
    ) -> Result<(), Error> {
        self.ensure_admin(actor)?;

        self.uvn.settings.deployment = deployment;
        self.phase = Phase::Draft;

        Ok(())
    }

    /// The `Draft → Deployed` transition: recomputes everything and
    /// commits a new snapshot, unless the result is identical to the
    /// current one.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn redeploy(&mut self, actor: &Email) -> Result<Redeploy, Error> {
        self.ensure_admin(actor)?;

        let cells = self.cells.values().cloned().collect::<Vec<_>>();
        let particles = self.particles.values().cloned().collect::<Vec<_>>();

        let (plan, deployment) =
            Deployment::build(&self.uvn, &cells, &particles, &mut self.keystore)?;

        let body = ConfigBody {
            uvn: self.uvn.clone(),
            cells,
            particles,
            plan,
            deployment,
            fingerprints: self.keystore.fingerprints(),
        };
        let candidate = RegistryConfig::new(self.generation + 1, body);

        if let Some(current) = &self.current {
            if current.config_id == candidate.config_id {
                self.phase = Phase::Deployed;

                tracing::info!(config_id = %current.config_id, "deployment unchanged");

                return Ok(Redeploy::Unchanged(current.config_id.clone()));
            }
        }

        self.generation += 1;
        let config_id = candidate.config_id.clone();
        self.current = Some(Arc::new(candidate));
        self.phase = Phase::Deployed;

        tracing::info!(%config_id, generation = self.generation, "committed deployment");

        Ok(Redeploy::Committed(config_id))
    }

    /// Renders one cell's agent bundle from the current snapshot.
    pub fn agent_bundle(&self, actor: &Email, cell: CellId) -> Result<AgentBundle, Error> {
        let owner = self
            .cells
            .get(&cell)
            .ok_or_else(|| Error::NotFound(format!("cell {cell}")))?
            .owner
            .clone();
        self.ensure_admin_or(actor, &owner)?;

        let snapshot = self
            .current
            .as_ref()
            .ok_or_else(|| Error::NotFound("a committed deployment".to_owned()))?;

        render::render_bundle(snapshot, &self.keystore, cell)
    }

    /// Renders the bundles of every non-excluded cell.
    pub fn agent_bundles(&self, actor: &Email) -> Result<Vec<AgentBundle>, Error> {
        self.ensure_admin(actor)?;

        let snapshot = self
            .current
            .as_ref()
            .ok_or_else(|| Error::NotFound("a committed deployment".to_owned()))?;

        snapshot
            .body
            .cells
            .iter()
            .filter(|cell| !cell.excluded)
            .map(|cell| render::render_bundle(snapshot, &self.keystore, cell.id))
            .collect()
    }

    /// Public identity material; readable by anyone with a handle.
    pub fn identity_public(&self, entity: EntityId) -> Result<uvn_keystore::WgPublicKey, Error> {
        let owner = match entity {
            EntityId::Cell(id) => KeyOwner::Cell(id),
            EntityId::Particle(id) => KeyOwner::Particle(id),
        };

        Ok(self.keystore.public(KeyKind::Identity, owner)?)
    }

    /// Private identity material; only the entity's owner (or the UVN
    /// owner) may read it.
    pub fn identity_private(&self, actor: &Email, entity: EntityId) -> Result<String, Error> {
        let entity_owner = match entity {
            EntityId::Cell(id) => self
                .cells
                .get(&id)
                .map(|c| c.owner.clone())
                .ok_or_else(|| Error::NotFound(format!("cell {id}")))?,
            EntityId::Particle(id) => self
                .particles
                .get(&id)
                .map(|p| p.owner.clone())
                .ok_or_else(|| Error::NotFound(format!("particle {id}")))?,
        };
        self.ensure_admin_or(actor, &entity_owner)?;

        let owner = match entity {
            EntityId::Cell(id) => KeyOwner::Cell(id),
            EntityId::Particle(id) => KeyOwner::Particle(id),
        };

        Ok(self.keystore.secret(KeyKind::Identity, owner)?.to_base64())
    }

    pub fn uvn(&self) -> &Uvn {
        &self.uvn
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub fn particles(&self) -> impl Iterator<Item = &Particle> {
        self.particles.values()
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn cell_by_name(&self, name: &Name) -> Option<&Cell> {
        self.cells.values().find(|c| &c.name == name)
    }

    /// The committed snapshot, if any. Snapshots are immutable; readers
    /// hold the `Arc` for as long as they like.
    pub fn current_config(&self) -> Option<Arc<RegistryConfig>> {
        self.current.clone()
    }

    fn ensure_admin(&self, actor: &Email) -> Result<(), Error> {
        if actor != &self.uvn.owner {
            return Err(Error::PermissionDenied);
        }

        Ok(())
    }

    fn ensure_admin_or(&self, actor: &Email, owner: &Email) -> Result<(), Error> {
        if actor != &self.uvn.owner && actor != owner {
            return Err(Error::PermissionDenied);
        }

        Ok(())
    }

    fn ensure_user(&self, email: &Email) -> Result<(), Error> {
        if !self.users.contains_key(email) {
            return Err(Error::NotFound(format!("user {email}")));
        }

        Ok(())
    }

    /// The §3 invariants on allowed LANs: pairwise disjoint across
    /// non-excluded cells and clear of every reserved base network.
    fn check_lans(
        &self,
        cell_name: &Name,
        lans: &BTreeSet<Ipv4Network>,
        ignore: Option<CellId>,
    ) -> Result<(), Error> {
        for lan in lans {
            for (base, network) in self.uvn.settings.bases() {
                if networks_overlap(*lan, network) {
                    return Err(Error::ReservedNetworkOverlap {
                        cell: cell_name.clone(),
                        lan: *lan,
                        base,
                    });
                }
            }

            for other in self
                .cells
                .values()
                .filter(|c| !c.excluded && Some(c.id) != ignore)
            {
                for other_lan in &other.allowed_lans {
                    if networks_overlap(*lan, *other_lan) {
                        return Err(Error::LanOverlap {
                            a: *lan,
                            b: *other_lan,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    pub(crate) fn keystore(&self) -> &KeyStore {
        &self.keystore
    }
}

fn make_user(spec: UserSpec, realm: &str) -> User {
    let credential = hex::encode(sha2::Sha256::digest(format!(
        "{}:{}:{}",
        spec.email, realm, spec.password
    )));

    User {
        email: spec.email,
        display_name: spec.display_name,
        realm: realm.to_owned(),
        credential,
    }
}
