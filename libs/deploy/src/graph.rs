use crate::generator::LinkGenerator;
use crate::strategy::{StrategyContext, check_contract, strategy_for};
use crate::{Error, Link};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uvn_keystore::KeyStore;
use uvn_model::{Cell, CellId, InterfaceName, LinkId, Particle, ParticleId, Uvn};
use uvn_netplan::AddressPlan;

/// The backbone multigraph of the current snapshot, links in canonical
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeploymentGraph {
    links: Vec<Link>,
}

impl DeploymentGraph {
    fn new(mut links: Vec<Link>) -> Self {
        links.sort_by_key(|link| link.id);

        Self { links }
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Links touching `cell`, in canonical order.
    pub fn incident(&self, cell: CellId) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(move |link| link.id.touches(cell))
    }

    pub fn degree(&self, cell: CellId) -> usize {
        self.incident(cell).count()
    }

    /// The cells on the other end of `cell`'s backbone links.
    pub fn neighbours(&self, cell: CellId) -> BTreeSet<CellId> {
        self.incident(cell)
            .filter_map(|link| {
                let LinkId::Backbone { a, b, .. } = link.id else {
                    return None;
                };

                if a == cell { Some(b) } else { Some(a) }
            })
            .collect()
    }
}

/// Every tunnel of one snapshot: the backbone graph plus the per-cell
/// root-VPN, routing and particle links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub backbone: DeploymentGraph,
    pub root_vpn: BTreeMap<CellId, Link>,
    pub routing: BTreeMap<CellId, Link>,
    pub particles: BTreeMap<CellId, BTreeMap<ParticleId, Link>>,
}

impl Deployment {
    /// Runs strategy, allocator and link generator for the given cell set.
    ///
    /// `cells` and `particles` may come in any order; excluded entities
    /// are ignored. On success the keystore holds exactly the link keys
    /// of the returned deployment (stale ones retired, missing ones
    /// freshly issued); on failure the registry model is untouched.
    pub fn build(
        uvn: &Uvn,
        cells: &[Cell],
        particles: &[Particle],
        keystore: &mut KeyStore,
    ) -> Result<(AddressPlan, Self), Error> {
        let mut cells = cells
            .iter()
            .filter(|c| !c.excluded)
            .cloned()
            .collect::<Vec<_>>();
        cells.sort_by_key(|c| c.id);

        let mut particles = particles
            .iter()
            .filter(|p| !p.excluded)
            .cloned()
            .collect::<Vec<_>>();
        particles.sort_by_key(|p| p.id);

        if !cells.iter().any(Cell::is_public) {
            return Err(Error::NotDeployable);
        }

        let ctx = StrategyContext {
            cells: &cells,
            settings: &uvn.settings,
            uvn_name: &uvn.name,
        };
        let strategy = strategy_for(uvn.settings.deployment.strategy);
        let mut backbone_ids = strategy.backbone(&ctx)?;
        check_contract(strategy, &ctx, &backbone_ids)?;
        backbone_ids.sort();

        tracing::debug!(
            strategy = %strategy.kind(),
            cells = cells.len(),
            backbone_links = backbone_ids.len(),
            "chose backbone graph"
        );

        let plan = AddressPlan::compute(&uvn.settings, &cells, &particles, &backbone_ids)?;

        let cell_by_id = cells
            .iter()
            .map(|cell| (cell.id, cell))
            .collect::<BTreeMap<_, _>>();

        // Interface ordinals: a cell's n-th incident backbone link (in
        // canonical link order) comes up as `uwg-b{n}`.
        let mut iface_ordinal = BTreeMap::new();
        let mut iface_for = |cell: CellId| -> InterfaceName {
            let ordinal = iface_ordinal.entry(cell).or_insert(0u32);
            let name = format!("uwg-b{ordinal}")
                .parse()
                .expect("generated interface names are short");
            *ordinal += 1;

            name
        };

        let live = backbone_ids
            .iter()
            .copied()
            .chain(cells.iter().flat_map(|cell| {
                [
                    LinkId::RootVpn { cell: cell.id },
                    LinkId::Routing { cell: cell.id },
                ]
            }))
            .chain(cells.iter().filter(|c| c.is_public()).flat_map(|cell| {
                particles.iter().map(move |particle| LinkId::Particle {
                    cell: cell.id,
                    particle: particle.id,
                })
            }))
            .collect::<BTreeSet<_>>();
        keystore.retain_link_keys(&live);

        // The particle-VPN hub interface needs its key even before the
        // first particle registers.
        for cell in cells.iter().filter(|c| c.is_public()) {
            keystore.ensure(uvn_keystore::KeyKind::Wg, uvn_keystore::KeyOwner::Cell(cell.id));
        }

        let generator = LinkGenerator { uvn, plan: &plan };

        let backbone = backbone_ids
            .iter()
            .map(|id| {
                let LinkId::Backbone { a, b, .. } = *id else {
                    unreachable!("strategy contract admits backbone links only")
                };

                generator.backbone_link(
                    keystore,
                    cell_by_id[&a],
                    cell_by_id[&b],
                    *id,
                    iface_for(a),
                    iface_for(b),
                )
            })
            .collect::<Vec<_>>();

        let root_vpn = cells
            .iter()
            .map(|cell| (cell.id, generator.root_vpn_link(keystore, cell)))
            .collect::<BTreeMap<_, _>>();
        let routing = cells
            .iter()
            .map(|cell| (cell.id, generator.routing_link(keystore, cell)))
            .collect::<BTreeMap<_, _>>();

        let particle_links = cells
            .iter()
            .filter(|cell| cell.is_public())
            .map(|cell| {
                let links = particles
                    .iter()
                    .map(|particle| {
                        (particle.id, generator.particle_link(keystore, cell, particle))
                    })
                    .collect::<BTreeMap<_, _>>();

                (cell.id, links)
            })
            .collect::<BTreeMap<_, _>>();

        Ok((
            plan,
            Self {
                backbone: DeploymentGraph::new(backbone),
                root_vpn,
                routing,
                particles: particle_links,
            },
        ))
    }

    /// Every link of the deployment, whatever its kind.
    pub fn all_links(&self) -> impl Iterator<Item = &Link> {
        self.backbone
            .links()
            .iter()
            .chain(self.root_vpn.values())
            .chain(self.routing.values())
            .chain(self.particles.values().flat_map(|links| links.values()))
    }
}
