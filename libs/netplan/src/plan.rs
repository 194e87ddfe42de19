use crate::{Error, nth_address, nth_block, nth_point_to_point, offset_port};
use ip_network::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use uvn_model::{BaseNet, Cell, CellId, LinkId, Particle, ParticleId, UvnSettings};

/// Hub-and-spoke addressing between the registry and every cell.
///
/// All endpoints share the root base subnet; the registry holds the first
/// usable address, cell `n` holds offset `n + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootVpnPlan {
    pub subnet: Ipv4Network,
    pub registry: Ipv4Addr,
    pub cells: BTreeMap<CellId, Ipv4Addr>,
}

/// The particle-VPN block carved for one public cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticleBlock {
    pub subnet: Ipv4Network,
    /// Offset 1: the cell agent's own address on the block.
    pub agent: Ipv4Addr,
    /// Offset `id + 1`, so a particle keeps the same host number no matter
    /// which cell it connects through.
    pub particles: BTreeMap<ParticleId, Ipv4Addr>,
}

/// One backbone /31 plus the listener's UDP port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackboneSlot {
    pub link: LinkId,
    pub subnet: Ipv4Network,
    /// Held by the endpoint with the smaller cell id.
    pub lower: Ipv4Addr,
    pub upper: Ipv4Addr,
    pub port: u16,
}

/// The registry↔cell fallback /31 for one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSlot {
    pub subnet: Ipv4Network,
    pub cell: Ipv4Addr,
    pub registry: Ipv4Addr,
    /// Registry-side listen port.
    pub port: u16,
}

/// Every address, subnet and port the current deployment will use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPlan {
    root_vpn: RootVpnPlan,
    particles: BTreeMap<CellId, ParticleBlock>,
    /// In canonical link order, which is also how the /31s were carved.
    backbone: Vec<BackboneSlot>,
    routing: BTreeMap<CellId, RoutingSlot>,
}

impl AddressPlan {
    /// Computes the full plan for the given cell set and backbone links.
    ///
    /// `cells` and `particles` are the non-excluded entities; `backbone`
    /// the multigraph chosen by the deployment strategy. Input order does
    /// not matter, the plan imposes the canonical id order itself.
    pub fn compute(
        settings: &UvnSettings,
        cells: &[Cell],
        particles: &[Particle],
        backbone: &[LinkId],
    ) -> Result<Self, Error> {
        let mut cells = cells.iter().collect::<Vec<_>>();
        cells.sort_by_key(|c| c.id);

        let mut links = backbone.to_vec();
        links.sort();

        let root_vpn = Self::compute_root_vpn(settings, &cells)?;
        let particle_blocks = Self::compute_particle_blocks(settings, &cells, particles)?;
        let backbone = Self::compute_backbone(settings, &links)?;
        let routing = Self::compute_routing(settings, &cells)?;

        tracing::debug!(
            cells = cells.len(),
            backbone_links = backbone.len(),
            "computed address plan"
        );

        Ok(Self {
            root_vpn,
            particles: particle_blocks,
            backbone,
            routing,
        })
    }

    fn compute_root_vpn(
        settings: &UvnSettings,
        cells: &[&Cell],
    ) -> Result<RootVpnPlan, Error> {
        let base = settings.root_vpn;
        let which = BaseNet::RootVpn;
        let last_usable = (1u32 << (32 - base.netmask())) - 2;

        let registry = nth_address(base, 1, which)?;

        let mut assigned = BTreeMap::new();
        for cell in cells {
            let offset = cell.id.get() + 1;
            if offset > last_usable {
                return Err(Error::CapacityExceeded { base: which });
            }

            assigned.insert(cell.id, nth_address(base, offset, which)?);
        }

        Ok(RootVpnPlan {
            subnet: base,
            registry,
            cells: assigned,
        })
    }

    fn compute_particle_blocks(
        settings: &UvnSettings,
        cells: &[&Cell],
        particles: &[Particle],
    ) -> Result<BTreeMap<CellId, ParticleBlock>, Error> {
        let base = settings.particles_vpn;
        let which = BaseNet::ParticlesVpn;
        let size = particle_block_size(settings.max_particles);

        let mut blocks = BTreeMap::new();
        for cell in cells.iter().filter(|c| c.is_public()) {
            let subnet = nth_block(base, cell.id.get(), size, which)?;
            let agent = nth_address(subnet, 1, which)?;

            let mut assigned = BTreeMap::new();
            for particle in particles {
                let offset = particle.id.get() + 1;
                // Keep clear of the block's broadcast address.
                if offset > size - 2 {
                    return Err(Error::CapacityExceeded { base: which });
                }

                assigned.insert(particle.id, nth_address(subnet, offset, which)?);
            }

            blocks.insert(
                cell.id,
                ParticleBlock {
                    subnet,
                    agent,
                    particles: assigned,
                },
            );
        }

        Ok(blocks)
    }

    fn compute_backbone(
        settings: &UvnSettings,
        links: &[LinkId],
    ) -> Result<Vec<BackboneSlot>, Error> {
        let base = settings.backbone;
        let which = BaseNet::Backbone;

        let mut slots = Vec::with_capacity(links.len());
        for (k, link) in links.iter().enumerate() {
            let k = u32::try_from(k).map_err(|_| Error::CapacityExceeded { base: which })?;
            let subnet = nth_point_to_point(base, k, which)?;
            let lower = subnet.network_address();
            let upper = nth_address(subnet, 1, which)?;
            let port = offset_port(settings.backbone_base_port, k, which)?;

            slots.push(BackboneSlot {
                link: *link,
                subnet,
                lower,
                upper,
                port,
            });
        }

        Ok(slots)
    }

    fn compute_routing(
        settings: &UvnSettings,
        cells: &[&Cell],
    ) -> Result<BTreeMap<CellId, RoutingSlot>, Error> {
        let base = settings.routing;
        let which = BaseNet::Routing;

        let mut slots = BTreeMap::new();
        for (j, cell) in cells.iter().enumerate() {
            let j = u32::try_from(j).map_err(|_| Error::CapacityExceeded { base: which })?;
            let subnet = nth_point_to_point(base, j, which)?;

            slots.insert(
                cell.id,
                RoutingSlot {
                    subnet,
                    cell: subnet.network_address(),
                    registry: nth_address(subnet, 1, which)?,
                    port: offset_port(settings.routing_base_port, j, which)?,
                },
            );
        }

        Ok(slots)
    }

    pub fn root_vpn(&self) -> &RootVpnPlan {
        &self.root_vpn
    }

    pub fn particle_block(&self, cell: CellId) -> Option<&ParticleBlock> {
        self.particles.get(&cell)
    }

    pub fn backbone_slot(&self, link: &LinkId) -> Option<&BackboneSlot> {
        self.backbone
            .binary_search_by(|slot| slot.link.cmp(link))
            .ok()
            .map(|i| &self.backbone[i])
    }

    pub fn backbone_slots(&self) -> impl Iterator<Item = &BackboneSlot> {
        self.backbone.iter()
    }

    pub fn routing_slot(&self, cell: CellId) -> Option<&RoutingSlot> {
        self.routing.get(&cell)
    }

    pub fn routing_slots(&self) -> impl Iterator<Item = (CellId, &RoutingSlot)> {
        self.routing.iter().map(|(id, slot)| (*id, slot))
    }
}

/// Smallest power-of-two block that fits the agent, `max_particles` hosts
/// and the block's own network/broadcast addresses, never below a /24.
fn particle_block_size(max_particles: u16) -> u32 {
    (u32::from(max_particles) + 3).next_power_of_two().max(256)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use test_case::test_case;
    use uvn_model::Name;

    fn net(s: &str) -> Ipv4Network {
        let (addr, prefix) = s.split_once('/').unwrap();

        Ipv4Network::new(addr.parse().unwrap(), prefix.parse().unwrap()).unwrap()
    }

    fn cell(id: u32, public: bool) -> Cell {
        Cell {
            id: CellId::new(id),
            name: format!("cell-{id}").parse::<Name>().unwrap(),
            address: public.then(|| format!("cell-{id}.example")),
            allowed_lans: BTreeSet::new(),
            excluded: false,
            owner: "op@example.com".parse().unwrap(),
        }
    }

    fn particle(id: u32) -> Particle {
        Particle {
            id: ParticleId::new(id),
            name: format!("p-{id}").parse::<Name>().unwrap(),
            excluded: false,
            owner: "op@example.com".parse().unwrap(),
        }
    }

    #[test]
    fn registry_takes_first_usable_root_address() {
        let settings = UvnSettings::default();
        let plan =
            AddressPlan::compute(&settings, &[cell(1, true), cell(2, false)], &[], &[]).unwrap();

        assert_eq!(plan.root_vpn().registry, Ipv4Addr::new(10, 255, 128, 1));
        assert_eq!(
            plan.root_vpn().cells[&CellId::new(1)],
            Ipv4Addr::new(10, 255, 128, 2)
        );
        assert_eq!(
            plan.root_vpn().cells[&CellId::new(2)],
            Ipv4Addr::new(10, 255, 128, 3)
        );
    }

    #[test]
    fn particle_host_number_is_stable_across_cells() {
        let settings = UvnSettings::default();
        let cells = [cell(1, true), cell(2, true)];
        let plan = AddressPlan::compute(&settings, &cells, &[particle(7)], &[]).unwrap();

        let block1 = plan.particle_block(CellId::new(1)).unwrap();
        let block2 = plan.particle_block(CellId::new(2)).unwrap();

        assert_eq!(block1.subnet, net("10.254.1.0/24"));
        assert_eq!(block2.subnet, net("10.254.2.0/24"));
        assert_eq!(block1.agent, Ipv4Addr::new(10, 254, 1, 1));
        assert_eq!(
            block1.particles[&ParticleId::new(7)],
            Ipv4Addr::new(10, 254, 1, 8)
        );
        assert_eq!(
            block2.particles[&ParticleId::new(7)],
            Ipv4Addr::new(10, 254, 2, 8)
        );
    }

    #[test]
    fn private_cells_get_no_particle_block() {
        let settings = UvnSettings::default();
        let plan =
            AddressPlan::compute(&settings, &[cell(1, true), cell(2, false)], &[], &[]).unwrap();

        assert!(plan.particle_block(CellId::new(2)).is_none());
    }

    #[test]
    fn backbone_slots_follow_link_order() {
        let settings = UvnSettings::default();
        let cells = [cell(1, true), cell(2, true), cell(3, true)];
        let links = [
            LinkId::backbone(CellId::new(2), CellId::new(3), 0),
            LinkId::backbone(CellId::new(1), CellId::new(2), 0),
            LinkId::backbone(CellId::new(1), CellId::new(3), 0),
        ];
        let plan = AddressPlan::compute(&settings, &cells, &[], &links).unwrap();

        let slot = |a: u32, b: u32| {
            plan.backbone_slot(&LinkId::backbone(CellId::new(a), CellId::new(b), 0))
                .unwrap()
        };

        assert_eq!(slot(1, 2).subnet, net("10.255.192.0/31"));
        assert_eq!(slot(1, 3).subnet, net("10.255.192.2/31"));
        assert_eq!(slot(2, 3).subnet, net("10.255.192.4/31"));
        assert_eq!(slot(1, 2).port, 63550);
        assert_eq!(slot(1, 3).port, 63551);
        assert_eq!(slot(2, 3).port, 63552);
    }

    #[test]
    fn routing_slots_put_registry_on_the_upper_address() {
        let settings = UvnSettings::default();
        let plan =
            AddressPlan::compute(&settings, &[cell(1, true), cell(4, false)], &[], &[]).unwrap();

        let slot = plan.routing_slot(CellId::new(4)).unwrap();

        assert_eq!(slot.subnet, net("10.255.208.2/31"));
        assert_eq!(slot.cell, Ipv4Addr::new(10, 255, 208, 2));
        assert_eq!(slot.registry, Ipv4Addr::new(10, 255, 208, 3));
        assert_eq!(slot.port, 63351);
    }

    #[test]
    fn backbone_capacity_is_checked_up_front() {
        let settings = UvnSettings {
            backbone: net("10.255.192.0/29"),
            ..UvnSettings::default()
        };
        let cells = (1..=5).map(|id| cell(id, true)).collect::<Vec<_>>();
        let links = (1..5u32)
            .flat_map(|a| {
                (a + 1..=5).map(move |b| LinkId::backbone(CellId::new(a), CellId::new(b), 0))
            })
            .collect::<Vec<_>>();

        assert_eq!(
            AddressPlan::compute(&settings, &cells, &[], &links),
            Err(Error::CapacityExceeded {
                base: BaseNet::Backbone
            })
        );
    }

    #[test_case(0, 256)]
    #[test_case(128, 256)]
    #[test_case(253, 256)]
    #[test_case(254, 512)]
    #[test_case(1000, 1024)]
    fn particle_block_sizes(max_particles: u16, expected: u32) {
        assert_eq!(particle_block_size(max_particles), expected);
    }

    proptest! {
        /// Shuffling the insertion order never changes the plan.
        #[test]
        fn plan_is_independent_of_input_order(seed in any::<u64>()) {
            use rand::seq::SliceRandom as _;
            use rand::SeedableRng as _;

            let settings = UvnSettings::default();
            let cells = (1..=6u32).map(|id| cell(id, id % 2 == 1)).collect::<Vec<_>>();
            let particles = (1..=3u32).map(particle).collect::<Vec<_>>();
            let links = vec![
                LinkId::backbone(CellId::new(1), CellId::new(3), 0),
                LinkId::backbone(CellId::new(3), CellId::new(5), 0),
                LinkId::backbone(CellId::new(1), CellId::new(5), 0),
            ];

            let reference =
                AddressPlan::compute(&settings, &cells, &particles, &links).unwrap();

            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let mut shuffled_cells = cells;
            shuffled_cells.shuffle(&mut rng);
            let mut shuffled_links = links;
            shuffled_links.shuffle(&mut rng);

            let shuffled =
                AddressPlan::compute(&settings, &shuffled_cells, &particles, &shuffled_links)
                    .unwrap();

            prop_assert_eq!(reference, shuffled);
        }
    }

    #[test]
    fn all_assignments_stay_inside_their_bases() {
        let settings = UvnSettings::default();
        let cells = (1..=6u32).map(|id| cell(id, id <= 3)).collect::<Vec<_>>();
        let particles = (1..=4u32).map(particle).collect::<Vec<_>>();
        let links = vec![
            LinkId::backbone(CellId::new(1), CellId::new(2), 0),
            LinkId::backbone(CellId::new(2), CellId::new(3), 0),
            LinkId::backbone(CellId::new(1), CellId::new(3), 0),
        ];
        let plan = AddressPlan::compute(&settings, &cells, &particles, &links).unwrap();

        for addr in plan.root_vpn().cells.values() {
            assert!(settings.root_vpn.contains(*addr));
        }
        for slot in plan.backbone_slots() {
            assert!(settings.backbone.contains(slot.lower));
            assert!(settings.backbone.contains(slot.upper));
        }
        for (_, slot) in plan.routing_slots() {
            assert!(settings.routing.contains(slot.cell));
            assert!(settings.routing.contains(slot.registry));
        }
        for id in cells.iter().filter(|c| c.is_public()).map(|c| c.id) {
            let block = plan.particle_block(id).unwrap();
            assert!(settings.particles_vpn.contains(block.agent));
            for addr in block.particles.values() {
                assert!(settings.particles_vpn.contains(*addr));
            }
        }
    }
}
