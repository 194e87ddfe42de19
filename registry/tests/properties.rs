//! Universally quantified properties of the control plane, exercised
//! through the full registry.

#![allow(clippy::unwrap_used)]

use ip_network::Ipv4Network;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use uno_registry::{CellSpec, Registry, RegistryConfig, UserSpec};
use uvn_model::{
    CellId, DeploymentSettings, Email, LinkId, StrategyKind, UvnSettings, last_address,
};

fn op() -> Email {
    "op@example.com".parse().unwrap()
}

fn registry(strategy: StrategyKind) -> Registry {
    Registry::create(
        "u".parse().unwrap(),
        Some("registry.example".to_owned()),
        UserSpec {
            email: op(),
            display_name: "Operator".to_owned(),
            password: "hunter2".to_owned(),
        },
        UvnSettings {
            deployment: DeploymentSettings {
                strategy,
                static_edges: Vec::new(),
            },
            ..UvnSettings::default()
        },
    )
    .unwrap()
}

fn define_cells(registry: &mut Registry, publics: &[bool]) -> Vec<CellId> {
    publics
        .iter()
        .enumerate()
        .map(|(i, public)| {
            registry
                .define_cell(
                    &op(),
                    CellSpec {
                        name: format!("cell-{i}").parse().unwrap(),
                        address: public.then(|| format!("cell-{i}.example")),
                        allowed_lans: BTreeSet::new(),
                        owner: op(),
                    },
                )
                .unwrap()
        })
        .collect()
}

fn deploy(registry: &mut Registry) -> std::sync::Arc<RegistryConfig> {
    registry.redeploy(&op()).unwrap();

    registry.current_config().unwrap()
}

fn strategies() -> impl Strategy<Value = StrategyKind> {
    prop_oneof![
        Just(StrategyKind::Circular),
        Just(StrategyKind::Crossed),
        Just(StrategyKind::FullMesh),
        Just(StrategyKind::Random),
    ]
}

/// At least one public cell, at most twelve cells total.
fn cell_mix() -> impl Strategy<Value = Vec<bool>> {
    proptest::collection::vec(any::<bool>(), 1..12)
        .prop_map(|mut publics| {
            if !publics.contains(&true) {
                publics[0] = true;
            }

            publics
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Ids are handed out densely and every snapshot agrees on them.
    #[test]
    fn id_stability(publics in cell_mix(), excluded in proptest::collection::vec(any::<prop::sample::Index>(), 0..3)) {
        let mut registry = registry(StrategyKind::Crossed);
        let ids = define_cells(&mut registry, &publics);

        for (i, id) in ids.iter().enumerate() {
            prop_assert_eq!(*id, CellId::new(i as u32 + 1));
        }

        // Exclude a few cells (keeping at least one public) and make sure
        // snapshots keep every id stable.
        let first = deploy(&mut registry);

        let public_ids = ids
            .iter()
            .zip(&publics)
            .filter_map(|(id, public)| public.then_some(*id))
            .collect::<BTreeSet<_>>();
        for index in excluded {
            let id = *index.get(&ids);
            let remaining_publics = registry
                .cells()
                .filter(|c| !c.excluded && c.is_public() && c.id != id)
                .count();
            if public_ids.contains(&id) && remaining_publics == 0 {
                continue;
            }
            registry.exclude_cell(&op(), id).unwrap();
        }

        let second = deploy(&mut registry);

        let names_by_id = |snapshot: &RegistryConfig| {
            snapshot
                .body
                .cells
                .iter()
                .map(|c| (c.id, c.name.clone()))
                .collect::<BTreeMap<_, _>>()
        };
        let first_names = names_by_id(&first);
        for (id, name) in names_by_id(&second) {
            prop_assert_eq!(first_names.get(&id), Some(&name));
        }
    }

    /// Every link of every snapshot is reciprocal and shares one
    /// preshared key between its two endpoints.
    #[test]
    fn link_reciprocity(publics in cell_mix(), strategy in strategies()) {
        let mut registry = registry(strategy);
        define_cells(&mut registry, &publics);
        let snapshot = deploy(&mut registry);

        for link in snapshot.body.deployment.all_links() {
            prop_assert!(link.is_reciprocal(), "{} not reciprocal", link.id);

            let [a, b] = &link.endpoints;
            prop_assert_eq!(a.peer_public, b.public);
            prop_assert_eq!(b.peer_public, a.public);
            prop_assert_eq!(a.subnet, b.subnet);
            prop_assert_eq!(
                a.listen_port.is_some() as u8 + b.listen_port.is_some() as u8,
                1
            );
        }
    }

    /// Snapshot hashing commutes with serialization.
    #[test]
    fn snapshot_round_trips(publics in cell_mix(), strategy in strategies()) {
        let mut registry = registry(strategy);
        define_cells(&mut registry, &publics);
        let snapshot = deploy(&mut registry);

        let json = serde_json::to_string(&*snapshot).unwrap();
        let back: RegistryConfig = serde_json::from_str(&json).unwrap();

        prop_assert!(back.verify());
        prop_assert_eq!(&back.config_id, &snapshot.config_id);
    }

    /// The strategy degree contracts of §4.4, via the committed graph.
    #[test]
    fn strategy_contract(publics in cell_mix(), strategy in strategies()) {
        let mut registry = registry(strategy);
        let ids = define_cells(&mut registry, &publics);
        let snapshot = deploy(&mut registry);
        let graph = &snapshot.body.deployment.backbone;

        let public_ids = ids
            .iter()
            .zip(&publics)
            .filter_map(|(id, public)| public.then_some(*id))
            .collect::<BTreeSet<_>>();
        let k = public_ids.len();

        for id in &ids {
            let public_degree = graph
                .neighbours(*id)
                .intersection(&public_ids)
                .count();

            if public_ids.contains(id) {
                let range = match (strategy, k) {
                    (_, 1) => 0..=0,
                    (_, 2) => 1..=1,
                    (StrategyKind::Circular, _) => 2..=2,
                    (StrategyKind::Crossed, _) => 2..=3,
                    (StrategyKind::FullMesh, _) => (k - 1)..=(k - 1),
                    (StrategyKind::Random, _) => 2..=(k - 1),
                    (StrategyKind::Static, _) => unreachable!("not generated"),
                };
                prop_assert!(
                    range.contains(&public_degree),
                    "public {id} has degree {public_degree} outside {range:?} (k={k})"
                );
            } else {
                // Exactly one link, terminating at a public cell.
                prop_assert_eq!(graph.degree(*id), 1);
                let neighbours = graph.neighbours(*id);
                prop_assert!(neighbours.iter().all(|n| public_ids.contains(n)));
            }
        }
    }

    /// No two links share an address and nothing escapes its base.
    #[test]
    fn no_overlap(publics in cell_mix(), strategy in strategies()) {
        let mut registry = registry(strategy);
        define_cells(&mut registry, &publics);
        let snapshot = deploy(&mut registry);
        let settings = &snapshot.body.uvn.settings;

        let mut seen = BTreeMap::new();
        let mut check = |addr: Ipv4Addr, link: String, base: Ipv4Network| {
            assert!(
                within(base, addr),
                "{addr} of {link} escapes its base {base}"
            );
            // The registry's root-VPN hub address legitimately appears on
            // every root link; everything else must be unique.
            if addr == snapshot.body.plan.root_vpn().registry {
                return;
            }
            if let Some(previous) = seen.insert(addr, link.clone()) {
                panic!("{addr} assigned to both {previous} and {link}");
            }
        };

        for link in snapshot.body.deployment.backbone.links() {
            for endpoint in &link.endpoints {
                check(endpoint.local(), link.id.to_string(), settings.backbone);
            }
        }
        for link in snapshot.body.deployment.routing.values() {
            for endpoint in &link.endpoints {
                check(endpoint.local(), link.id.to_string(), settings.routing);
            }
        }
        for link in snapshot.body.deployment.root_vpn.values() {
            for endpoint in &link.endpoints {
                check(endpoint.local(), link.id.to_string(), settings.root_vpn);
            }
        }
        // Particle blocks: one address per particle per block, plus the
        // block's agent address.
        for (cell, block) in snapshot
            .body
            .cells
            .iter()
            .filter_map(|c| snapshot.body.plan.particle_block(c.id).map(|b| (c.id, b)))
        {
            check(block.agent, format!("particles/{cell}"), settings.particles_vpn);
            for (particle, addr) in &block.particles {
                check(
                    *addr,
                    format!("particle/{cell}-{particle}"),
                    settings.particles_vpn,
                );
            }
        }
    }
}

fn within(base: Ipv4Network, addr: Ipv4Addr) -> bool {
    u32::from(base.network_address()) <= u32::from(addr)
        && u32::from(addr) <= u32::from(last_address(base))
}

/// Deterministic rebuild: a registry restored from its dump redeploys to
/// the identical content address.
#[test]
fn dump_restore_is_content_stable() {
    let mut registry = registry(StrategyKind::Crossed);
    define_cells(&mut registry, &[true, true, false]);
    let snapshot = deploy(&mut registry);

    let mut restored = Registry::restore(registry.dump());
    let outcome = restored.redeploy(&op()).unwrap();

    assert_eq!(outcome.config_id(), &snapshot.config_id);
}

#[test]
fn excluding_the_last_public_cell_is_not_deployable() {
    let mut registry = registry(StrategyKind::Circular);
    let ids = define_cells(&mut registry, &[true, false]);
    deploy(&mut registry);

    registry.exclude_cell(&op(), ids[0]).unwrap();

    assert_eq!(
        registry.redeploy(&op()).unwrap_err(),
        uno_registry::Error::NotDeployable
    );
}

#[test]
fn link_id_kinds_sort_apart() {
    // LinkId orders backbone < root-vpn < routing < particle; the address
    // planner relies on kinds sorting apart.
    let backbone = LinkId::backbone(CellId::new(1), CellId::new(2), 0);
    let root = LinkId::RootVpn {
        cell: CellId::new(1),
    };

    assert!(backbone < root);
}
