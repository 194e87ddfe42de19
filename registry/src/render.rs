use crate::snapshot::{ConfigId, RegistryConfig};
use crate::Error;
use ip_network::Ipv4Network;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::net::Ipv4Addr;
use uvn_deploy::{HostPort, IfaceAddr, Link};
use uvn_keystore::{KeyKind, KeyOwner, KeyStore};
use uvn_model::{CellId, InterfaceName, LinkId, Name, ParticleId, Side, Timing};

/// One tunnel endpoint with its key material resolved, as handed to the
/// datapath collaborator. Keys are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedEndpoint {
    pub interface: InterfaceName,
    pub addr: IfaceAddr,
    pub peer_addr: Ipv4Addr,
    pub listen_port: Option<u16>,
    pub peer_endpoint: Option<HostPort>,
    pub private_key: String,
    pub peer_public: String,
    pub preshared_key: String,
    pub mtu: u16,
    pub nat: bool,
}

/// The cell's own particle-VPN listener; a hub interface with one peer
/// per particle, so it has no single peer address of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticlesVpn {
    pub interface: InterfaceName,
    pub addr: IfaceAddr,
    pub listen_port: u16,
    pub private_key: String,
    pub mtu: u16,
}

/// A particle's derived view of its tunnel into this cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticleEndpoint {
    pub particle_id: ParticleId,
    pub particle_name: Name,
    pub endpoint: RenderedEndpoint,
}

/// What the routing daemon needs, protocol-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// The cell's root-VPN address; stable for the cell's lifetime.
    pub router_id: Ipv4Addr,
    pub interfaces: Vec<(InterfaceName, IfaceAddr)>,
    /// LAN prefixes this cell announces into the UVN.
    pub prefixes: Vec<Ipv4Network>,
    /// Router ids of the backbone neighbours.
    pub peers: Vec<Ipv4Addr>,
    pub timing: Timing,
}

/// Everything one agent needs to stand up its share of the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBundle {
    pub config_id: ConfigId,
    pub generation: u64,
    pub uvn_name: Name,
    pub cell_id: CellId,
    pub cell_name: Name,
    pub root_vpn: RenderedEndpoint,
    pub routing: RenderedEndpoint,
    pub particles_vpn: Option<ParticlesVpn>,
    pub particle_endpoints: Vec<ParticleEndpoint>,
    pub backbone_endpoints: Vec<RenderedEndpoint>,
    pub allowed_lans: Vec<Ipv4Network>,
    pub router: RouterConfig,
}

impl AgentBundle {
    /// Content digest for the idempotence hook: a consumer that already
    /// holds a bundle with this digest has nothing to do.
    pub fn digest(&self) -> String {
        let json = serde_json::to_vec(self).expect("bundles always serialize");

        hex::encode(sha2::Sha256::digest(&json))
    }
}

/// Renders the bundle of one cell from a committed snapshot.
///
/// Pure with respect to (snapshot, keystore): equal inputs render
/// byte-identical bundles.
pub(crate) fn render_bundle(
    snapshot: &RegistryConfig,
    keystore: &KeyStore,
    cell_id: CellId,
) -> Result<AgentBundle, Error> {
    let body = &snapshot.body;
    let cell = body
        .cells
        .iter()
        .find(|c| c.id == cell_id && !c.excluded)
        .ok_or_else(|| Error::NotFound(format!("cell {cell_id}")))?;

    let root_link = body
        .deployment
        .root_vpn
        .get(&cell_id)
        .ok_or_else(|| Error::NotFound(format!("root-VPN link of cell {cell_id}")))?;
    let routing_link = body
        .deployment
        .routing
        .get(&cell_id)
        .ok_or_else(|| Error::NotFound(format!("routing link of cell {cell_id}")))?;

    let root_vpn = render_endpoint(keystore, root_link, Side::B)?;
    let routing = render_endpoint(keystore, routing_link, Side::B)?;

    let backbone_endpoints = body
        .deployment
        .backbone
        .incident(cell_id)
        .map(|link| {
            let LinkId::Backbone { a, .. } = link.id else {
                return Err(Error::NotFound(format!("backbone link {}", link.id)));
            };
            let side = if a == cell_id { Side::A } else { Side::B };

            render_endpoint(keystore, link, side)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let particles_vpn = cell
        .is_public()
        .then(|| render_particles_vpn(keystore, body, cell_id))
        .transpose()?;

    let particle_endpoints = body
        .deployment
        .particles
        .get(&cell_id)
        .into_iter()
        .flat_map(|links| links.values())
        .map(|link| {
            let particle = match link.id {
                LinkId::Particle { particle, .. } => particle,
                LinkId::Backbone { .. } | LinkId::RootVpn { .. } | LinkId::Routing { .. } => {
                    return Err(Error::NotFound(format!("particle link {}", link.id)));
                }
            };
            let name = body
                .particles
                .iter()
                .find(|p| p.id == particle)
                .map(|p| p.name.clone())
                .ok_or_else(|| Error::NotFound(format!("particle {particle}")))?;

            Ok(ParticleEndpoint {
                particle_id: particle,
                particle_name: name,
                endpoint: render_endpoint(keystore, link, Side::B)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut interfaces = vec![
        (root_vpn.interface.clone(), root_vpn.addr),
        (routing.interface.clone(), routing.addr),
    ];
    if let Some(particles_vpn) = &particles_vpn {
        interfaces.push((particles_vpn.interface.clone(), particles_vpn.addr));
    }
    interfaces.extend(
        backbone_endpoints
            .iter()
            .map(|endpoint| (endpoint.interface.clone(), endpoint.addr)),
    );

    let peers = body
        .deployment
        .backbone
        .neighbours(cell_id)
        .into_iter()
        .filter_map(|neighbour| body.plan.root_vpn().cells.get(&neighbour).copied())
        .collect();

    let router = RouterConfig {
        router_id: root_vpn.addr.addr,
        interfaces,
        prefixes: cell.allowed_lans.iter().copied().collect(),
        peers,
        timing: body.uvn.settings.timing.timing(),
    };

    Ok(AgentBundle {
        config_id: snapshot.config_id.clone(),
        generation: snapshot.generation,
        uvn_name: body.uvn.name.clone(),
        cell_id,
        cell_name: cell.name.clone(),
        root_vpn,
        routing,
        particles_vpn,
        particle_endpoints,
        backbone_endpoints,
        allowed_lans: cell.allowed_lans.iter().copied().collect(),
        router,
    })
}

fn render_endpoint(
    keystore: &KeyStore,
    link: &Link,
    side: Side,
) -> Result<RenderedEndpoint, Error> {
    let endpoint = link.endpoint(side);
    let (kind, owner) = endpoint_key_owner(link.id, side);

    let private_key = keystore.secret(kind, owner)?.to_base64();
    let preshared_key = keystore.preshared(KeyOwner::Link(link.id))?.to_base64();

    Ok(RenderedEndpoint {
        interface: endpoint.interface.clone(),
        addr: endpoint.addr,
        peer_addr: endpoint.peer_addr,
        listen_port: endpoint.listen_port,
        peer_endpoint: endpoint.peer_endpoint.clone(),
        private_key,
        peer_public: endpoint.peer_public.to_base64(),
        preshared_key,
        mtu: endpoint.mtu,
        nat: endpoint.nat,
    })
}

/// Which keystore entry holds a given endpoint's private key.
///
/// Mirrors the link generator: hub and shared interfaces use owner-scoped
/// keys, everything else a per-link-end key.
fn endpoint_key_owner(link: LinkId, side: Side) -> (KeyKind, KeyOwner) {
    match (link, side) {
        (LinkId::RootVpn { .. }, Side::A) => (KeyKind::Wg, KeyOwner::Uvn),
        (LinkId::Particle { cell, .. }, Side::A) => (KeyKind::Wg, KeyOwner::Cell(cell)),
        (LinkId::Particle { particle, .. }, Side::B) => {
            (KeyKind::Identity, KeyOwner::Particle(particle))
        }
        (LinkId::Backbone { .. } | LinkId::RootVpn { .. } | LinkId::Routing { .. }, side) => {
            (KeyKind::Wg, KeyOwner::LinkEnd { link, side })
        }
    }
}

fn render_particles_vpn(
    keystore: &KeyStore,
    body: &crate::snapshot::ConfigBody,
    cell_id: CellId,
) -> Result<ParticlesVpn, Error> {
    let block = body
        .plan
        .particle_block(cell_id)
        .ok_or_else(|| Error::NotFound(format!("particle block of cell {cell_id}")))?;

    Ok(ParticlesVpn {
        interface: "uwg-p0".parse().expect("fixed interface name is short"),
        addr: IfaceAddr::new(block.agent, block.subnet.netmask()),
        listen_port: body.uvn.settings.particles_port,
        private_key: keystore
            .secret(KeyKind::Wg, KeyOwner::Cell(cell_id))?
            .to_base64(),
        mtu: body.uvn.settings.mtu,
    })
}
