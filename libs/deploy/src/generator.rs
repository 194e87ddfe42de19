use crate::endpoint::{HostPort, IfaceAddr, Link, LinkEndpoint};
use std::net::Ipv4Addr;
use uvn_keystore::{KeyId, KeyKind, KeyOwner, KeyStore, WgPublicKey};
use uvn_model::{Cell, InterfaceName, LinkId, Particle, Side, Uvn, UvnSettings};
use uvn_netplan::AddressPlan;

/// Builds the endpoint pair for every kind of tunnel.
///
/// All four link kinds share the same construction: reciprocal addresses
/// out of the plan, a listener side and a dialling side, per-link key
/// material ensured in the keystore. Only the listener-role rule differs:
/// the public (or smaller-id) cell for backbone links, the registry for
/// root-VPN and routing links, the cell agent for particle links.
pub(crate) struct LinkGenerator<'a> {
    pub uvn: &'a Uvn,
    pub plan: &'a AddressPlan,
}

struct EndpointSpec {
    interface: InterfaceName,
    addr: IfaceAddr,
    peer_addr: Ipv4Addr,
    listen_port: Option<u16>,
    peer_endpoint: Option<HostPort>,
    nat: bool,
}

impl LinkGenerator<'_> {
    fn settings(&self) -> &UvnSettings {
        &self.uvn.settings
    }

    pub(crate) fn backbone_link(
        &self,
        keystore: &mut KeyStore,
        a: &Cell,
        b: &Cell,
        id: LinkId,
        interface_a: InterfaceName,
        interface_b: InterfaceName,
    ) -> Link {
        debug_assert!(a.id < b.id, "backbone endpoint order is fixed by the id");

        let slot = self
            .plan
            .backbone_slot(&id)
            .expect("plan covers every strategy link");
        let prefix = slot.subnet.netmask();

        // The cell with the smaller id is side A and holds the lower
        // address. It also listens whenever it can.
        let listener = if a.is_public() { Side::A } else { Side::B };
        let listener_host = match listener {
            Side::A => a.address.as_deref(),
            Side::B => b.address.as_deref(),
        }
        .expect("listener side is a public cell")
        .to_owned();

        let spec_a = EndpointSpec {
            interface: interface_a,
            addr: IfaceAddr::new(slot.lower, prefix),
            peer_addr: slot.upper,
            listen_port: (listener == Side::A).then_some(slot.port),
            peer_endpoint: (listener == Side::B).then(|| HostPort {
                host: listener_host.clone(),
                port: slot.port,
            }),
            nat: !a.is_public(),
        };
        let spec_b = EndpointSpec {
            interface: interface_b,
            addr: IfaceAddr::new(slot.upper, prefix),
            peer_addr: slot.lower,
            listen_port: (listener == Side::B).then_some(slot.port),
            peer_endpoint: (listener == Side::A).then(|| HostPort {
                host: listener_host,
                port: slot.port,
            }),
            nat: !b.is_public(),
        };

        let key_a = link_end_key(keystore, id, Side::A);
        let key_b = link_end_key(keystore, id, Side::B);

        self.assemble(keystore, id, spec_a, key_a, spec_b, key_b)
    }

    /// Hub-and-spoke: the registry listens on its fixed port, every cell
    /// dials the UVN address.
    pub(crate) fn root_vpn_link(&self, keystore: &mut KeyStore, cell: &Cell) -> Link {
        let id = LinkId::RootVpn { cell: cell.id };
        let root = self.plan.root_vpn();
        let prefix = root.subnet.netmask();
        let cell_addr = root.cells[&cell.id];
        let port = self.settings().root_vpn_port;

        let spec_registry = EndpointSpec {
            interface: iface("uwg-v0"),
            addr: IfaceAddr::new(root.registry, prefix),
            peer_addr: cell_addr,
            listen_port: Some(port),
            peer_endpoint: None,
            nat: false,
        };
        let spec_cell = EndpointSpec {
            interface: iface("uwg-v0"),
            addr: IfaceAddr::new(cell_addr, prefix),
            peer_addr: root.registry,
            listen_port: None,
            peer_endpoint: self.uvn.address.as_ref().map(|host| HostPort {
                host: host.clone(),
                port,
            }),
            nat: !cell.is_public(),
        };

        // One hub interface, one key: every root-VPN link shares the
        // registry's keypair.
        let key_registry = owned_key(keystore, KeyKind::Wg, KeyOwner::Uvn);
        let key_cell = link_end_key(keystore, id, Side::B);

        self.assemble(keystore, id, spec_registry, key_registry, spec_cell, key_cell)
    }

    /// The fallback registry↔cell path over its own /31.
    pub(crate) fn routing_link(&self, keystore: &mut KeyStore, cell: &Cell) -> Link {
        let id = LinkId::Routing { cell: cell.id };
        let slot = self
            .plan
            .routing_slot(cell.id)
            .expect("plan covers every non-excluded cell");
        let prefix = slot.subnet.netmask();

        let spec_registry = EndpointSpec {
            interface: iface(&format!("uwg-r{}", cell.id)),
            addr: IfaceAddr::new(slot.registry, prefix),
            peer_addr: slot.cell,
            listen_port: Some(slot.port),
            peer_endpoint: None,
            nat: false,
        };
        let spec_cell = EndpointSpec {
            interface: iface("uwg-r0"),
            addr: IfaceAddr::new(slot.cell, prefix),
            peer_addr: slot.registry,
            listen_port: None,
            peer_endpoint: self.uvn.address.as_ref().map(|host| HostPort {
                host: host.clone(),
                port: slot.port,
            }),
            nat: !cell.is_public(),
        };

        let key_registry = link_end_key(keystore, id, Side::A);
        let key_cell = link_end_key(keystore, id, Side::B);

        self.assemble(keystore, id, spec_registry, key_registry, spec_cell, key_cell)
    }

    /// A particle's way into the UVN through one public cell.
    pub(crate) fn particle_link(
        &self,
        keystore: &mut KeyStore,
        cell: &Cell,
        particle: &Particle,
    ) -> Link {
        let id = LinkId::Particle {
            cell: cell.id,
            particle: particle.id,
        };
        let block = self
            .plan
            .particle_block(cell.id)
            .expect("every public cell has a particle block");
        let prefix = block.subnet.netmask();
        let particle_addr = block.particles[&particle.id];
        let port = self.settings().particles_port;
        let host = cell
            .address
            .as_deref()
            .expect("particle links terminate at public cells")
            .to_owned();

        let spec_cell = EndpointSpec {
            interface: iface("uwg-p0"),
            addr: IfaceAddr::new(block.agent, prefix),
            peer_addr: particle_addr,
            listen_port: Some(port),
            peer_endpoint: None,
            nat: false,
        };
        let spec_particle = EndpointSpec {
            interface: iface("uwg-p0"),
            addr: IfaceAddr::new(particle_addr, prefix),
            peer_addr: block.agent,
            listen_port: None,
            peer_endpoint: Some(HostPort { host, port }),
            // Particles roam; assume the worst.
            nat: true,
        };

        // One particle-VPN interface per cell, one identity per particle,
        // shared across every cell the particle may connect through.
        let key_cell = owned_key(keystore, KeyKind::Wg, KeyOwner::Cell(cell.id));
        let key_particle = owned_key(keystore, KeyKind::Identity, KeyOwner::Particle(particle.id));

        self.assemble(keystore, id, spec_cell, key_cell, spec_particle, key_particle)
    }

    fn assemble(
        &self,
        keystore: &mut KeyStore,
        id: LinkId,
        spec_a: EndpointSpec,
        key_a: (KeyId, WgPublicKey),
        spec_b: EndpointSpec,
        key_b: (KeyId, WgPublicKey),
    ) -> Link {
        let preshared = keystore.ensure(KeyKind::Preshared, KeyOwner::Link(id));
        let preshared_fingerprint = keystore
            .fingerprint(KeyKind::Preshared, KeyOwner::Link(id))
            .expect("preshared key was just ensured");

        let subnet = match id {
            LinkId::RootVpn { .. } => self.plan.root_vpn().subnet,
            LinkId::Routing { cell } => {
                self.plan
                    .routing_slot(cell)
                    .expect("plan covers every non-excluded cell")
                    .subnet
            }
            LinkId::Backbone { .. } => {
                self.plan
                    .backbone_slot(&id)
                    .expect("plan covers every strategy link")
                    .subnet
            }
            LinkId::Particle { cell, .. } => {
                self.plan
                    .particle_block(cell)
                    .expect("every public cell has a particle block")
                    .subnet
            }
        };

        let mtu = self.settings().mtu;
        let build = |spec: EndpointSpec, key: (KeyId, WgPublicKey), peer: WgPublicKey| {
            LinkEndpoint {
                interface: spec.interface,
                addr: spec.addr,
                peer_addr: spec.peer_addr,
                listen_port: spec.listen_port,
                peer_endpoint: spec.peer_endpoint,
                key: key.0,
                public: key.1,
                peer_public: peer,
                mtu,
                nat: spec.nat,
                subnet,
            }
        };

        Link {
            id,
            preshared,
            preshared_fingerprint,
            endpoints: [
                build(spec_a, key_a, key_b.1),
                build(spec_b, key_b, key_a.1),
            ],
        }
    }
}

fn link_end_key(keystore: &mut KeyStore, link: LinkId, side: Side) -> (KeyId, WgPublicKey) {
    owned_key(keystore, KeyKind::Wg, KeyOwner::LinkEnd { link, side })
}

fn owned_key(keystore: &mut KeyStore, kind: KeyKind, owner: KeyOwner) -> (KeyId, WgPublicKey) {
    let key = keystore.ensure(kind, owner);
    let public = keystore.public(kind, owner).expect("key was just ensured");

    (key, public)
}

fn iface(name: &str) -> InterfaceName {
    name.parse().expect("generated interface names are short")
}
