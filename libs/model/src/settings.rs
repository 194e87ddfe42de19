use crate::Name;
use ip_network::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// The four reserved base networks every UVN carves its tunnels out of.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BaseNet {
    RootVpn,
    ParticlesVpn,
    Backbone,
    Routing,
}

/// Which deployment strategy shapes the backbone multigraph.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StrategyKind {
    Circular,
    #[default]
    Crossed,
    FullMesh,
    Static,
    Random,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSettings {
    pub strategy: StrategyKind,
    /// Explicit adjacency, only consulted by [`StrategyKind::Static`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_edges: Vec<(Name, Name)>,
}

/// Intervals handed to the agents and the routing daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub announce_interval: Duration,
    pub liveliness_lease: Duration,
    pub hello_interval: Duration,
    pub dead_interval: Duration,
    pub retransmit_interval: Duration,
}

/// A named timing preset, or explicit values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimingProfile {
    #[default]
    Default,
    Fast,
    Custom(Timing),
}

impl TimingProfile {
    pub fn timing(&self) -> Timing {
        match *self {
            TimingProfile::Default => Timing {
                announce_interval: Duration::from_secs(60),
                liveliness_lease: Duration::from_secs(120),
                hello_interval: Duration::from_secs(10),
                dead_interval: Duration::from_secs(40),
                retransmit_interval: Duration::from_secs(5),
            },
            TimingProfile::Fast => Timing {
                announce_interval: Duration::from_secs(5),
                liveliness_lease: Duration::from_secs(15),
                hello_interval: Duration::from_secs(1),
                dead_interval: Duration::from_secs(4),
                retransmit_interval: Duration::from_secs(2),
            },
            TimingProfile::Custom(timing) => timing,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{base} base {network} is outside RFC 1918 space")]
    BaseNotPrivate { base: BaseNet, network: Ipv4Network },
    #[error("{base} base {network} is larger than a /16")]
    BaseTooLarge { base: BaseNet, network: Ipv4Network },
    #[error("{a} and {b} base networks overlap")]
    BasesOverlap { a: BaseNet, b: BaseNet },
    #[error("listen ports are not pairwise distinct")]
    PortCollision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UvnSettings {
    pub root_vpn: Ipv4Network,
    pub particles_vpn: Ipv4Network,
    pub backbone: Ipv4Network,
    pub routing: Ipv4Network,

    pub root_vpn_port: u16,
    pub particles_port: u16,
    pub backbone_base_port: u16,
    pub routing_base_port: u16,

    pub mtu: u16,
    pub max_particles: u16,

    pub timing: TimingProfile,
    pub deployment: DeploymentSettings,
}

impl Default for UvnSettings {
    fn default() -> Self {
        Self {
            root_vpn: base(Ipv4Addr::new(10, 255, 128, 0), 22),
            particles_vpn: base(Ipv4Addr::new(10, 254, 0, 0), 16),
            backbone: base(Ipv4Addr::new(10, 255, 192, 0), 20),
            routing: base(Ipv4Addr::new(10, 255, 208, 0), 22),
            root_vpn_port: 63447,
            particles_port: 63448,
            backbone_base_port: 63550,
            routing_base_port: 63350,
            mtu: 1420,
            max_particles: 128,
            timing: TimingProfile::default(),
            deployment: DeploymentSettings::default(),
        }
    }
}

fn base(addr: Ipv4Addr, prefix: u8) -> Ipv4Network {
    Ipv4Network::new(addr, prefix).expect("hardcoded base network is valid")
}

impl UvnSettings {
    pub fn base(&self, which: BaseNet) -> Ipv4Network {
        match which {
            BaseNet::RootVpn => self.root_vpn,
            BaseNet::ParticlesVpn => self.particles_vpn,
            BaseNet::Backbone => self.backbone,
            BaseNet::Routing => self.routing,
        }
    }

    pub fn bases(&self) -> impl Iterator<Item = (BaseNet, Ipv4Network)> + '_ {
        use strum::IntoEnumIterator as _;

        BaseNet::iter().map(|which| (which, self.base(which)))
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        for (which, network) in self.bases() {
            if !network.network_address().is_private() || !last_address(network).is_private() {
                return Err(SettingsError::BaseNotPrivate {
                    base: which,
                    network,
                });
            }

            if network.netmask() < 16 {
                return Err(SettingsError::BaseTooLarge {
                    base: which,
                    network,
                });
            }
        }

        let bases = self.bases().collect::<Vec<_>>();
        for (i, &(a, a_net)) in bases.iter().enumerate() {
            for &(b, b_net) in &bases[i + 1..] {
                if networks_overlap(a_net, b_net) {
                    return Err(SettingsError::BasesOverlap { a, b });
                }
            }
        }

        let mut ports = [
            self.root_vpn_port,
            self.particles_port,
            self.backbone_base_port,
            self.routing_base_port,
        ];
        ports.sort_unstable();
        if ports.windows(2).any(|w| w[0] == w[1]) {
            return Err(SettingsError::PortCollision);
        }

        Ok(())
    }
}

/// The highest address covered by `network`.
pub fn last_address(network: Ipv4Network) -> Ipv4Addr {
    let size = 1u32 << (32 - network.netmask());

    Ipv4Addr::from(u32::from(network.network_address()) + (size - 1))
}

pub fn networks_overlap(a: Ipv4Network, b: Ipv4Network) -> bool {
    let a_start = u32::from(a.network_address());
    let a_end = u32::from(last_address(a));
    let b_start = u32::from(b.network_address());
    let b_end = u32::from(last_address(b));

    a_start <= b_end && b_start <= a_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn default_settings_are_valid() {
        UvnSettings::default().validate().unwrap();
    }

    #[test]
    fn default_bases_are_disjoint() {
        let settings = UvnSettings::default();
        let bases = settings.bases().collect::<Vec<_>>();

        for (i, &(_, a)) in bases.iter().enumerate() {
            for &(_, b) in &bases[i + 1..] {
                assert!(!networks_overlap(a, b), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn rejects_public_base() {
        let settings = UvnSettings {
            backbone: base(Ipv4Addr::new(8, 8, 0, 0), 16),
            ..UvnSettings::default()
        };

        assert_eq!(
            settings.validate(),
            Err(SettingsError::BaseNotPrivate {
                base: BaseNet::Backbone,
                network: base(Ipv4Addr::new(8, 8, 0, 0), 16),
            })
        );
    }

    #[test]
    fn rejects_oversized_base() {
        let settings = UvnSettings {
            particles_vpn: base(Ipv4Addr::new(10, 0, 0, 0), 8),
            ..UvnSettings::default()
        };

        assert!(matches!(
            settings.validate(),
            Err(SettingsError::BaseTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_overlapping_bases() {
        let settings = UvnSettings {
            routing: base(Ipv4Addr::new(10, 255, 192, 0), 24),
            ..UvnSettings::default()
        };

        assert_eq!(
            settings.validate(),
            Err(SettingsError::BasesOverlap {
                a: BaseNet::Backbone,
                b: BaseNet::Routing,
            })
        );
    }

    #[test_case("circular", StrategyKind::Circular)]
    #[test_case("crossed", StrategyKind::Crossed)]
    #[test_case("full-mesh", StrategyKind::FullMesh)]
    #[test_case("static", StrategyKind::Static)]
    #[test_case("random", StrategyKind::Random)]
    fn strategy_tags_round_trip(tag: &str, kind: StrategyKind) {
        assert_eq!(tag.parse::<StrategyKind>().unwrap(), kind);
        assert_eq!(kind.to_string(), tag);
    }

    #[test]
    fn fast_profile_is_tighter_than_default() {
        let default = TimingProfile::Default.timing();
        let fast = TimingProfile::Fast.timing();

        assert!(fast.announce_interval < default.announce_interval);
        assert!(fast.dead_interval < default.dead_interval);
    }

    #[test]
    fn settings_round_trip_through_json() {
        let settings = UvnSettings {
            timing: TimingProfile::Fast,
            deployment: DeploymentSettings {
                strategy: StrategyKind::Static,
                static_edges: vec![("a".parse().unwrap(), "b".parse().unwrap())],
            },
            ..UvnSettings::default()
        };

        let json = serde_json::to_string(&settings).unwrap();
        let back: UvnSettings = serde_json::from_str(&json).unwrap();

        assert_eq!(settings, back);
    }
}
