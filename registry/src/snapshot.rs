use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::fmt;
use uvn_deploy::Deployment;
use uvn_keystore::Fingerprint;
use uvn_model::{Cell, Particle, Uvn};
use uvn_netplan::AddressPlan;

/// Content address of a snapshot: 64 hex characters of sha256 over the
/// canonical JSON serialization of the snapshot body.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigId(String);

impl ConfigId {
    fn of(body: &ConfigBody) -> Self {
        let json = serde_json::to_vec(body).expect("snapshot body always serializes");

        Self(hex::encode(sha2::Sha256::digest(&json)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigId({})", &self.0[..8.min(self.0.len())])
    }
}

/// Everything the content hash covers.
///
/// Maps are ordered and struct field order is fixed, so serialization is
/// canonical: equal bodies hash equally, and a body round-tripped through
/// JSON hashes to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBody {
    pub uvn: Uvn,
    pub cells: Vec<Cell>,
    pub particles: Vec<Particle>,
    pub plan: AddressPlan,
    pub deployment: Deployment,
    /// Live key fingerprints by `kind/owner`; a rotation changes the hash
    /// without private material ever entering the snapshot.
    pub fingerprints: std::collections::BTreeMap<String, Fingerprint>,
}

/// An immutable, content-addressed view of the whole control plane at one
/// point in time.
///
/// `generation` is the commit counter, assigned when the snapshot is
/// accepted; it is deliberately outside the hashed body so that re-running
/// a deployment over unchanged inputs is recognisable as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub config_id: ConfigId,
    pub generation: u64,
    pub body: ConfigBody,
}

impl RegistryConfig {
    pub fn new(generation: u64, body: ConfigBody) -> Self {
        Self {
            config_id: ConfigId::of(&body),
            generation,
            body,
        }
    }

    /// Recomputes the content address; disagreement means the snapshot
    /// was tampered with or corrupted in storage.
    pub fn verify(&self) -> bool {
        ConfigId::of(&self.body) == self.config_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uvn_keystore::KeyStore;
    use uvn_model::{Name, UvnSettings};

    fn body() -> ConfigBody {
        let uvn = Uvn {
            name: "lab".parse::<Name>().unwrap(),
            address: Some("registry.example".to_owned()),
            owner: "op@example.com".parse().unwrap(),
            settings: UvnSettings::default(),
        };
        let cells = vec![Cell {
            id: uvn_model::CellId::new(1),
            name: "a".parse().unwrap(),
            address: Some("a.example".to_owned()),
            allowed_lans: Default::default(),
            excluded: false,
            owner: "op@example.com".parse().unwrap(),
        }];
        let plan =
            AddressPlan::compute(&uvn.settings, &cells, &[], &[]).unwrap();
        let (plan2, deployment) =
            Deployment::build(&uvn, &cells, &[], &mut KeyStore::new()).unwrap();
        assert_eq!(plan, plan2);

        ConfigBody {
            uvn,
            cells,
            particles: Vec::new(),
            plan,
            deployment,
            fingerprints: BTreeMap::new(),
        }
    }

    #[test]
    fn config_id_survives_a_serde_round_trip() {
        let snapshot = RegistryConfig::new(1, body());

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: RegistryConfig = serde_json::from_str(&json).unwrap();

        assert!(back.verify());
        assert_eq!(snapshot.config_id, back.config_id);
    }

    #[test]
    fn generation_does_not_affect_the_content_hash() {
        let body = body();

        assert_eq!(
            RegistryConfig::new(1, body.clone()).config_id,
            RegistryConfig::new(2, body).config_id
        );
    }

    #[test]
    fn tampering_is_detectable() {
        let mut snapshot = RegistryConfig::new(1, body());
        snapshot.body.cells[0].excluded = true;

        assert!(!snapshot.verify());
    }
}
