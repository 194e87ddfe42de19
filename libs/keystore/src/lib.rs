//! The UVN key authority.
//!
//! Issues and rotates every key the control plane hands to its agents:
//! x25519 identity keys (UVN, cells, particles, the root of trust), fresh
//! x25519 keys per tunnel endpoint, and 32-byte preshared keys per tunnel.
//!
//! Rows are append-only. A key is never mutated in place: rotation marks
//! the current row `dropped` and appends a successor, so the sequence of
//! dropped rows is the full rotation history. At most one non-dropped row
//! exists per `(kind, owner)`.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod material;

pub use material::{Fingerprint, PresharedKey, SecretKey, WgPublicKey};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;
use uvn_model::{CellId, LinkId, ParticleId, Side};

/// Stable identity of a logical key, constant across persistence but not
/// across rotation (a successor gets a fresh id).
#[derive(Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KeyId(Uuid);

impl KeyId {
    pub(crate) fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyKind {
    /// Long-lived identity of the UVN, a cell or a particle.
    Identity,
    /// The root-of-trust keypair; certificate issuance happens elsewhere.
    Ca,
    /// Per-tunnel-endpoint key.
    Wg,
    /// Per-tunnel symmetric key.
    Preshared,
}

impl KeyKind {
    pub fn is_symmetric(self) -> bool {
        matches!(self, KeyKind::Preshared)
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            KeyKind::Identity => "identity",
            KeyKind::Ca => "ca",
            KeyKind::Wg => "wg",
            KeyKind::Preshared => "preshared",
        };

        f.write_str(tag)
    }
}

/// What a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOwner {
    Uvn,
    Cell(CellId),
    Particle(ParticleId),
    /// One end of a tunnel; dies with the link.
    LinkEnd { link: LinkId, side: Side },
    /// The tunnel itself (preshared material).
    Link(LinkId),
}

impl KeyOwner {
    /// The link this key is tied to, if it is per-link material.
    pub fn link(&self) -> Option<LinkId> {
        match *self {
            KeyOwner::LinkEnd { link, .. } | KeyOwner::Link(link) => Some(link),
            KeyOwner::Uvn | KeyOwner::Cell(_) | KeyOwner::Particle(_) => None,
        }
    }
}

impl fmt::Display for KeyOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            KeyOwner::Uvn => f.write_str("uvn"),
            KeyOwner::Cell(id) => write!(f, "cell/{id}"),
            KeyOwner::Particle(id) => write!(f, "particle/{id}"),
            KeyOwner::LinkEnd { link, side } => write!(f, "{link}/{side:?}"),
            KeyOwner::Link(link) => write!(f, "{link}"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("a live {kind} key already exists for {owner}")]
    Exists { kind: KeyKind, owner: KeyOwner },
    #[error("no live {kind} key for {owner}")]
    Missing { kind: KeyKind, owner: KeyOwner },
}

/// One asymmetric row. `dropped` rows are history, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsymmetricKey {
    pub row_id: u64,
    pub key_id: KeyId,
    pub kind: KeyKind,
    pub owner: KeyOwner,
    pub created_at: DateTime<Utc>,
    pub dropped: bool,
    secret: SecretKey,
    public: WgPublicKey,
}

impl AsymmetricKey {
    pub fn public(&self) -> WgPublicKey {
        self.public
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.public.fingerprint()
    }
}

/// One symmetric row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymmetricKey {
    pub row_id: u64,
    pub key_id: KeyId,
    pub owner: KeyOwner,
    pub created_at: DateTime<Utc>,
    pub dropped: bool,
    material: PresharedKey,
}

impl SymmetricKey {
    pub fn material(&self) -> &PresharedKey {
        &self.material
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.material.fingerprint()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyStore {
    asymmetric: Vec<AsymmetricKey>,
    symmetric: Vec<SymmetricKey>,
    next_row: u64,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates and stores a fresh key.
    ///
    /// Fails with [`Error::Exists`] if a live key is already present for
    /// `(kind, owner)`; rotation is explicit, never implicit.
    pub fn issue(&mut self, kind: KeyKind, owner: KeyOwner) -> Result<KeyId, Error> {
        if self.find_active(kind, owner).is_some() {
            return Err(Error::Exists { kind, owner });
        }

        Ok(self.append(kind, owner))
    }

    /// Issues a key unless a live one already exists; either way returns
    /// the live key's id. This is what lets link keys survive redeploys.
    pub fn ensure(&mut self, kind: KeyKind, owner: KeyOwner) -> KeyId {
        match self.find_active(kind, owner) {
            Some(key_id) => key_id,
            None => self.append(kind, owner),
        }
    }

    /// Drops the live key and issues a successor atomically.
    pub fn rotate(&mut self, kind: KeyKind, owner: KeyOwner) -> Result<KeyId, Error> {
        self.drop_key(kind, owner)?;

        Ok(self.append(kind, owner))
    }

    /// Marks the live key dropped without a successor. Used when a link
    /// vanishes from the deployment graph.
    pub fn drop_key(&mut self, kind: KeyKind, owner: KeyOwner) -> Result<(), Error> {
        if kind.is_symmetric() {
            let row = self
                .symmetric
                .iter_mut()
                .find(|row| !row.dropped && row.owner == owner)
                .ok_or(Error::Missing { kind, owner })?;
            row.dropped = true;
        } else {
            let row = self
                .asymmetric
                .iter_mut()
                .find(|row| !row.dropped && row.kind == kind && row.owner == owner)
                .ok_or(Error::Missing { kind, owner })?;
            row.dropped = true;
        }

        tracing::debug!(%kind, %owner, "dropped key");

        Ok(())
    }

    /// Drops every per-link key whose link is not in `live`.
    pub fn retain_link_keys(&mut self, live: &BTreeSet<LinkId>) -> usize {
        let mut dropped = 0;

        for row in self.asymmetric.iter_mut().filter(|row| !row.dropped) {
            if matches!(row.owner.link(), Some(link) if !live.contains(&link)) {
                row.dropped = true;
                dropped += 1;
            }
        }
        for row in self.symmetric.iter_mut().filter(|row| !row.dropped) {
            if matches!(row.owner.link(), Some(link) if !live.contains(&link)) {
                row.dropped = true;
                dropped += 1;
            }
        }

        if dropped > 0 {
            tracing::debug!(dropped, "retired keys of removed links");
        }

        dropped
    }

    pub fn public(&self, kind: KeyKind, owner: KeyOwner) -> Result<WgPublicKey, Error> {
        self.active_asymmetric(kind, owner).map(|row| row.public)
    }

    /// Private material. Access control is the registry's job; everything
    /// in this crate trusts its caller.
    pub fn secret(&self, kind: KeyKind, owner: KeyOwner) -> Result<&SecretKey, Error> {
        self.active_asymmetric(kind, owner).map(|row| &row.secret)
    }

    pub fn preshared(&self, owner: KeyOwner) -> Result<&PresharedKey, Error> {
        self.active_symmetric(owner).map(|row| &row.material)
    }

    pub fn fingerprint(&self, kind: KeyKind, owner: KeyOwner) -> Result<Fingerprint, Error> {
        if kind.is_symmetric() {
            self.active_symmetric(owner).map(|row| row.fingerprint())
        } else {
            self.active_asymmetric(kind, owner)
                .map(|row| row.fingerprint())
        }
    }

    /// Fingerprints of all live keys, keyed by `kind/owner`. Snapshots
    /// embed this map so a rotation is visible in the content hash.
    pub fn fingerprints(&self) -> std::collections::BTreeMap<String, Fingerprint> {
        let asymmetric = self
            .asymmetric
            .iter()
            .filter(|row| !row.dropped)
            .map(|row| (format!("{}/{}", row.kind, row.owner), row.fingerprint()));
        let symmetric = self
            .symmetric
            .iter()
            .filter(|row| !row.dropped)
            .map(|row| (format!("{}/{}", KeyKind::Preshared, row.owner), row.fingerprint()));

        asymmetric.chain(symmetric).collect()
    }

    /// All asymmetric rows, dropped history included.
    pub fn asymmetric_rows(&self) -> impl Iterator<Item = &AsymmetricKey> {
        self.asymmetric.iter()
    }

    /// All symmetric rows, dropped history included.
    pub fn symmetric_rows(&self) -> impl Iterator<Item = &SymmetricKey> {
        self.symmetric.iter()
    }

    fn append(&mut self, kind: KeyKind, owner: KeyOwner) -> KeyId {
        let key_id = KeyId::random();
        let row_id = self.next_row;
        self.next_row += 1;
        let created_at = self.monotonic_now(owner);

        if kind.is_symmetric() {
            self.symmetric.push(SymmetricKey {
                row_id,
                key_id,
                owner,
                created_at,
                dropped: false,
                material: PresharedKey::generate(),
            });
        } else {
            let secret = SecretKey::generate();
            let public = secret.public();
            self.asymmetric.push(AsymmetricKey {
                row_id,
                key_id,
                kind,
                owner,
                created_at,
                dropped: false,
                secret,
                public,
            });
        }

        tracing::debug!(%kind, %owner, %key_id, "issued key");

        key_id
    }

    /// Issuance must be monotonic in `created_at` per owner, even if the
    /// wall clock steps backwards between calls.
    fn monotonic_now(&self, owner: KeyOwner) -> DateTime<Utc> {
        let previous = self
            .asymmetric
            .iter()
            .filter(|row| row.owner == owner)
            .map(|row| row.created_at)
            .chain(
                self.symmetric
                    .iter()
                    .filter(|row| row.owner == owner)
                    .map(|row| row.created_at),
            )
            .max();

        match previous {
            Some(previous) => Utc::now().max(previous),
            None => Utc::now(),
        }
    }

    fn find_active(&self, kind: KeyKind, owner: KeyOwner) -> Option<KeyId> {
        if kind.is_symmetric() {
            self.symmetric
                .iter()
                .find(|row| !row.dropped && row.owner == owner)
                .map(|row| row.key_id)
        } else {
            self.asymmetric
                .iter()
                .find(|row| !row.dropped && row.kind == kind && row.owner == owner)
                .map(|row| row.key_id)
        }
    }

    fn active_asymmetric(&self, kind: KeyKind, owner: KeyOwner) -> Result<&AsymmetricKey, Error> {
        debug_assert!(!kind.is_symmetric());

        self.asymmetric
            .iter()
            .find(|row| !row.dropped && row.kind == kind && row.owner == owner)
            .ok_or(Error::Missing { kind, owner })
    }

    fn active_symmetric(&self, owner: KeyOwner) -> Result<&SymmetricKey, Error> {
        self.symmetric
            .iter()
            .find(|row| !row.dropped && row.owner == owner)
            .ok_or(Error::Missing {
                kind: KeyKind::Preshared,
                owner,
            })
    }
}
