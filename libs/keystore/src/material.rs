use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use boringtun::x25519::{PublicKey, StaticSecret};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::fmt;

/// An x25519 private key. Never printed, serialized base64 for the
/// persistence collaborator and the agent bundles.
#[derive(Clone)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::rngs::OsRng))
    }

    pub fn public(&self) -> WgPublicKey {
        WgPublicKey(PublicKey::from(&self.0))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0.to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl Serialize for SecretKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = decode_key::<D>(&String::deserialize(deserializer)?)?;

        Ok(Self(StaticSecret::from(bytes)))
    }
}

/// The public half of an x25519 keypair.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WgPublicKey(PublicKey);

impl WgPublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0.as_bytes())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.0.as_bytes())
    }
}

impl fmt::Display for WgPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for WgPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WgPublicKey({self})")
    }
}

impl Serialize for WgPublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for WgPublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = decode_key::<D>(&String::deserialize(deserializer)?)?;

        Ok(Self(PublicKey::from(bytes)))
    }
}

/// A 32-byte preshared key shared by the two ends of one tunnel.
#[derive(Clone, PartialEq, Eq)]
pub struct PresharedKey([u8; 32]);

impl PresharedKey {
    pub fn generate() -> Self {
        use rand::RngCore as _;

        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);

        Self(bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.0)
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresharedKey(..)")
    }
}

impl Serialize for PresharedKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PresharedKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self(decode_key::<D>(&String::deserialize(deserializer)?)?))
    }
}

fn decode_key<'de, D>(s: &str) -> Result<[u8; 32], D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;

    let bytes = BASE64.decode(s).map_err(D::Error::custom)?;

    <[u8; 32]>::try_from(bytes).map_err(|_| D::Error::custom("key material must be 32 bytes"))
}

/// sha256 over 32 bytes of (public or symmetric) key material, rendered as
/// 64 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(material: &[u8]) -> Self {
        Self(sha2::Sha256::digest(material).into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;

        <[u8; 32]>::try_from(bytes)
            .map(Self)
            .map_err(|_| D::Error::custom("fingerprint must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_round_trips_through_base64() {
        let secret = SecretKey::generate();
        let public = secret.public();

        let json = serde_json::to_string(&public).unwrap();
        let back: WgPublicKey = serde_json::from_str(&json).unwrap();

        assert_eq!(public, back);
    }

    #[test]
    fn fingerprint_is_stable() {
        let key = PresharedKey::generate();

        assert_eq!(key.fingerprint(), key.fingerprint());
        assert_eq!(key.fingerprint().to_string().len(), 64);
    }

    #[test]
    fn secrets_do_not_leak_through_debug() {
        let secret = SecretKey::generate();

        assert_eq!(format!("{secret:?}"), "SecretKey(..)");
        assert_eq!(format!("{:?}", PresharedKey::generate()), "PresharedKey(..)");
    }
}
