use super::{hash_parts, Hash};
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::{
    convert::TryInto,
    fmt::{Debug, Display, Error, Formatter},
    str::FromStr,
};

pub const PUBLIC_KEY_SIZE: usize = 33;
pub const SECRET_KEY_SIZE: usize = 32;

// Compressed-point shaped identity. The simulated network never signs anything,
// so the key is only a stable, unique node identifier.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub const fn new(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        PublicKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// On-chain wallet address owned by this key.
    pub fn address(&self) -> Hash {
        hash_parts(&[b"p2wkh", &self.0])
    }
}

impl FromStr for PublicKey {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| "Invalid public key")?;
        Ok(PublicKey::new(bytes))
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", &self.to_hex())
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        // Short form keeps harness dumps readable
        write!(f, "PublicKey({}..)", &self.to_hex()[..16])
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        PublicKey::from_str(&hex).map_err(SerdeError::custom)
    }
}

#[derive(Clone)]
pub struct KeyPair {
    secret: [u8; SECRET_KEY_SIZE],
    public: PublicKey,
}

impl KeyPair {
    pub fn from_secret(secret: [u8; SECRET_KEY_SIZE]) -> Self {
        let digest = hash_parts(&[b"pubkey", &secret]);
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        bytes[0] = 0x02;
        bytes[1..].copy_from_slice(digest.as_bytes());

        Self {
            secret,
            public: PublicKey(bytes),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        &self.secret
    }
}

impl Debug for KeyPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_is_deterministic() {
        let a = KeyPair::from_secret([1u8; SECRET_KEY_SIZE]);
        let b = KeyPair::from_secret([1u8; SECRET_KEY_SIZE]);
        let c = KeyPair::from_secret([2u8; SECRET_KEY_SIZE]);

        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
        assert_eq!(a.public_key().as_bytes()[0], 0x02);
    }

    #[test]
    fn test_address_differs_per_key() {
        let a = KeyPair::from_secret([1u8; SECRET_KEY_SIZE]);
        let c = KeyPair::from_secret([2u8; SECRET_KEY_SIZE]);
        assert_ne!(a.public_key().address(), c.public_key().address());
    }

    #[test]
    fn test_public_key_parse() {
        let key = *KeyPair::from_secret([9u8; SECRET_KEY_SIZE]).public_key();
        let parsed: PublicKey = key.to_hex().parse().unwrap();
        assert_eq!(parsed, key);
        assert!("02".parse::<PublicKey>().is_err());
    }
}
