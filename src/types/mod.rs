pub mod committee;
pub mod registry;
pub mod staking;
pub mod transaction;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{CoreError, CoreResult};

/// A 32-byte public key used as an opaque node or entity identifier.
///
/// Identifier keys are never interpreted as curve points by the core; only
/// transaction signature verification touches the underlying curve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(data: &[u8]) -> CoreResult<Self> {
        let bytes: [u8; 32] = data
            .try_into()
            .map_err(|_| CoreError::Crypto("malformed public key".into()))?;
        Ok(Self(bytes))
    }

    pub fn from_hex(data: &str) -> CoreResult<Self> {
        let bytes = hex::decode(data)
            .map_err(|err| CoreError::Crypto(format!("invalid public key encoding: {err}")))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PublicKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PublicKey::from_hex(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        PublicKey::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// A 32-byte runtime identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeId(pub [u8; 32]);

impl RuntimeId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(data: &str) -> CoreResult<Self> {
        let bytes = hex::decode(data)
            .map_err(|err| CoreError::Crypto(format!("invalid runtime id encoding: {err}")))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::Crypto("malformed runtime id".into()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for RuntimeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for RuntimeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        RuntimeId::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// Epochs are opaque monotonic counters supplied by the epoch-time subsystem.
pub type EpochTime = u64;
