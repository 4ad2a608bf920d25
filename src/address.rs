use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::{self, COMMON_POOL_KEY, FEE_ACCUMULATOR_KEY};
use crate::errors::{CoreError, CoreResult};
use crate::types::PublicKey;

/// Addresses are 20 bytes long.
pub const ADDRESS_SIZE: usize = 20;

/// A staking account address, derived by hashing and truncating a public key.
///
/// The textual form is standard base64.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = crypto::hash_public_key(public_key);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&digest[..ADDRESS_SIZE]);
        Self(bytes)
    }

    pub fn from_bytes(data: &[u8]) -> CoreResult<Self> {
        let bytes: [u8; ADDRESS_SIZE] = data
            .try_into()
            .map_err(|_| CoreError::Crypto("malformed address".into()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }
}

/// The common pool sentinel used as an event source. Derived from a
/// blacklisted key, so it can never appear as a ledger owner.
pub fn common_pool_address() -> Address {
    static ADDRESS: OnceLock<Address> = OnceLock::new();
    *ADDRESS.get_or_init(|| Address::from_public_key(&COMMON_POOL_KEY))
}

/// The fee accumulator sentinel used as an event source.
pub fn fee_accumulator_address() -> Address {
    static ADDRESS: OnceLock<Address> = OnceLock::new();
    *ADDRESS.get_or_init(|| Address::from_public_key(&FEE_ACCUMULATOR_KEY))
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(self.0))
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64
            .decode(s)
            .map_err(|err| CoreError::Crypto(format!("invalid address encoding: {err}")))?;
        Address::from_bytes(&bytes)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_truncates_key_hash() {
        let pk = PublicKey([42u8; 32]);
        let addr = Address::from_public_key(&pk);
        let digest = crypto::hash_public_key(&pk);
        assert_eq!(addr.as_bytes()[..], digest[..ADDRESS_SIZE]);
    }

    #[test]
    fn text_round_trip() {
        let addr = Address::from_public_key(&PublicKey([9u8; 32]));
        let text = addr.to_string();
        let parsed: Address = text.parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn sentinel_addresses_are_distinct() {
        assert_ne!(common_pool_address(), fee_accumulator_address());
    }
}
