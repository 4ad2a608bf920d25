use std::collections::BTreeMap;

use ed25519_dalek::Keypair;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::crypto::{self, TX_SIGNATURE_CONTEXT};
use crate::errors::{CoreError, CoreResult};
use crate::quantity::Quantity;
use crate::types::PublicKey;

pub const METHOD_TRANSFER: &str = "staking.Transfer";
pub const METHOD_BURN: &str = "staking.Burn";
pub const METHOD_ADD_ESCROW: &str = "staking.AddEscrow";
pub const METHOD_RECLAIM_ESCROW: &str = "staking.ReclaimEscrow";
pub const METHOD_AMEND_COMMISSION_SCHEDULE: &str = "staking.AmendCommissionSchedule";

/// Gas cost table, keyed by operation identifier.
pub type GasCosts = BTreeMap<String, u64>;

pub const GAS_OP_TX_BYTE: &str = "tx_byte";
pub const GAS_OP_TRANSFER: &str = "transfer";
pub const GAS_OP_BURN: &str = "burn";
pub const GAS_OP_ADD_ESCROW: &str = "add_escrow";
pub const GAS_OP_RECLAIM_ESCROW: &str = "reclaim_escrow";
pub const GAS_OP_AMEND_COMMISSION_SCHEDULE: &str = "amend_commission_schedule";

/// Transaction fee and gas limit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    #[serde(default)]
    pub amount: Quantity,
    #[serde(default)]
    pub gas: u64,
}

/// An unsigned consensus transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    pub fee: Fee,
    pub method: String,
    pub body: Vec<u8>,
}

impl Transaction {
    pub fn new<T: Serialize>(nonce: u64, fee: Fee, method: &str, body: &T) -> CoreResult<Self> {
        Ok(Self {
            nonce,
            fee,
            method: method.to_string(),
            body: bincode::serialize(body)?,
        })
    }

    pub fn decode_body<T: DeserializeOwned>(&self) -> CoreResult<T> {
        bincode::deserialize(&self.body).map_err(|_| CoreError::InvalidArgument)
    }

    fn signing_bytes(&self) -> CoreResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// A signed consensus transaction envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub content: Transaction,
    pub public_key: PublicKey,
    pub signature: String,
}

impl SignedTransaction {
    pub fn sign(keypair: &Keypair, content: Transaction) -> CoreResult<Self> {
        let message = content.signing_bytes()?;
        let signature = crypto::sign_message(keypair, TX_SIGNATURE_CONTEXT, &message);
        Ok(Self {
            content,
            public_key: PublicKey(keypair.public.to_bytes()),
            signature: crypto::signature_to_hex(&signature),
        })
    }

    /// Verifies the envelope signature. Blacklisted signer keys are rejected
    /// here, before any state is touched.
    pub fn verify(&self) -> CoreResult<()> {
        let message = self.content.signing_bytes()?;
        let signature =
            crypto::signature_from_hex(&self.signature).map_err(|_| CoreError::InvalidSignature)?;
        crypto::verify_signature(&self.public_key, TX_SIGNATURE_CONTEXT, &message, &signature)
    }

    pub fn signer_address(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::staking::Transfer;

    #[test]
    fn sign_verify_round_trip() {
        let keypair = crypto::generate_keypair();
        let transfer = Transfer {
            to: Address::from_public_key(&PublicKey([1u8; 32])),
            tokens: Quantity::from_u64(1000),
        };
        let tx = Transaction::new(0, Fee::default(), METHOD_TRANSFER, &transfer).unwrap();
        let signed = SignedTransaction::sign(&keypair, tx).unwrap();
        signed.verify().unwrap();

        let decoded: Transfer = signed.content.decode_body().unwrap();
        assert_eq!(decoded, transfer);
    }

    #[test]
    fn tampered_content_fails_verification() {
        let keypair = crypto::generate_keypair();
        let transfer = Transfer {
            to: Address::from_public_key(&PublicKey([1u8; 32])),
            tokens: Quantity::from_u64(1000),
        };
        let tx = Transaction::new(0, Fee::default(), METHOD_TRANSFER, &transfer).unwrap();
        let mut signed = SignedTransaction::sign(&keypair, tx).unwrap();
        signed.content.nonce = 7;
        assert!(matches!(
            signed.verify(),
            Err(CoreError::InvalidSignature)
        ));
    }

    #[test]
    fn blacklisted_signer_is_rejected() {
        let keypair = crypto::generate_keypair();
        let tx = Transaction::new(
            0,
            Fee::default(),
            METHOD_BURN,
            &crate::types::staking::Burn {
                tokens: Quantity::from_u64(1),
            },
        )
        .unwrap();
        let mut signed = SignedTransaction::sign(&keypair, tx).unwrap();
        signed.public_key = crypto::COMMON_POOL_KEY;
        assert!(matches!(
            signed.verify(),
            Err(CoreError::InvalidSignature)
        ));
    }
}
