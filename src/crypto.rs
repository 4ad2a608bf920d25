use ed25519_dalek::{Keypair, Signature, Signer, Verifier};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512_256};

use crate::errors::{CoreError, CoreResult};
use crate::types::PublicKey;

/// Domain separation context for consensus transaction signatures.
pub const TX_SIGNATURE_CONTEXT: &[u8] = b"kestrel-core/consensus: tx";

/// Reserved key backing the common pool sentinel address. Never a valid
/// transaction signer.
pub const COMMON_POOL_KEY: PublicKey = PublicKey([
    0x1a, 0xbe, 0x11, 0xed, 0xc0, 0x01, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff,
]);

/// Reserved key backing the fee accumulator sentinel address. Never a valid
/// transaction signer.
pub const FEE_ACCUMULATOR_KEY: PublicKey = PublicKey([
    0x1a, 0xbe, 0x11, 0xed, 0xfe, 0xea, 0xcc, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff,
]);

pub fn is_blacklisted(public_key: &PublicKey) -> bool {
    *public_key == COMMON_POOL_KEY || *public_key == FEE_ACCUMULATOR_KEY
}

/// Hashes a public key for address derivation (SHA-512/256).
pub fn hash_public_key(public_key: &PublicKey) -> [u8; 32] {
    let digest = Sha512_256::digest(public_key.as_bytes());
    digest.into()
}

pub fn generate_keypair() -> Keypair {
    Keypair::generate(&mut OsRng)
}

pub fn sign_message(keypair: &Keypair, context: &[u8], message: &[u8]) -> Signature {
    let mut data = Vec::with_capacity(context.len() + message.len());
    data.extend_from_slice(context);
    data.extend_from_slice(message);
    keypair.sign(&data)
}

pub fn verify_signature(
    public_key: &PublicKey,
    context: &[u8],
    message: &[u8],
    signature: &Signature,
) -> CoreResult<()> {
    if is_blacklisted(public_key) {
        return Err(CoreError::InvalidSignature);
    }
    let key = ed25519_dalek::PublicKey::from_bytes(public_key.as_bytes())
        .map_err(|_| CoreError::InvalidSignature)?;
    let mut data = Vec::with_capacity(context.len() + message.len());
    data.extend_from_slice(context);
    data.extend_from_slice(message);
    key.verify(&data, signature)
        .map_err(|_| CoreError::InvalidSignature)
}

pub fn signature_from_hex(data: &str) -> CoreResult<Signature> {
    let bytes = hex::decode(data)
        .map_err(|err| CoreError::Crypto(format!("invalid signature encoding: {err}")))?;
    Signature::from_bytes(&bytes)
        .map_err(|err| CoreError::Crypto(format!("invalid signature bytes: {err}")))
}

pub fn signature_to_hex(signature: &Signature) -> String {
    hex::encode(signature.to_bytes())
}
