//! Content digest and detached signatures.
//!
//! - Digest:    keccak256(payload), 32 bytes, hex on the wire.
//! - Signature: Ed25519 over the same payload, 64 bytes, base64 on the wire.
//!
//! Verification helpers take raw byte slices so that malformed input from
//! the network (short signatures, truncated keys, odd-length hex) yields
//! `false` rather than an error. Callers treat every non-true result the
//! same way: the message is dropped.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use tiny_keccak::{Hasher, Keccak};

/// Fixed-size content hash.
pub type Digest = [u8; 32];

/// Keccak-256 hash of the input bytes.
pub fn keccak256(data: &[u8]) -> Digest {
    let mut k = Keccak::v256();
    let mut out = [0u8; 32];
    k.update(data);
    k.finalize(&mut out);
    out
}

/// Content digest of a payload.
pub fn digest(payload: &[u8]) -> Digest {
    keccak256(payload)
}

/// Detached Ed25519 signature over `payload`.
pub fn sign(payload: &[u8], key: &SigningKey) -> [u8; 64] {
    let sig: Signature = key.sign(payload);
    sig.to_bytes()
}

/// Verify a detached signature.
///
/// Returns false for a signature that is not exactly 64 bytes, a public key
/// that is not a valid 32-byte Ed25519 point, or a signature made by a
/// different key.
pub fn verify(payload: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let Ok(pk_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(vk) = VerifyingKey::from_bytes(&pk_bytes) else {
        return false;
    };
    let sig = Signature::from_bytes(&sig_bytes);
    vk.verify_strict(payload, &sig).is_ok()
}

/// Verify with an already-parsed key.
pub fn verify_with_key(payload: &[u8], signature: &[u8], key: &VerifyingKey) -> bool {
    verify(payload, signature, key.as_bytes())
}

/// Returns true if `checksum` is the digest of `payload`.
///
/// A checksum of the wrong length never matches.
pub fn verify_digest(payload: &[u8], checksum: &[u8]) -> bool {
    checksum.len() == 32 && digest(payload).as_slice() == checksum
}

/// Hex-encoded digest, as carried in the envelope `checksum` field.
pub fn digest_hex(payload: &[u8]) -> String {
    hex::encode(digest(payload))
}
