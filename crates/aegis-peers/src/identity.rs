//! Peer identity derived from the node's ed25519 key.

use ed25519_dalek::VerifyingKey;

use crate::error::{Error, Result};

/// Compute a peer id from an ed25519 public key using double-BLAKE3.
///
/// hash₁ = BLAKE3(pubkey), hash₂ = BLAKE3(hash₁), id = "b3b3/{hex(hash₂)}"
pub fn compute_peer_id(pubkey: &VerifyingKey) -> String {
    let hash1 = blake3::hash(pubkey.as_bytes());
    let hash2 = blake3::hash(hash1.as_bytes());
    format!("b3b3/{}", hex::encode(hash2.as_bytes()))
}

/// Hex form of a public key as carried in a [`crate::PeerSummary`].
pub fn encode_public_key(pubkey: &VerifyingKey) -> String {
    hex::encode(pubkey.as_bytes())
}

/// Accept a reported peer id only if it derives from the reported key.
pub fn check_peer_id(peer_id: &str, public_key: &str) -> Result<()> {
    let bytes: [u8; 32] = hex::decode(public_key)
        .ok()
        .and_then(|raw| raw.try_into().ok())
        .ok_or_else(|| Error::Protocol(format!("malformed public key {:?}", public_key)))?;
    let pubkey = VerifyingKey::from_bytes(&bytes)
        .map_err(|e| Error::Protocol(format!("invalid public key: {}", e)))?;

    if compute_peer_id(&pubkey) != peer_id {
        return Err(Error::Protocol(format!(
            "peer id {:?} does not derive from key {}",
            peer_id, public_key
        )));
    }
    Ok(())
}
