//! Ledger entries and their signatures.
//!
//! Each entry commits to its predecessor:
//!
//! ```text
//! hash = BLAKE3(sequence || timestamp || len(anchor_id) || anchor_id || payload_hash || prev_hash)
//! ```
//!
//! A signature, when present, is an Ed25519 signature over `hash`.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// `prev_hash` of the first entry.
pub const GENESIS_PREV_HASH: [u8; 32] = [0u8; 32];

/// Hex encoding for fixed-size byte arrays.
pub(crate) mod hex_array {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} bytes", N)))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Content hash of an anchor value.
///
/// `serde_json::Value` keeps object keys sorted, so equal values always
/// serialize to the same bytes.
pub fn payload_hash(payload: &[u8]) -> [u8; 32] {
    *blake3::hash(payload).as_bytes()
}

/// Signer key and signature attached to an entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySignature {
    #[serde(with = "hex_array")]
    pub signer: [u8; 32],
    #[serde(with = "hex_array")]
    pub signature: [u8; 64],
}

impl EntrySignature {
    pub fn verify(&self, hash: &[u8; 32]) -> bool {
        let verifying_key = match VerifyingKey::from_bytes(&self.signer) {
            Ok(k) => k,
            Err(_) => return false,
        };
        let signature = Signature::from_bytes(&self.signature);
        verifying_key.verify(hash, &signature).is_ok()
    }
}

/// How new entries are signed.
#[derive(Clone)]
pub enum EntrySigner {
    Ed25519(SigningKey),
    /// Entries carry no signature; chain hashes still apply.
    Unsigned,
}

impl EntrySigner {
    /// Signer with a fresh random key.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        EntrySigner::Ed25519(SigningKey::generate(&mut rng))
    }

    pub fn sign(&self, hash: &[u8; 32]) -> Option<EntrySignature> {
        match self {
            EntrySigner::Ed25519(key) => Some(EntrySignature {
                signer: key.verifying_key().to_bytes(),
                signature: key.sign(hash).to_bytes(),
            }),
            EntrySigner::Unsigned => None,
        }
    }

    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        match self {
            EntrySigner::Ed25519(key) => Some(key.verifying_key()),
            EntrySigner::Unsigned => None,
        }
    }

    pub fn is_signing(&self) -> bool {
        matches!(self, EntrySigner::Ed25519(_))
    }
}

impl std::fmt::Debug for EntrySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntrySigner::Ed25519(key) => {
                write!(f, "Ed25519({})", hex::encode(key.verifying_key().to_bytes()))
            }
            EntrySigner::Unsigned => write!(f, "Unsigned"),
        }
    }
}

/// One append-only record attesting an anchor's value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    /// Unix millis.
    pub timestamp: u64,
    pub anchor_id: String,
    /// Canonical JSON bytes of the anchor value.
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "hex_array")]
    pub payload_hash: [u8; 32],
    #[serde(with = "hex_array")]
    pub prev_hash: [u8; 32],
    #[serde(with = "hex_array")]
    pub hash: [u8; 32],
    pub signature: Option<EntrySignature>,
}

impl LedgerEntry {
    /// Build and sign the entry that follows `prev_hash`.
    pub fn new(
        sequence: u64,
        timestamp: u64,
        anchor_id: &str,
        payload: Vec<u8>,
        prev_hash: [u8; 32],
        signer: &EntrySigner,
    ) -> Self {
        let payload_hash = payload_hash(&payload);
        let hash = compute_entry_hash(sequence, timestamp, anchor_id, &payload_hash, &prev_hash);
        let signature = signer.sign(&hash);
        Self {
            sequence,
            timestamp,
            anchor_id: anchor_id.to_string(),
            payload,
            payload_hash,
            prev_hash,
            hash,
            signature,
        }
    }

    /// Check payload hash, entry hash, linkage to `expected_prev` and the
    /// signature if one is attached.
    pub fn verify(&self, expected_prev: &[u8; 32]) -> bool {
        if &self.prev_hash != expected_prev {
            return false;
        }
        if payload_hash(&self.payload) != self.payload_hash {
            return false;
        }
        let expected = compute_entry_hash(
            self.sequence,
            self.timestamp,
            &self.anchor_id,
            &self.payload_hash,
            &self.prev_hash,
        );
        if expected != self.hash {
            return false;
        }
        match &self.signature {
            Some(signature) => signature.verify(&self.hash),
            None => true,
        }
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

fn compute_entry_hash(
    sequence: u64,
    timestamp: u64,
    anchor_id: &str,
    payload_hash: &[u8; 32],
    prev_hash: &[u8; 32],
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&sequence.to_le_bytes());
    hasher.update(&timestamp.to_le_bytes());
    hasher.update(&(anchor_id.len() as u64).to_le_bytes());
    hasher.update(anchor_id.as_bytes());
    hasher.update(payload_hash);
    hasher.update(prev_hash);
    *hasher.finalize().as_bytes()
}
