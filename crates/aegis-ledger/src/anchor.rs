//! Anchors: immutable facts registered in the ledger.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entry::payload_hash;
use crate::error::Result;

/// Metadata key naming another anchor that holds a backup copy.
pub const BACKUP_REF_KEY: &str = "backup_ref";

/// New time-ordered, globally unique anchor id (UUIDv7).
pub fn generate_anchor_id() -> String {
    Uuid::now_v7().to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: String,
    pub value: Value,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Unix millis.
    pub created_at: u64,
    /// Ledger entry that attested this anchor.
    pub sequence: u64,
}

impl AnchorRecord {
    /// Anchor referenced by the `backup_ref` metadata key, if any.
    pub fn backup_ref(&self) -> Option<&str> {
        self.metadata.get(BACKUP_REF_KEY).and_then(Value::as_str)
    }

    pub fn value_hash(&self) -> Result<[u8; 32]> {
        value_hash(&self.value)
    }
}

/// Canonical bytes of a value as stored in an entry payload.
pub(crate) fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn value_hash(value: &Value) -> Result<[u8; 32]> {
    Ok(payload_hash(&canonical_bytes(value)?))
}

/// Result of [`Ledger::register`](crate::Ledger::register).
#[derive(Clone, Debug, PartialEq)]
pub enum Registration {
    Created(AnchorRecord),
    /// Same id and value were already registered; nothing appended.
    AlreadyRegistered(AnchorRecord),
}

impl Registration {
    pub fn record(&self) -> &AnchorRecord {
        match self {
            Registration::Created(r) | Registration::AlreadyRegistered(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Registration::Created(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Stored value still matches the attested hash.
    StoredIntact,
    /// Stored value was damaged and replaced from its backup.
    Restored,
    /// Damaged, and no usable backup reference.
    NoBackup,
    /// Damaged, and the backup does not match the attested hash either.
    BackupMismatch,
}

/// Result of checking a claimed value against the ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub anchor_id: String,
    pub matches: bool,
    /// Present only when the claim did not match.
    pub recovery: Option<RecoveryOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anchor_ids_are_unique_v7() {
        let a = generate_anchor_id();
        let b = generate_anchor_id();
        assert_ne!(a, b);
        let ua = Uuid::parse_str(&a).unwrap();
        assert_eq!(ua.get_version_num(), 7);
    }

    #[test]
    fn key_order_does_not_change_hash() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":[true,null]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":[true,null],"x":1}"#).unwrap();
        assert_eq!(value_hash(&a).unwrap(), value_hash(&b).unwrap());
        assert_ne!(value_hash(&a).unwrap(), value_hash(&json!({"x": 2})).unwrap());
    }

    #[test]
    fn backup_ref_reads_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert(BACKUP_REF_KEY.to_string(), json!("copy-1"));
        let record = AnchorRecord {
            id: "a".into(),
            value: json!(1),
            metadata,
            created_at: 0,
            sequence: 0,
        };
        assert_eq!(record.backup_ref(), Some("copy-1"));
    }
}
