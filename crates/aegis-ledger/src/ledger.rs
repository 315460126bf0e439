//! Anchor registration, verification and recovery.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::anchor::{canonical_bytes, value_hash, AnchorRecord, RecoveryOutcome, Registration, Verification};
use crate::chain::{verify_slots, ChainReport};
use crate::entry::{payload_hash, EntrySigner, LedgerEntry, GENESIS_PREV_HASH};
use crate::error::{Error, Result};
use crate::store::{LedgerBackend, LedgerStore};

#[derive(Clone, Copy, Debug)]
struct Tip {
    height: u64,
    hash: [u8; 32],
}

/// Attestation and verification counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub height: u64,
    pub attestations_ok: u64,
    pub attestations_failed: u64,
    pub verification_mismatches: u64,
}

/// The append-only anchor ledger.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    signer: EntrySigner,
    /// Held for the whole of `register`.
    tip: Mutex<Tip>,
    attestations_ok: AtomicU64,
    attestations_failed: AtomicU64,
    verification_mismatches: AtomicU64,
}

impl Ledger {
    /// Open the configured backend. With `sign` set, entries are signed with
    /// the store's node key.
    pub fn open(backend: &LedgerBackend, sign: bool) -> Result<Self> {
        let store = backend.open()?;
        let signer = if sign {
            EntrySigner::Ed25519(store.signing_key()?)
        } else {
            EntrySigner::Unsigned
        };
        Self::with_store(store, signer)
    }

    /// Build on an existing store, reloading the chain tip from it.
    pub fn with_store(store: Arc<dyn LedgerStore>, signer: EntrySigner) -> Result<Self> {
        let height = store.height()?;
        let hash = if height == 0 {
            GENESIS_PREV_HASH
        } else {
            store
                .entry(height - 1)?
                .ok_or(Error::MissingEntry(height - 1))?
                .hash
        };
        debug!(height, tip = %hex::encode(hash), signed = signer.is_signing(), "Ledger ready");

        Ok(Self {
            store,
            signer,
            tip: Mutex::new(Tip { height, hash }),
            attestations_ok: AtomicU64::new(0),
            attestations_failed: AtomicU64::new(0),
            verification_mismatches: AtomicU64::new(0),
        })
    }

    pub fn signer(&self) -> &EntrySigner {
        &self.signer
    }

    /// Register an anchor. Re-registering the same value is a no-op; a
    /// different value is rejected.
    pub fn register(
        &self,
        anchor_id: &str,
        value: Value,
        metadata: BTreeMap<String, Value>,
    ) -> Result<Registration> {
        let mut tip = self.tip.lock().unwrap_or_else(PoisonError::into_inner);

        let payload = canonical_bytes(&value)?;
        if let Some(existing) = self.store.anchor(anchor_id)? {
            let attested = self.attested_hash(&existing)?;
            if attested == payload_hash(&payload) {
                debug!(anchor_id, "Anchor already registered");
                return Ok(Registration::AlreadyRegistered(existing));
            }
            self.attestations_failed.fetch_add(1, Ordering::Relaxed);
            warn!(anchor_id, "Rejected re-registration with a different value");
            return Err(Error::ImmutabilityViolation {
                anchor_id: anchor_id.to_string(),
            });
        }

        let now = now_millis();
        let entry = LedgerEntry::new(tip.height, now, anchor_id, payload, tip.hash, &self.signer);
        let record = AnchorRecord {
            id: anchor_id.to_string(),
            value,
            metadata,
            created_at: now,
            sequence: entry.sequence,
        };

        if let Err(e) = self.store.append(&entry, &record) {
            self.attestations_failed.fetch_add(1, Ordering::Relaxed);
            error!(anchor_id, error = %e, "Ledger append failed");
            return Err(e);
        }

        tip.height += 1;
        tip.hash = entry.hash;
        self.attestations_ok.fetch_add(1, Ordering::Relaxed);
        info!(anchor_id, sequence = entry.sequence, hash = %entry.hash_hex(), "Anchor registered");

        Ok(Registration::Created(record))
    }

    pub fn lookup(&self, anchor_id: &str) -> Result<Option<AnchorRecord>> {
        self.store.anchor(anchor_id)
    }

    /// Compare a claimed value with the attested one. On mismatch the stored
    /// copy is checked and recovered if possible.
    pub fn verify(&self, anchor_id: &str, claim: &Value) -> Result<Verification> {
        let record = self
            .store
            .anchor(anchor_id)?
            .ok_or_else(|| Error::NotFound(anchor_id.to_string()))?;
        let attested = self.attested_hash(&record)?;
        let matches = value_hash(claim)? == attested;

        let recovery = if matches {
            None
        } else {
            self.verification_mismatches.fetch_add(1, Ordering::Relaxed);
            warn!(anchor_id, "Claimed value does not match ledger attestation");
            Some(self.recover(anchor_id)?)
        };

        Ok(Verification {
            anchor_id: anchor_id.to_string(),
            matches,
            recovery,
        })
    }

    /// Restore a damaged stored value from its `backup_ref` anchor. The chain
    /// itself is never modified.
    pub fn recover(&self, anchor_id: &str) -> Result<RecoveryOutcome> {
        let record = self
            .store
            .anchor(anchor_id)?
            .ok_or_else(|| Error::NotFound(anchor_id.to_string()))?;
        let attested = self.attested_hash(&record)?;

        if record.value_hash()? == attested {
            return Ok(RecoveryOutcome::StoredIntact);
        }

        let backup = match record.backup_ref() {
            Some(backup_id) => self.store.anchor(backup_id)?,
            None => None,
        };
        let Some(backup) = backup else {
            warn!(anchor_id, "Stored anchor value damaged and no backup is available");
            return Ok(RecoveryOutcome::NoBackup);
        };

        if backup.value_hash()? != attested {
            warn!(anchor_id, backup = %backup.id, "Backup does not match attested value");
            return Ok(RecoveryOutcome::BackupMismatch);
        }

        let restored = AnchorRecord {
            value: backup.value,
            ..record
        };
        self.store.put_anchor(&restored)?;
        info!(anchor_id, backup = %backup.id, "Restored anchor value from backup");
        Ok(RecoveryOutcome::Restored)
    }

    /// Audit the whole chain.
    pub fn verify_chain(&self) -> Result<ChainReport> {
        let slots = self.store.entry_slots()?;
        for (position, slot) in slots.iter().enumerate() {
            if let Err(e) = slot {
                error!(position, error = %e, "Ledger entry unreadable");
            }
        }
        let report = verify_slots(slots.iter().map(|slot| slot.as_ref().ok()));
        if let Some(at) = report.first_break {
            error!(
                first_break = at,
                verified = report.verified,
                entries = report.entries,
                continuity = report.continuity,
                "Ledger chain break detected"
            );
        } else {
            debug!(entries = report.entries, "Ledger chain verified");
        }
        Ok(report)
    }

    pub fn height(&self) -> u64 {
        self.tip.lock().unwrap_or_else(PoisonError::into_inner).height
    }

    /// Hash of the last entry, all zeros when empty.
    pub fn tip_hash(&self) -> [u8; 32] {
        self.tip.lock().unwrap_or_else(PoisonError::into_inner).hash
    }

    pub fn tip_hex(&self) -> String {
        hex::encode(self.tip_hash())
    }

    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        self.store.entries()
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            height: self.height(),
            attestations_ok: self.attestations_ok.load(Ordering::Relaxed),
            attestations_failed: self.attestations_failed.load(Ordering::Relaxed),
            verification_mismatches: self.verification_mismatches.load(Ordering::Relaxed),
        }
    }

    fn attested_hash(&self, record: &AnchorRecord) -> Result<[u8; 32]> {
        let entry = self
            .store
            .entry(record.sequence)?
            .ok_or(Error::MissingEntry(record.sequence))?;
        Ok(entry.payload_hash)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::BACKUP_REF_KEY;
    use crate::store::MemoryStore;
    use serde_json::json;
    use tempfile::tempdir;

    fn memory_ledger() -> (Arc<MemoryStore>, Ledger) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::with_store(store.clone(), EntrySigner::generate()).unwrap();
        (store, ledger)
    }

    fn backup_meta(id: &str) -> BTreeMap<String, Value> {
        let mut metadata = BTreeMap::new();
        metadata.insert(BACKUP_REF_KEY.to_string(), json!(id));
        metadata
    }

    fn damage(store: &MemoryStore, id: &str) {
        let mut record = store.anchor(id).unwrap().unwrap();
        record.value = json!("corrupted");
        store.put_anchor(&record).unwrap();
    }

    #[test]
    fn register_is_idempotent() {
        let (_, ledger) = memory_ledger();
        let first = ledger.register("a", json!({"v": 1}), BTreeMap::new()).unwrap();
        assert!(first.is_new());
        let again = ledger.register("a", json!({"v": 1}), BTreeMap::new()).unwrap();
        assert!(!again.is_new());
        assert_eq!(again.record(), first.record());
        assert_eq!(ledger.height(), 1);
    }

    #[test]
    fn register_rejects_different_value() {
        let (_, ledger) = memory_ledger();
        ledger.register("a", json!(1), BTreeMap::new()).unwrap();
        let err = ledger.register("a", json!(2), BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::ImmutabilityViolation { ref anchor_id } if anchor_id == "a"));
        assert_eq!(ledger.height(), 1);
        assert_eq!(ledger.lookup("a").unwrap().unwrap().value, json!(1));

        let stats = ledger.stats();
        assert_eq!(stats.attestations_ok, 1);
        assert_eq!(stats.attestations_failed, 1);
    }

    #[test]
    fn lookup_missing_is_none() {
        let (_, ledger) = memory_ledger();
        assert_eq!(ledger.lookup("nope").unwrap(), None);
        assert!(matches!(ledger.verify("nope", &json!(1)), Err(Error::NotFound(_))));
    }

    #[test]
    fn verify_matching_claim() {
        let (_, ledger) = memory_ledger();
        ledger.register("a", json!([1, 2, 3]), BTreeMap::new()).unwrap();
        let v = ledger.verify("a", &json!([1, 2, 3])).unwrap();
        assert!(v.matches);
        assert_eq!(v.recovery, None);
        assert_eq!(ledger.stats().verification_mismatches, 0);
    }

    #[test]
    fn mismatch_with_intact_store() {
        let (_, ledger) = memory_ledger();
        ledger.register("a", json!("real"), BTreeMap::new()).unwrap();
        let v = ledger.verify("a", &json!("fake")).unwrap();
        assert!(!v.matches);
        assert_eq!(v.recovery, Some(RecoveryOutcome::StoredIntact));
        assert_eq!(ledger.stats().verification_mismatches, 1);
    }

    #[test]
    fn damaged_value_restored_from_backup() {
        let (store, ledger) = memory_ledger();
        ledger.register("copy", json!({"doc": "v1"}), BTreeMap::new()).unwrap();
        ledger.register("a", json!({"doc": "v1"}), backup_meta("copy")).unwrap();
        let height = ledger.height();

        damage(&store, "a");
        let v = ledger.verify("a", &json!({"doc": "v1"})).unwrap();
        assert!(v.matches);

        assert_eq!(ledger.recover("a").unwrap(), RecoveryOutcome::Restored);
        assert_eq!(ledger.lookup("a").unwrap().unwrap().value, json!({"doc": "v1"}));
        assert_eq!(ledger.height(), height);
        assert!(ledger.verify_chain().unwrap().is_intact());
    }

    #[test]
    fn damaged_value_without_backup() {
        let (store, ledger) = memory_ledger();
        ledger.register("a", json!(1), BTreeMap::new()).unwrap();
        damage(&store, "a");
        assert_eq!(ledger.recover("a").unwrap(), RecoveryOutcome::NoBackup);
    }

    #[test]
    fn damaged_value_with_wrong_backup() {
        let (store, ledger) = memory_ledger();
        ledger.register("copy", json!(2), BTreeMap::new()).unwrap();
        ledger.register("a", json!(1), backup_meta("copy")).unwrap();
        damage(&store, "a");
        assert_eq!(ledger.recover("a").unwrap(), RecoveryOutcome::BackupMismatch);
    }

    #[test]
    fn chain_is_linked_and_signed() {
        let (_, ledger) = memory_ledger();
        for i in 0..5 {
            ledger.register(&format!("a{}", i), json!(i), BTreeMap::new()).unwrap();
        }
        let entries = ledger.entries().unwrap();
        assert_eq!(entries[0].prev_hash, GENESIS_PREV_HASH);
        for pair in entries.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].hash);
        }
        assert!(entries.iter().all(|e| e.signature.is_some()));
        assert_eq!(ledger.tip_hash(), entries[4].hash);

        let report = ledger.verify_chain().unwrap();
        assert_eq!(report.continuity, 1.0);
    }

    #[test]
    fn unsigned_ledger() {
        let ledger = Ledger::open(&LedgerBackend::Memory, false).unwrap();
        ledger.register("a", json!(1), BTreeMap::new()).unwrap();
        assert!(ledger.entries().unwrap()[0].signature.is_none());
        assert!(ledger.verify_chain().unwrap().is_intact());
    }

    #[test]
    fn garbled_stored_entry_counts_as_break() {
        let dir = tempdir().unwrap();
        let backend = LedgerBackend::RocksDb {
            path: dir.path().to_path_buf(),
        };
        {
            let ledger = Ledger::open(&backend, true).unwrap();
            for id in ["a", "b", "c"] {
                ledger.register(id, json!(id), BTreeMap::new()).unwrap();
            }
        }
        {
            let db = rocksdb::DB::open_default(dir.path()).unwrap();
            let mut key = b"entry:".to_vec();
            key.extend_from_slice(&1u64.to_be_bytes());
            db.put(key, b"\x00\x01garbage").unwrap();
        }

        let ledger = Ledger::open(&backend, true).unwrap();
        let report = ledger.verify_chain().unwrap();
        assert_eq!(report.entries, 3);
        assert_eq!(report.verified, 2);
        assert_eq!(report.first_break, Some(1));
        assert!(report.continuity < 1.0);
    }

    #[test]
    fn restart_reloads_tip() {
        let dir = tempdir().unwrap();
        let backend = LedgerBackend::RocksDb {
            path: dir.path().to_path_buf(),
        };
        let (tip, key) = {
            let ledger = Ledger::open(&backend, true).unwrap();
            ledger.register("a", json!(1), BTreeMap::new()).unwrap();
            ledger.register("b", json!(2), BTreeMap::new()).unwrap();
            (ledger.tip_hash(), ledger.signer().verifying_key())
        };

        let ledger = Ledger::open(&backend, true).unwrap();
        assert_eq!(ledger.height(), 2);
        assert_eq!(ledger.tip_hash(), tip);
        assert_eq!(ledger.signer().verifying_key(), key);

        ledger.register("c", json!(3), BTreeMap::new()).unwrap();
        let report = ledger.verify_chain().unwrap();
        assert_eq!(report.entries, 3);
        assert!(report.is_intact());
    }
}
