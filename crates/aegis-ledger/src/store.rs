//! Persistent storage for entries and anchors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ed25519_dalek::SigningKey;
use rocksdb::{Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::anchor::AnchorRecord;
use crate::entry::LedgerEntry;
use crate::error::{Error, Result};

/// Storage seam for the ledger.
pub trait LedgerStore: Send + Sync {
    /// Persist an entry and the anchor it attests, all-or-nothing.
    fn append(&self, entry: &LedgerEntry, anchor: &AnchorRecord) -> Result<()>;

    /// Replace the stored copy of an anchor. Never touches entries.
    fn put_anchor(&self, anchor: &AnchorRecord) -> Result<()>;

    fn anchor(&self, id: &str) -> Result<Option<AnchorRecord>>;

    fn entry(&self, sequence: u64) -> Result<Option<LedgerEntry>>;

    /// Every stored entry slot in sequence order, each decoded on its own so
    /// one unreadable entry does not hide the rest.
    fn entry_slots(&self) -> Result<Vec<Result<LedgerEntry>>>;

    /// All entries in sequence order. Fails on the first unreadable entry.
    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        self.entry_slots()?.into_iter().collect()
    }

    /// Number of entries.
    fn height(&self) -> Result<u64>;

    /// Node signing key, created on first use.
    fn signing_key(&self) -> Result<SigningKey>;
}

/// Where ledger data lives. Resolved once at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerBackend {
    #[default]
    Memory,
    RocksDb { path: PathBuf },
}

impl LedgerBackend {
    pub fn open(&self) -> Result<Arc<dyn LedgerStore>> {
        match self {
            LedgerBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            LedgerBackend::RocksDb { path } => {
                let store = RocksStore::open(path)?;
                info!(path = %path.display(), height = store.height()?, "Opened ledger storage");
                Ok(Arc::new(store))
            }
        }
    }
}

#[derive(Default)]
struct MemoryInner {
    entries: Vec<LedgerEntry>,
    anchors: HashMap<String, AnchorRecord>,
    signing_key: Option<SigningKey>,
}

/// In-process store. Contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LedgerStore for MemoryStore {
    fn append(&self, entry: &LedgerEntry, anchor: &AnchorRecord) -> Result<()> {
        let mut inner = self.lock();
        if entry.sequence != inner.entries.len() as u64 {
            return Err(Error::Storage(format!(
                "append at sequence {} but height is {}",
                entry.sequence,
                inner.entries.len()
            )));
        }
        inner.entries.push(entry.clone());
        inner.anchors.insert(anchor.id.clone(), anchor.clone());
        Ok(())
    }

    fn put_anchor(&self, anchor: &AnchorRecord) -> Result<()> {
        self.lock().anchors.insert(anchor.id.clone(), anchor.clone());
        Ok(())
    }

    fn anchor(&self, id: &str) -> Result<Option<AnchorRecord>> {
        Ok(self.lock().anchors.get(id).cloned())
    }

    fn entry(&self, sequence: u64) -> Result<Option<LedgerEntry>> {
        Ok(usize::try_from(sequence)
            .ok()
            .and_then(|i| self.lock().entries.get(i).cloned()))
    }

    fn entry_slots(&self) -> Result<Vec<Result<LedgerEntry>>> {
        Ok(self.lock().entries.iter().cloned().map(Ok).collect())
    }

    fn height(&self) -> Result<u64> {
        Ok(self.lock().entries.len() as u64)
    }

    fn signing_key(&self) -> Result<SigningKey> {
        let mut inner = self.lock();
        let key = inner
            .signing_key
            .get_or_insert_with(|| SigningKey::generate(&mut rand::thread_rng()));
        Ok(key.clone())
    }
}

const HEIGHT_KEY: &[u8] = b"meta:height";
const SIGNING_KEY: &[u8] = b"node:signing_key";
const ENTRY_PREFIX: &[u8] = b"entry:";

fn entry_key(sequence: u64) -> Vec<u8> {
    // Big-endian so lexicographic order is sequence order.
    let mut key = ENTRY_PREFIX.to_vec();
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn anchor_key(id: &str) -> Vec<u8> {
    format!("anchor:{}", id).into_bytes()
}

/// RocksDB-backed store.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }
}

impl LedgerStore for RocksStore {
    fn append(&self, entry: &LedgerEntry, anchor: &AnchorRecord) -> Result<()> {
        let height = self.height()?;
        if entry.sequence != height {
            return Err(Error::Storage(format!(
                "append at sequence {} but height is {}",
                entry.sequence, height
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put(entry_key(entry.sequence), serde_json::to_vec(entry)?);
        batch.put(anchor_key(&anchor.id), serde_json::to_vec(anchor)?);
        batch.put(HEIGHT_KEY, (height + 1).to_le_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    fn put_anchor(&self, anchor: &AnchorRecord) -> Result<()> {
        self.db.put(anchor_key(&anchor.id), serde_json::to_vec(anchor)?)?;
        Ok(())
    }

    fn anchor(&self, id: &str) -> Result<Option<AnchorRecord>> {
        match self.db.get(anchor_key(id))? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn entry(&self, sequence: u64) -> Result<Option<LedgerEntry>> {
        match self.db.get(entry_key(sequence))? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn entry_slots(&self) -> Result<Vec<Result<LedgerEntry>>> {
        let mut slots = Vec::new();
        for item in self.db.prefix_iterator(ENTRY_PREFIX) {
            let (key, value) = item?;
            if !key.starts_with(ENTRY_PREFIX) {
                break;
            }
            slots.push(serde_json::from_slice(&value).map_err(Error::from));
        }
        Ok(slots)
    }

    fn height(&self) -> Result<u64> {
        match self.db.get(HEIGHT_KEY)? {
            Some(data) => {
                let bytes: [u8; 8] = data
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Invalid stored height".into()))?;
                Ok(u64::from_le_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    fn signing_key(&self) -> Result<SigningKey> {
        if let Some(data) = self.db.get(SIGNING_KEY)? {
            let bytes: [u8; 32] = data
                .as_slice()
                .try_into()
                .map_err(|_| Error::Storage("Invalid stored key".into()))?;
            Ok(SigningKey::from_bytes(&bytes))
        } else {
            let signing_key = SigningKey::generate(&mut rand::thread_rng());
            self.db.put(SIGNING_KEY, signing_key.as_bytes())?;
            Ok(signing_key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntrySigner, GENESIS_PREV_HASH};
    use serde_json::json;
    use tempfile::tempdir;

    fn fixture(sequence: u64, prev: [u8; 32]) -> (LedgerEntry, AnchorRecord) {
        let id = format!("anchor-{}", sequence);
        let entry = LedgerEntry::new(sequence, 1, &id, b"42".to_vec(), prev, &EntrySigner::Unsigned);
        let anchor = AnchorRecord {
            id,
            value: json!(42),
            metadata: Default::default(),
            created_at: 1,
            sequence,
        };
        (entry, anchor)
    }

    fn exercise(store: &dyn LedgerStore) {
        let (e0, a0) = fixture(0, GENESIS_PREV_HASH);
        let (e1, a1) = fixture(1, e0.hash);
        store.append(&e0, &a0).unwrap();
        store.append(&e1, &a1).unwrap();

        assert_eq!(store.height().unwrap(), 2);
        assert_eq!(store.entries().unwrap(), vec![e0.clone(), e1]);
        assert_eq!(store.entry(0).unwrap(), Some(e0.clone()));
        assert_eq!(store.entry(7).unwrap(), None);
        assert_eq!(store.anchor("anchor-1").unwrap(), Some(a1));

        // Out-of-order append is refused.
        assert!(store.append(&e0, &a0).is_err());
        assert_eq!(store.height().unwrap(), 2);

        assert_eq!(
            store.signing_key().unwrap().to_bytes(),
            store.signing_key().unwrap().to_bytes()
        );
    }

    #[test]
    fn memory_store_appends() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn rocks_store_appends() {
        let dir = tempdir().unwrap();
        exercise(&RocksStore::open(dir.path()).unwrap());
    }

    #[test]
    fn rocks_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let key = {
            let store = RocksStore::open(dir.path()).unwrap();
            let (e0, a0) = fixture(0, GENESIS_PREV_HASH);
            store.append(&e0, &a0).unwrap();
            store.signing_key().unwrap().to_bytes()
        };

        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.height().unwrap(), 1);
        assert!(store.anchor("anchor-0").unwrap().is_some());
        assert_eq!(store.signing_key().unwrap().to_bytes(), key);
    }

    #[test]
    fn rocks_store_keeps_reading_past_garbled_entry() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let (e0, a0) = fixture(0, GENESIS_PREV_HASH);
        let (e1, a1) = fixture(1, e0.hash);
        let (e2, a2) = fixture(2, e1.hash);
        for (e, a) in [(&e0, &a0), (&e1, &a1), (&e2, &a2)] {
            store.append(e, a).unwrap();
        }
        store.db.put(entry_key(1), b"{not json").unwrap();

        let slots = store.entry_slots().unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].as_ref().unwrap(), &e0);
        assert!(matches!(slots[1], Err(Error::Serialization(_))));
        assert_eq!(slots[2].as_ref().unwrap(), &e2);
        assert!(store.entries().is_err());
    }

    #[test]
    fn backend_open_fails_on_bad_path() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let backend = LedgerBackend::RocksDb { path: file };
        assert!(matches!(backend.open(), Err(Error::Storage(_))));
    }
}
