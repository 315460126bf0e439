//! Whole-chain verification.

use serde::{Deserialize, Serialize};

use crate::entry::{LedgerEntry, GENESIS_PREV_HASH};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainReport {
    pub entries: u64,
    pub verified: u64,
    /// `verified / entries`, 1.0 for an empty ledger.
    pub continuity: f64,
    /// Sequence of the first entry that failed.
    pub first_break: Option<u64>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_break.is_none()
    }
}

/// Check every entry in order.
///
/// An entry verifies when its sequence matches its position, its payload and
/// entry hashes recompute, it links to the stored hash of its predecessor,
/// and any attached signature is valid. A tampered entry breaks only itself;
/// successors still link to the hash it carries.
pub fn verify_entries(entries: &[LedgerEntry]) -> ChainReport {
    verify_slots(entries.iter().map(Some))
}

/// Like [`verify_entries`], over slots read back from storage. A `None` slot
/// could not be decoded and fails at its position. Its successor's link is
/// taken on trust since the hash it should match is unreadable.
pub fn verify_slots<'a, I>(slots: I) -> ChainReport
where
    I: IntoIterator<Item = Option<&'a LedgerEntry>>,
{
    let mut total = 0u64;
    let mut verified = 0u64;
    let mut first_break = None;
    let mut prev = Some(GENESIS_PREV_HASH);

    for (position, slot) in slots.into_iter().enumerate() {
        total += 1;
        let ok = slot.is_some_and(|entry| {
            let expected = prev.unwrap_or(entry.prev_hash);
            entry.sequence == position as u64 && entry.verify(&expected)
        });
        if ok {
            verified += 1;
        } else if first_break.is_none() {
            first_break = Some(position as u64);
        }
        prev = slot.map(|entry| entry.hash);
    }

    let continuity = if total == 0 {
        1.0
    } else {
        verified as f64 / total as f64
    };

    ChainReport {
        entries: total,
        verified,
        continuity,
        first_break,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntrySigner;
    use proptest::prelude::*;

    fn chain(len: usize, signer: &EntrySigner) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = Vec::with_capacity(len);
        for i in 0..len {
            let prev = entries.last().map(|e| e.hash).unwrap_or(GENESIS_PREV_HASH);
            let payload = serde_json::to_vec(&i).unwrap();
            entries.push(LedgerEntry::new(i as u64, 1000 + i as u64, &format!("a{}", i), payload, prev, signer));
        }
        entries
    }

    #[test]
    fn empty_chain_is_continuous() {
        let report = verify_entries(&[]);
        assert_eq!(report.continuity, 1.0);
        assert!(report.is_intact());
    }

    #[test]
    fn untampered_chain_is_continuous() {
        let report = verify_entries(&chain(10, &EntrySigner::generate()));
        assert_eq!(report.entries, 10);
        assert_eq!(report.verified, 10);
        assert_eq!(report.continuity, 1.0);
        assert_eq!(report.first_break, None);
    }

    #[test]
    fn tampered_payload_reports_break() {
        let mut entries = chain(10, &EntrySigner::Unsigned);
        entries[4].payload = b"\"forged\"".to_vec();

        let report = verify_entries(&entries);
        assert_eq!(report.first_break, Some(4));
        assert_eq!(report.verified, 9);
        assert!(report.continuity < 1.0);
    }

    #[test]
    fn relinked_entry_breaks_chain() {
        let mut entries = chain(5, &EntrySigner::Unsigned);
        entries[2].prev_hash = [9u8; 32];
        let report = verify_entries(&entries);
        assert_eq!(report.first_break, Some(2));
    }

    #[test]
    fn reordered_entries_break_chain() {
        let mut entries = chain(5, &EntrySigner::Unsigned);
        entries.swap(1, 3);
        let report = verify_entries(&entries);
        assert_eq!(report.first_break, Some(1));
    }

    #[test]
    fn undecodable_slot_breaks_only_itself() {
        let entries = chain(5, &EntrySigner::Unsigned);
        let slots = entries.iter().enumerate().map(|(i, e)| (i != 2).then_some(e));

        let report = verify_slots(slots);
        assert_eq!(report.entries, 5);
        assert_eq!(report.verified, 4);
        assert_eq!(report.first_break, Some(2));
        assert!(report.continuity < 1.0);
    }

    proptest! {
        #[test]
        fn any_single_tamper_is_detected(len in 1usize..20, pick in any::<prop::sample::Index>(), byte in any::<u8>()) {
            let mut entries = chain(len, &EntrySigner::Unsigned);
            let k = pick.index(len);
            entries[k].payload.push(byte);

            let report = verify_entries(&entries);
            prop_assert_eq!(report.first_break, Some(k as u64));
            prop_assert!(report.continuity < 1.0);
        }
    }
}
