//! Compensation entries and undo planning.
//!
//! Shared by crash recovery and runtime rollback. A compensation entry is
//! redo-only: it installs the before-image of the mutation it undoes and
//! is never undone itself. Because undo always runs newest-first, the
//! number of compensation entries a transaction already has tells how many
//! of its newest mutations are already rolled back.

use crate::storage::wal::{LogEntry, LogType};
use crate::transaction::TransactionId;

/// Builds the compensation entry that undoes `entry`.
pub fn compensation_for(entry: &LogEntry) -> LogEntry {
    LogEntry::new(
        entry.txn_id,
        LogType::Compensation,
        entry.page_id,
        entry.after_image.clone(),
        entry.before_image.clone(),
    )
}

/// Mutations of `txn_id` that still have to be undone, newest first.
pub fn pending_undo(entries: &[LogEntry], txn_id: TransactionId) -> Vec<&LogEntry> {
    let mutations: Vec<&LogEntry> = entries
        .iter()
        .filter(|e| e.txn_id == txn_id && e.entry_type.is_undoable())
        .collect();
    let compensated = entries
        .iter()
        .filter(|e| e.txn_id == txn_id && e.entry_type == LogType::Compensation)
        .count();

    let remaining = mutations.len().saturating_sub(compensated);
    mutations[..remaining].iter().rev().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageId;
    use crate::storage::wal::Lsn;

    fn entry(lsn: u64, txn: u64, entry_type: LogType, page: u64) -> LogEntry {
        let mut e = LogEntry::new(
            TransactionId(txn),
            entry_type,
            PageId(page),
            vec![lsn as u8],
            vec![lsn as u8 + 100],
        );
        e.lsn = Lsn(lsn);
        e
    }

    #[test]
    fn test_compensation_swaps_images() {
        let original = entry(4, 1, LogType::Update, 2);
        let clr = compensation_for(&original);
        assert_eq!(clr.entry_type, LogType::Compensation);
        assert_eq!(clr.txn_id, TransactionId(1));
        assert_eq!(clr.page_id, PageId(2));
        assert_eq!(clr.after_image, original.before_image);
        assert_eq!(clr.before_image, original.after_image);
        assert!(clr.lsn.is_invalid());
    }

    #[test]
    fn test_pending_undo_order() {
        let entries = vec![
            entry(1, 1, LogType::Begin, 0),
            entry(2, 1, LogType::Insert, 0),
            entry(3, 2, LogType::Insert, 1),
            entry(4, 1, LogType::Update, 0),
            entry(5, 1, LogType::Delete, 3),
        ];
        let pending: Vec<Lsn> = pending_undo(&entries, TransactionId(1))
            .iter()
            .map(|e| e.lsn)
            .collect();
        assert_eq!(pending, vec![Lsn(5), Lsn(4), Lsn(2)]);
    }

    #[test]
    fn test_pending_undo_skips_compensated() {
        let mut entries = vec![
            entry(1, 1, LogType::Insert, 0),
            entry(2, 1, LogType::Insert, 0),
            entry(3, 1, LogType::Insert, 1),
        ];
        entries.push(compensation_for(&entries[2]));

        let pending: Vec<Lsn> = pending_undo(&entries, TransactionId(1))
            .iter()
            .map(|e| e.lsn)
            .collect();
        assert_eq!(pending, vec![Lsn(2), Lsn(1)]);
    }
}
