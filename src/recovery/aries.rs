//! ARIES-style crash recovery.
//!
//! 1. Analysis: find the last checkpoint and the transactions that never
//!    reached a Commit or Abort entry
//! 2. Redo: reinstall the after-image of every page mutation from the redo
//!    start onwards, whether or not its transaction committed
//! 3. Undo: roll back the losers newest-first, logging a compensation entry
//!    per undone mutation, then close each with an Abort entry
//!
//! Images are whole pages, so redo is a plain overwrite and running recovery
//! twice leaves the pages as running it once.

use std::collections::{BTreeSet, HashSet};

use log::{debug, info};
use thiserror::Error;

use super::log_record::{compensation_for, pending_undo};
use crate::storage::error::{StorageError, WalError};
use crate::storage::page::PageId;
use crate::storage::store::PageStore;
use crate::storage::wal::{Checkpoint, LogEntry, LogType, Lsn, WalManager};
use crate::storage::StorageResult;
use crate::transaction::TransactionId;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("WAL error during recovery: {0}")]
    Wal(#[from] WalError),

    #[error("Storage error during recovery: {0}")]
    Storage(#[from] StorageError),

    #[error("Unreadable checkpoint at {lsn}: {source}")]
    Checkpoint { lsn: Lsn, source: WalError },
}

/// Where recovery installs page images.
pub trait RecoveryTarget {
    /// Overwrites a page with `image`, creating the page if the data file
    /// does not reach it yet.
    fn install_image(&self, page_id: PageId, image: &[u8], lsn: Lsn) -> StorageResult<()>;

    /// Makes every installed image durable.
    fn flush_all(&self) -> StorageResult<()>;
}

impl RecoveryTarget for PageStore {
    fn install_image(&self, page_id: PageId, image: &[u8], lsn: Lsn) -> StorageResult<()> {
        PageStore::install_image(self, page_id, image, lsn)
    }

    fn flush_all(&self) -> StorageResult<()> {
        PageStore::flush_all(self)
    }
}

/// Recovery statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    pub records_analyzed: usize,
    pub records_redone: usize,
    pub records_undone: usize,
    pub clrs_written: usize,
    pub transactions_rolled_back: usize,
    pub checkpoint_lsn: Option<Lsn>,
    pub redo_start_lsn: Lsn,
    /// Highest transaction id seen in the log.
    pub max_transaction_id: TransactionId,
    pub recovery_end_lsn: Lsn,
}

struct Analysis {
    losers: BTreeSet<TransactionId>,
    redo_start: Lsn,
}

pub struct RecoveryManager<'a, T: RecoveryTarget> {
    wal: &'a WalManager,
    target: &'a T,
}

impl<'a, T: RecoveryTarget> RecoveryManager<'a, T> {
    pub fn new(wal: &'a WalManager, target: &'a T) -> Self {
        Self { wal, target }
    }

    pub fn recover(&self) -> Result<RecoveryStats, RecoveryError> {
        let mut stats = RecoveryStats::default();
        let entries = self.wal.read_entries()?;

        if entries.is_empty() {
            debug!("WAL is empty, nothing to recover");
            return Ok(stats);
        }
        info!("Starting recovery over {} log entries", entries.len());

        let analysis = self.analysis_phase(&entries, &mut stats)?;
        self.redo_phase(&entries, analysis.redo_start, &mut stats)?;
        self.undo_phase(&entries, &analysis.losers, &mut stats)?;

        self.target.flush_all()?;
        self.wal.sync()?;
        stats.recovery_end_lsn = self.wal.current_lsn();

        info!(
            "Recovery complete: {} redone, {} undone, {} transactions rolled back",
            stats.records_redone, stats.records_undone, stats.transactions_rolled_back
        );
        Ok(stats)
    }

    fn analysis_phase(
        &self,
        entries: &[LogEntry],
        stats: &mut RecoveryStats,
    ) -> Result<Analysis, RecoveryError> {
        let checkpoint = match entries
            .iter()
            .rev()
            .find(|e| e.entry_type == LogType::Checkpoint)
        {
            Some(entry) => Some(
                Checkpoint::decode(&entry.after_image).map_err(|source| {
                    RecoveryError::Checkpoint {
                        lsn: entry.lsn,
                        source,
                    }
                })?,
            ),
            None => None,
        };

        let (mut losers, scan_from, redo_start) = match &checkpoint {
            Some(cp) => (
                cp.active_transactions.iter().copied().collect::<BTreeSet<_>>(),
                cp.lsn.next(),
                cp.redo_start(),
            ),
            None => (BTreeSet::new(), Lsn(1), Lsn(1)),
        };
        stats.checkpoint_lsn = checkpoint.as_ref().map(|cp| cp.lsn);
        stats.redo_start_lsn = redo_start;

        for entry in entries.iter().filter(|e| e.lsn >= scan_from) {
            stats.records_analyzed += 1;
            match entry.entry_type {
                LogType::Begin => {
                    losers.insert(entry.txn_id);
                }
                LogType::Commit | LogType::Abort => {
                    losers.remove(&entry.txn_id);
                }
                _ => {}
            }
        }

        // A transaction can end between the checkpoint's start and the
        // moment its active list was taken.
        let ended: HashSet<TransactionId> = entries
            .iter()
            .filter(|e| matches!(e.entry_type, LogType::Commit | LogType::Abort))
            .map(|e| e.txn_id)
            .collect();
        losers.retain(|txn| !ended.contains(txn));

        stats.max_transaction_id = entries
            .iter()
            .map(|e| e.txn_id)
            .max()
            .unwrap_or(TransactionId::INVALID);

        debug!(
            "Analysis: checkpoint {:?}, redo from {}, {} losers",
            stats.checkpoint_lsn,
            redo_start,
            losers.len()
        );

        Ok(Analysis { losers, redo_start })
    }

    fn redo_phase(
        &self,
        entries: &[LogEntry],
        redo_start: Lsn,
        stats: &mut RecoveryStats,
    ) -> Result<(), RecoveryError> {
        for entry in entries
            .iter()
            .filter(|e| e.lsn >= redo_start && e.entry_type.is_redoable())
        {
            self.target
                .install_image(entry.page_id, &entry.after_image, entry.lsn)?;
            stats.records_redone += 1;
        }
        debug!("Redo: reinstalled {} page images", stats.records_redone);
        Ok(())
    }

    fn undo_phase(
        &self,
        entries: &[LogEntry],
        losers: &BTreeSet<TransactionId>,
        stats: &mut RecoveryStats,
    ) -> Result<(), RecoveryError> {
        for &txn_id in losers.iter().rev() {
            let pending = pending_undo(entries, txn_id);
            debug!("Undo: rolling back {} ({} mutations)", txn_id, pending.len());

            for entry in pending {
                let clr = compensation_for(entry);
                let page_id = clr.page_id;
                let image = clr.after_image.clone();
                let lsn = self.wal.write(clr)?;
                self.target.install_image(page_id, &image, lsn)?;
                stats.clrs_written += 1;
                stats.records_undone += 1;
            }

            self.wal.write(LogEntry::abort(txn_id))?;
            stats.transactions_rolled_back += 1;
        }
        Ok(())
    }
}
