//! Fuzzy checkpoint bodies.

use crate::storage::error::WalResult;
use crate::storage::page::PageId;
use crate::storage::wal::Lsn;
use crate::transaction::TransactionId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyPage {
    pub page_id: PageId,
    /// First LSN that dirtied the page since it was last written back.
    pub rec_lsn: Lsn,
}

/// Snapshot stored as the after-image of a `Checkpoint` log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last LSN assigned when the checkpoint started. Everything after it
    /// may be missing from the dirty page snapshot.
    pub lsn: Lsn,
    pub timestamp: u64,
    pub dirty_pages: Vec<DirtyPage>,
    pub active_transactions: Vec<TransactionId>,
}

impl Checkpoint {
    pub fn encode(&self) -> WalResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> WalResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Where redo has to start so that no change missing from disk is
    /// skipped.
    pub fn redo_start(&self) -> Lsn {
        self.dirty_pages
            .iter()
            .map(|page| page.rec_lsn)
            .fold(self.lsn.next(), std::cmp::min)
    }
}
