//! Bookkeeping for transactions that have begun but not yet ended.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::id::TransactionId;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::storage::wal::LogEntry;

/// A logged page mutation, kept so a runtime abort can undo it.
#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub table: String,
    pub entry: LogEntry,
}

#[derive(Debug)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub start_time: Instant,
    /// Mutations in the order they were logged.
    pub undo_log: Vec<UndoRecord>,
    /// Pages this transaction has written.
    pub pages: BTreeSet<PageId>,
}

impl TransactionInfo {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            start_time: Instant::now(),
            undo_log: Vec::new(),
            pages: BTreeSet::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Active transaction table.
///
/// A page written by a transaction belongs to it until the transaction's
/// pages are released. Undo installs whole-page before images, so no other
/// transaction may write such a page in the meantime.
#[derive(Default)]
pub struct TransactionTable {
    active: DashMap<TransactionId, TransactionInfo>,
    page_owners: DashMap<PageId, TransactionId>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: TransactionId) {
        self.active.insert(id, TransactionInfo::new(id));
    }

    pub fn is_active(&self, id: TransactionId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn ensure_active(&self, id: TransactionId) -> StorageResult<()> {
        if self.is_active(id) {
            Ok(())
        } else {
            Err(StorageError::TransactionNotActive(id))
        }
    }

    pub fn record_undo(&self, id: TransactionId, record: UndoRecord) -> StorageResult<()> {
        let mut info = self
            .active
            .get_mut(&id)
            .ok_or(StorageError::TransactionNotActive(id))?;
        info.undo_log.push(record);
        Ok(())
    }

    /// Makes `id` the writer of `page_id`. Fails with `PageLocked` while
    /// another transaction owns the page.
    pub fn claim_page(&self, id: TransactionId, page_id: PageId) -> StorageResult<()> {
        let mut info = self
            .active
            .get_mut(&id)
            .ok_or(StorageError::TransactionNotActive(id))?;

        match self.page_owners.entry(page_id) {
            Entry::Occupied(entry) if *entry.get() != id => Err(StorageError::PageLocked {
                page_id,
                owner: *entry.get(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(id);
                info.pages.insert(page_id);
                Ok(())
            }
        }
    }

    pub fn page_owner(&self, page_id: PageId) -> Option<TransactionId> {
        self.page_owners.get(&page_id).map(|owner| *owner)
    }

    /// Gives up every page claimed by a finished transaction.
    pub fn release_pages(&self, info: &TransactionInfo) {
        for page_id in &info.pages {
            self.page_owners.remove_if(page_id, |_, owner| *owner == info.id);
        }
    }

    /// Removes `id` from the table, returning its state. Its pages stay
    /// claimed until `release_pages`.
    pub fn finish(&self, id: TransactionId) -> StorageResult<TransactionInfo> {
        self.active
            .remove(&id)
            .map(|(_, info)| info)
            .ok_or(StorageError::TransactionNotActive(id))
    }

    pub fn active_ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self.active.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
