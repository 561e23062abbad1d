use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::recovery::compensation_for;
use crate::storage::buffer::BufferCache;
use crate::storage::disk::PageManager;
use crate::storage::error::StorageResult;
use crate::storage::page::{Page, PageId, PageRef, PAGE_SIZE};
use crate::storage::wal::{DirtyPage, LogEntry, LogType, Lsn, WalManager};
use crate::transaction::TransactionId;

/// Page access for the engine: cache lookups, disk I/O and logged
/// mutations.
///
/// Lock order is cache, then page latch, then WAL, then the data file.
pub struct PageStore {
    cache: Mutex<BufferCache>,
    disk: Mutex<PageManager>,
    wal: Arc<WalManager>,
}

impl PageStore {
    pub fn new(disk: PageManager, wal: Arc<WalManager>, cache_capacity: usize) -> Self {
        Self {
            cache: Mutex::new(BufferCache::new(cache_capacity)),
            disk: Mutex::new(disk),
            wal,
        }
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    pub fn num_pages(&self) -> StorageResult<u64> {
        self.disk.lock().num_pages()
    }

    /// Extends the data file by one page and caches an empty page for it.
    pub fn allocate_page(&self) -> StorageResult<PageRef> {
        let mut cache = self.cache.lock();
        let page_id = self.disk.lock().allocate_page()?;
        debug!("Allocated page {}", page_id);

        let (page, evicted) = cache.put(Page::new(page_id));
        self.write_back_evicted(&mut cache, evicted)?;
        Ok(page)
    }

    /// Returns the cached page, reading it from disk on a miss.
    pub fn get_page(&self, page_id: PageId) -> StorageResult<PageRef> {
        let mut cache = self.cache.lock();
        if let Some(page) = cache.get(page_id) {
            return Ok(page);
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        self.disk.lock().read_page(page_id, &mut buf)?;
        let (page, evicted) = cache.put(Page::from_bytes(page_id, &buf)?);
        self.write_back_evicted(&mut cache, evicted)?;
        Ok(page)
    }

    /// Like `get_page`, but first grows the data file so that `page_id`
    /// exists. Used when replaying the log.
    pub fn get_or_extend_page(&self, page_id: PageId) -> StorageResult<PageRef> {
        self.disk.lock().ensure_capacity(page_id)?;
        self.get_page(page_id)
    }

    /// Writes an evicted page back. On failure the page goes back into the
    /// cache, so the only copy of its changes is not dropped.
    fn write_back_evicted(
        &self,
        cache: &mut BufferCache,
        evicted: Option<PageRef>,
    ) -> StorageResult<()> {
        let Some(page) = evicted else {
            return Ok(());
        };
        if let Err(e) = self.write_page(&page) {
            warn!("Failed to write back evicted page: {}", e);
            cache.restore(page);
            return Err(e);
        }
        Ok(())
    }

    /// Writes a dirty page back to disk after forcing the log up to the
    /// page's LSN. Clean pages are left alone.
    pub fn write_page(&self, page: &PageRef) -> StorageResult<()> {
        let mut page = page.write();
        if !page.is_dirty() {
            return Ok(());
        }

        self.wal.flush_to(page.page_lsn())?;
        self.disk.lock().write_page(page.id(), page.data())?;
        page.mark_clean();
        Ok(())
    }

    /// Writes back every dirty cached page and syncs the data file.
    pub fn flush_all(&self) -> StorageResult<()> {
        let pages = self.cache.lock().pages();
        for page in &pages {
            self.write_page(page)?;
        }
        self.disk.lock().sync()?;
        Ok(())
    }

    /// Applies `mutate` to a copy of the page, logs the before and after
    /// images, then installs the after image.
    ///
    /// This is the only way page content changes outside of replay, so no
    /// page is ever dirtier than the log.
    pub fn log_and_apply<T, F>(
        &self,
        page: &PageRef,
        txn_id: TransactionId,
        entry_type: LogType,
        mutate: F,
    ) -> StorageResult<(T, LogEntry)>
    where
        F: FnOnce(&mut [u8]) -> StorageResult<T>,
    {
        let mut guard = page.write();
        let before = guard.data().to_vec();
        let mut after = before.clone();
        let output = mutate(&mut after)?;

        let mut entry = LogEntry::new(txn_id, entry_type, guard.id(), before, after);
        entry.lsn = self.wal.write(entry.clone())?;
        guard.apply_image(&entry.after_image, entry.lsn)?;

        Ok((output, entry))
    }

    /// Logs a compensation entry for `entry` and installs the before-image
    /// it restores.
    pub fn compensate(&self, entry: &LogEntry) -> StorageResult<Lsn> {
        let clr = compensation_for(entry);
        let image = clr.after_image.clone();
        let page = self.get_page(clr.page_id)?;
        let mut guard = page.write();
        let lsn = self.wal.write(clr)?;
        guard.apply_image(&image, lsn)?;
        Ok(lsn)
    }

    /// Installs a page image for a log entry that is already in the WAL.
    pub fn install_image(&self, page_id: PageId, image: &[u8], lsn: Lsn) -> StorageResult<()> {
        let page = self.get_or_extend_page(page_id)?;
        let mut page = page.write();
        page.apply_image(image, lsn)
    }

    pub fn dirty_pages(&self) -> Vec<DirtyPage> {
        self.cache
            .lock()
            .dirty_pages()
            .into_iter()
            .map(|(page_id, rec_lsn)| DirtyPage { page_id, rec_lsn })
            .collect()
    }

    /// Writes a fuzzy checkpoint. `start_lsn` must be taken before
    /// `active_transactions` was collected.
    pub fn checkpoint(
        &self,
        start_lsn: Lsn,
        active_transactions: Vec<TransactionId>,
    ) -> StorageResult<Lsn> {
        let dirty_pages = self.dirty_pages();
        Ok(self
            .wal
            .create_checkpoint(start_lsn, dirty_pages, active_transactions)?)
    }
}
