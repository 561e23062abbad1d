use crate::access::{BTree, Record, RecordId};
use crate::catalog::{Catalog, Column, TableInfo};
use crate::recovery::{RecoveryManager, RecoveryStats};
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::layout::{HEADER_SIZE, SLOT_SIZE};
use crate::storage::page::{PageId, PageLayout, PageRef, PAGE_SIZE};
use crate::storage::store::PageStore;
use crate::storage::wal::{LogEntry, LogType, Lsn, WalConfig, WalManager};
use crate::transaction::{
    TransactionId, TransactionIdGenerator, TransactionInfo, TransactionTable, UndoRecord,
};
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Largest encoded record a single empty page can hold.
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - 2 * HEADER_SIZE - SLOT_SIZE;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Number of pages kept in the buffer cache.
    pub cache_capacity: usize,
    /// Minimum degree of the primary-key B-trees.
    pub btree_degree: usize,
    /// Defaults to the data file path with `.wal` appended.
    pub wal_path: Option<PathBuf>,
    pub wal: WalConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            btree_degree: 32,
            wal_path: None,
            wal: WalConfig::default(),
        }
    }
}

/// Storage engine over a single data file, its WAL and its catalog.
///
/// Every page mutation goes through the WAL first. Opening runs crash
/// recovery before any request is served. Rows are addressed by
/// `RecordId`; tables with an integer primary key also get a B-tree index
/// that is rebuilt from the data on open.
pub struct Database {
    path: PathBuf,
    store: PageStore,
    catalog: Catalog,
    indexes: DashMap<String, RwLock<BTree>>,
    transactions: TransactionTable,
    txn_ids: TransactionIdGenerator,
    btree_degree: usize,
    recovery_stats: RecoveryStats,
}

fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

impl Database {
    /// Create a new database at the specified path
    pub fn create(path: &Path, config: DatabaseConfig) -> StorageResult<Self> {
        if path.exists() {
            return Err(StorageError::InvalidConfig(format!(
                "database file already exists at {:?}",
                path
            )));
        }
        Self::open(path, config)
    }

    /// Opens the database at `path`, creating it when missing, and recovers
    /// it from the WAL.
    pub fn open(path: &Path, config: DatabaseConfig) -> StorageResult<Self> {
        if config.cache_capacity == 0 {
            return Err(StorageError::InvalidConfig(
                "cache capacity must be positive".to_string(),
            ));
        }
        if BTree::new(config.btree_degree).is_none() {
            return Err(StorageError::InvalidConfig(format!(
                "B-tree degree must be at least 2, got {}",
                config.btree_degree
            )));
        }

        let wal_path = config
            .wal_path
            .clone()
            .unwrap_or_else(|| sidecar_path(path, "wal"));

        let page_manager = PageManager::open(path)?;
        let wal = Arc::new(WalManager::open(&wal_path, config.wal.clone())?);
        let store = PageStore::new(page_manager, wal, config.cache_capacity);
        let catalog = Catalog::open(&sidecar_path(path, "catalog"))?;

        let recovery_stats = RecoveryManager::new(store.wal(), &store).recover()?;

        let db = Self {
            path: path.to_path_buf(),
            store,
            catalog,
            indexes: DashMap::new(),
            transactions: TransactionTable::new(),
            txn_ids: TransactionIdGenerator::starting_after(recovery_stats.max_transaction_id),
            btree_degree: config.btree_degree,
            recovery_stats,
        };

        for table in db.catalog.list_tables() {
            db.rebuild_index(&table)?;
        }

        info!(
            "Opened database {:?} ({} pages, {} tables)",
            db.path,
            db.store.num_pages()?,
            db.catalog.list_tables().len()
        );
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery_stats
    }

    pub fn allocate_page(&self) -> StorageResult<PageRef> {
        self.store.allocate_page()
    }

    pub fn get_page(&self, page_id: PageId) -> StorageResult<PageRef> {
        self.store.get_page(page_id)
    }

    /// Writes a page back if it is dirty, flushing the WAL ahead of it.
    pub fn write_page(&self, page: &PageRef) -> StorageResult<()> {
        self.store.write_page(page)
    }

    pub fn create_table(
        &self,
        name: &str,
        columns: Vec<Column>,
        primary_key: Option<usize>,
    ) -> StorageResult<TableInfo> {
        let table = self.catalog.create_table(name, columns, primary_key)?;
        if table.primary_key.is_some() {
            self.indexes
                .insert(name.to_string(), RwLock::new(self.new_index()?));
        }
        debug!("Created table {} ({:?})", name, table.table_id);
        Ok(table)
    }

    pub fn table(&self, name: &str) -> StorageResult<TableInfo> {
        self.catalog.table(name)
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.catalog.list_tables()
    }

    pub fn begin(&self) -> StorageResult<TransactionId> {
        let txn_id = self.txn_ids.next();
        self.transactions.register(txn_id);
        if let Err(e) = self.store.wal().write(LogEntry::begin(txn_id)) {
            if let Ok(info) = self.transactions.finish(txn_id) {
                self.transactions.release_pages(&info);
            }
            return Err(e.into());
        }
        Ok(txn_id)
    }

    /// Commits `txn_id`. The commit entry is on disk when this returns.
    pub fn commit(&self, txn_id: TransactionId) -> StorageResult<()> {
        self.transactions.ensure_active(txn_id)?;
        self.store.wal().write(LogEntry::commit(txn_id))?;
        let info = self.transactions.finish(txn_id)?;
        self.transactions.release_pages(&info);
        Ok(())
    }

    /// Rolls back every change `txn_id` made, newest first.
    ///
    /// The transaction ends and its pages are released even when rollback
    /// fails; recovery finishes the undo on the next open.
    pub fn abort(&self, txn_id: TransactionId) -> StorageResult<()> {
        let info = self.transactions.finish(txn_id)?;
        let rolled_back = self.roll_back(&info);
        self.transactions.release_pages(&info);
        let touched = rolled_back?;

        for table in touched {
            self.rebuild_index(table)?;
        }
        debug!(
            "Aborted {} after {:?}, undid {} changes",
            txn_id,
            info.duration(),
            info.undo_log.len()
        );
        Ok(())
    }

    /// Compensates every logged change of `info` and writes its Abort entry.
    /// Returns the tables whose indexes need rebuilding.
    fn roll_back<'a>(&self, info: &'a TransactionInfo) -> StorageResult<BTreeSet<&'a str>> {
        let mut touched = BTreeSet::new();
        for record in info.undo_log.iter().rev() {
            self.store.compensate(&record.entry)?;
            touched.insert(record.table.as_str());
        }
        self.store.wal().write(LogEntry::abort(info.id))?;
        Ok(touched)
    }

    pub fn insert_record(
        &self,
        txn_id: TransactionId,
        table: &str,
        record: &Record,
    ) -> StorageResult<RecordId> {
        self.transactions.ensure_active(txn_id)?;
        let info = self.catalog.table(table)?;
        let bytes = Self::encode_for(&info, record)?;

        let rid = self.place_record(txn_id, &info, &bytes, LogType::Insert)?;
        self.index_record(&info, record, rid);
        Ok(rid)
    }

    pub fn get_record(&self, table: &str, rid: RecordId) -> StorageResult<Record> {
        let info = self.catalog.table(table)?;
        Self::check_owner(&info, rid)?;

        let page = self.store.get_page(rid.page_id)?;
        let page = page.read();
        let layout = page.layout()?;
        let slot = layout.slot(rid.slot)?;
        if slot.is_deleted() {
            return Err(StorageError::RecordDeleted {
                page_id: rid.page_id,
                slot_id: rid.slot,
            });
        }
        Record::decode(&page.data()[slot.range()])
    }

    pub fn delete_record(
        &self,
        txn_id: TransactionId,
        table: &str,
        rid: RecordId,
    ) -> StorageResult<()> {
        self.transactions.ensure_active(txn_id)?;
        let info = self.catalog.table(table)?;
        Self::check_owner(&info, rid)?;
        self.transactions.claim_page(txn_id, rid.page_id)?;

        let page = self.store.get_page(rid.page_id)?;
        let (_, entry) = self
            .store
            .log_and_apply(&page, txn_id, LogType::Delete, |data| {
                let mut layout = PageLayout::deserialize(data)?;
                if layout.slot(rid.slot)?.is_deleted() {
                    return Err(StorageError::RecordDeleted {
                        page_id: rid.page_id,
                        slot_id: rid.slot,
                    });
                }
                layout.mark_deleted(rid.slot)?;
                layout.write_to(data);
                Ok(())
            })?;

        self.transactions.record_undo(
            txn_id,
            UndoRecord {
                table: info.name,
                entry,
            },
        )
    }

    /// Replaces the record at `rid`. The record stays in place when the new
    /// encoding fits in the old slot; otherwise it moves and the new
    /// location is returned.
    pub fn update_record(
        &self,
        txn_id: TransactionId,
        table: &str,
        rid: RecordId,
        record: &Record,
    ) -> StorageResult<RecordId> {
        self.transactions.ensure_active(txn_id)?;
        let info = self.catalog.table(table)?;
        Self::check_owner(&info, rid)?;
        let bytes = Self::encode_for(&info, record)?;
        self.transactions.claim_page(txn_id, rid.page_id)?;

        let page = self.store.get_page(rid.page_id)?;
        let in_place = self
            .store
            .log_and_apply(&page, txn_id, LogType::Update, |data| {
                let mut layout = PageLayout::deserialize(data)?;
                if layout.slot(rid.slot)?.is_deleted() {
                    return Err(StorageError::RecordDeleted {
                        page_id: rid.page_id,
                        slot_id: rid.slot,
                    });
                }
                let slot = layout.resize_in_place(rid.slot, bytes.len())?;
                data[slot.range()].copy_from_slice(&bytes);
                layout.write_to(data);
                Ok(())
            });
        drop(page);

        let new_rid = match in_place {
            Ok((_, entry)) => {
                self.transactions.record_undo(
                    txn_id,
                    UndoRecord {
                        table: info.name.clone(),
                        entry,
                    },
                )?;
                rid
            }
            Err(StorageError::InsufficientSpace { .. }) => {
                self.delete_record(txn_id, table, rid)?;
                let moved = self.place_record(txn_id, &info, &bytes, LogType::Update)?;
                debug!("Record {} moved to {} on update", rid, moved);
                moved
            }
            Err(e) => return Err(e),
        };

        self.index_record(&info, record, new_rid);
        Ok(new_rid)
    }

    /// Every live record of `table` in page and slot order.
    pub fn scan_table(&self, table: &str) -> StorageResult<Vec<(RecordId, Record)>> {
        let mut records = Vec::new();
        for page_id in self.catalog.page_ids(table)? {
            let page = self.store.get_page(page_id)?;
            let page = page.read();
            let layout = page.layout()?;
            for (slot_id, slot) in layout.iter() {
                if slot.is_deleted() {
                    continue;
                }
                let record = Record::decode(&page.data()[slot.range()])?;
                records.push((RecordId::new(page_id, slot_id), record));
            }
        }
        Ok(records)
    }

    /// Finds the live record whose primary key is `key`.
    pub fn lookup(&self, table: &str, key: i64) -> StorageResult<Option<(RecordId, Record)>> {
        let info = self.catalog.table(table)?;
        if info.primary_key.is_none() {
            return Err(StorageError::Catalog(format!(
                "table {} has no primary key",
                table
            )));
        }

        let Some(rid) = self
            .indexes
            .get(table)
            .and_then(|index| index.read().search(key))
        else {
            return Ok(None);
        };

        // Deletes and key-changing updates leave stale index entries.
        match self.get_record(table, rid) {
            Ok(record) if info.key_of(&record) == Some(key) => Ok(Some((rid, record))),
            Ok(_) | Err(StorageError::RecordDeleted { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Writes a fuzzy checkpoint to the WAL.
    pub fn checkpoint(&self) -> StorageResult<Lsn> {
        let start_lsn = self.store.wal().current_lsn();
        let active = self.transactions.active_ids();
        self.store.checkpoint(start_lsn, active)
    }

    /// Flush all dirty pages to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.store.flush_all()?;
        self.store.wal().sync()?;
        self.catalog.save()
    }

    pub fn close(self) -> StorageResult<()> {
        if !self.transactions.is_empty() {
            warn!(
                "Closing with {} active transactions; they will be rolled back on next open",
                self.transactions.len()
            );
        }
        self.flush()
    }

    fn new_index(&self) -> StorageResult<BTree> {
        BTree::new(self.btree_degree).ok_or_else(|| {
            StorageError::InvalidConfig(format!("invalid B-tree degree {}", self.btree_degree))
        })
    }

    fn encode_for(info: &TableInfo, record: &Record) -> StorageResult<Vec<u8>> {
        record.validate(&info.columns)?;
        let bytes = record.encode()?;
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge {
                size: bytes.len(),
                max: MAX_RECORD_SIZE,
            });
        }
        Ok(bytes)
    }

    fn check_owner(info: &TableInfo, rid: RecordId) -> StorageResult<()> {
        if info.page_ids.contains(&rid.page_id) {
            Ok(())
        } else {
            Err(StorageError::PageNotFound(rid.page_id))
        }
    }

    /// Puts `bytes` on the first table page with room that no other
    /// transaction is writing, allocating a new page when there is none.
    fn place_record(
        &self,
        txn_id: TransactionId,
        info: &TableInfo,
        bytes: &[u8],
        entry_type: LogType,
    ) -> StorageResult<RecordId> {
        for &page_id in &info.page_ids {
            if matches!(self.transactions.page_owner(page_id), Some(owner) if owner != txn_id) {
                continue;
            }
            let page = self.store.get_page(page_id)?;
            if !page.read().layout()?.can_fit(bytes.len()) {
                continue;
            }
            match self.transactions.claim_page(txn_id, page_id) {
                Err(StorageError::PageLocked { .. }) => continue,
                result => result?,
            }
            match self.write_into_page(txn_id, &info.name, &page, bytes, entry_type) {
                Err(StorageError::InsufficientSpace { .. }) => continue,
                result => return result,
            }
        }

        let page = self.store.allocate_page()?;
        let page_id = page.read().id();
        self.transactions.claim_page(txn_id, page_id)?;
        self.catalog.add_page(&info.name, page_id)?;
        self.write_into_page(txn_id, &info.name, &page, bytes, entry_type)
    }

    fn write_into_page(
        &self,
        txn_id: TransactionId,
        table: &str,
        page: &PageRef,
        bytes: &[u8],
        entry_type: LogType,
    ) -> StorageResult<RecordId> {
        let (slot_id, entry) = self.store.log_and_apply(page, txn_id, entry_type, |data| {
            let mut layout = PageLayout::deserialize(data)?;
            let (slot_id, slot) = layout.find_free_slot(bytes.len())?;
            data[slot.range()].copy_from_slice(bytes);
            layout.write_to(data);
            Ok(slot_id)
        })?;

        let rid = RecordId::new(entry.page_id, slot_id);
        self.transactions.record_undo(
            txn_id,
            UndoRecord {
                table: table.to_string(),
                entry,
            },
        )?;
        Ok(rid)
    }

    fn index_record(&self, info: &TableInfo, record: &Record, rid: RecordId) {
        if let (Some(key), Some(index)) = (info.key_of(record), self.indexes.get(&info.name)) {
            index.write().insert(key, rid);
        }
    }

    fn rebuild_index(&self, table: &str) -> StorageResult<()> {
        let info = self.catalog.table(table)?;
        if info.primary_key.is_none() {
            return Ok(());
        }

        let empty = self.new_index()?;
        self.indexes
            .entry(table.to_string())
            .or_insert_with(|| RwLock::new(empty));
        let Some(slot) = self.indexes.get(table) else {
            return Ok(());
        };

        // Held until the rebuilt tree is installed; writers index under it.
        let mut current = slot.write();
        let mut index = self.new_index()?;
        for (rid, record) in self.scan_table(table)? {
            if let Some(key) = info.key_of(&record) {
                index.insert(key, rid);
            }
        }
        debug!("Rebuilt index on {} with {} keys", table, index.len());
        *current = index;
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.flush();
    }
}
