//! Table catalog.
//!
//! Table definitions and page ownership are kept in memory and persisted to
//! a sidecar file next to the data file. The sidecar is rewritten through a
//! temporary file and a rename, so it is always either the old or the new
//! version.

pub mod column_info;
pub mod table_info;

pub use column_info::Column;
pub use table_info::{TableId, TableInfo};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Serialize, Deserialize)]
struct CatalogSnapshot {
    next_table_id: u32,
    tables: Vec<TableInfo>,
}

pub struct Catalog {
    path: PathBuf,
    tables: DashMap<String, TableInfo>,
    next_table_id: AtomicU32,
    save_lock: Mutex<()>,
}

impl Catalog {
    /// Loads the catalog stored at `path`, or starts an empty one.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let snapshot = if path.exists() {
            let bytes = fs::read(path)?;
            bincode::deserialize::<CatalogSnapshot>(&bytes)
                .map_err(|e| StorageError::Catalog(format!("{:?}: {}", path, e)))?
        } else {
            CatalogSnapshot {
                next_table_id: 1,
                tables: Vec::new(),
            }
        };

        debug!("Loaded {} tables from catalog {:?}", snapshot.tables.len(), path);

        let tables = DashMap::new();
        for table in snapshot.tables {
            tables.insert(table.name.clone(), table);
        }

        Ok(Self {
            path: path.to_path_buf(),
            tables,
            next_table_id: AtomicU32::new(snapshot.next_table_id),
            save_lock: Mutex::new(()),
        })
    }

    pub fn create_table(
        &self,
        name: &str,
        columns: Vec<Column>,
        primary_key: Option<usize>,
    ) -> StorageResult<TableInfo> {
        if columns.is_empty() {
            return Err(StorageError::Catalog(format!(
                "table {} must have at least one column",
                name
            )));
        }

        let mut table = TableInfo {
            table_id: TableId(0),
            name: name.to_string(),
            columns,
            primary_key,
            page_ids: Vec::new(),
        };
        if !table.primary_key_is_indexable() {
            return Err(StorageError::Catalog(format!(
                "primary key of {} must be an integer column",
                name
            )));
        }

        match self.tables.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(StorageError::TableAlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                table.table_id = TableId(self.next_table_id.fetch_add(1, Ordering::SeqCst));
                slot.insert(table.clone());
            }
        }

        self.save()?;
        Ok(table)
    }

    pub fn table(&self, name: &str) -> StorageResult<TableInfo> {
        self.tables
            .get(name)
            .map(|t| t.value().clone())
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }

    pub fn page_ids(&self, name: &str) -> StorageResult<Vec<PageId>> {
        self.tables
            .get(name)
            .map(|t| t.page_ids.clone())
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }

    /// Records that `page_id` belongs to `name` and persists the change.
    pub fn add_page(&self, name: &str, page_id: PageId) -> StorageResult<()> {
        {
            let mut table = self
                .tables
                .get_mut(name)
                .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;
            if !table.page_ids.contains(&page_id) {
                table.page_ids.push(page_id);
            }
        }
        self.save()
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    pub fn save(&self) -> StorageResult<()> {
        let _guard = self.save_lock.lock();

        let mut tables: Vec<TableInfo> = self.tables.iter().map(|t| t.value().clone()).collect();
        tables.sort_by_key(|t| t.table_id);
        let snapshot = CatalogSnapshot {
            next_table_id: self.next_table_id.load(Ordering::SeqCst),
            tables,
        };
        let bytes = bincode::serialize(&snapshot).map_err(|e| StorageError::Catalog(e.to_string()))?;

        let tmp_path = self.path.with_extension("catalog.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
