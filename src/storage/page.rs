pub mod layout;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::wal::Lsn;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use layout::{PageHeader, PageLayout, SlotEntry};

pub const PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A page shared between the cache and its users. The lock doubles as the
/// page latch.
pub type PageRef = Arc<RwLock<Page>>;

/// One fixed-size page held in memory.
///
/// `page_lsn` is the LSN of the last log entry applied to the page and
/// `rec_lsn` is the first LSN that dirtied it since it was last written back.
/// Neither is persisted in the page bytes.
#[derive(Debug, Clone)]
pub struct Page {
    id: PageId,
    data: Box<[u8; PAGE_SIZE]>,
    is_dirty: bool,
    page_lsn: Lsn,
    rec_lsn: Option<Lsn>,
}

impl Page {
    /// A zeroed page with an empty slot directory.
    pub fn new(id: PageId) -> Self {
        let mut page = Self {
            id,
            data: Box::new([0u8; PAGE_SIZE]),
            is_dirty: false,
            page_lsn: Lsn::INVALID,
            rec_lsn: None,
        };
        PageLayout::new(PAGE_SIZE).write_to(page.data.as_mut_slice());
        page
    }

    pub fn from_bytes(id: PageId, bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(StorageError::CorruptPage(format!(
                "page {} has {} bytes, expected {}",
                id,
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(bytes);
        Ok(Self {
            id,
            data,
            is_dirty: false,
            page_lsn: Lsn::INVALID,
            rec_lsn: None,
        })
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn page_lsn(&self) -> Lsn {
        self.page_lsn
    }

    pub fn rec_lsn(&self) -> Option<Lsn> {
        self.rec_lsn
    }

    pub fn layout(&self) -> StorageResult<PageLayout> {
        PageLayout::deserialize(self.data.as_slice())
    }

    /// Installs a full page image produced by the log entry at `lsn`.
    pub fn apply_image(&mut self, image: &[u8], lsn: Lsn) -> StorageResult<()> {
        if image.len() != PAGE_SIZE {
            return Err(StorageError::CorruptPage(format!(
                "image for page {} has {} bytes, expected {}",
                self.id,
                image.len(),
                PAGE_SIZE
            )));
        }
        self.data.copy_from_slice(image);
        self.is_dirty = true;
        if lsn > self.page_lsn {
            self.page_lsn = lsn;
        }
        if self.rec_lsn.is_none() {
            self.rec_lsn = Some(lsn);
        }
        Ok(())
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
        self.rec_lsn = None;
    }
}
