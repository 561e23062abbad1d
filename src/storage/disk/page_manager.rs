use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, PAGE_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Page-granular access to the single data file. Page `n` lives at byte
/// offset `n * PAGE_SIZE`.
pub struct PageManager {
    file: File,
}

impl PageManager {
    /// Opens the data file, creating it when missing.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self { file })
    }

    /// Opens an existing data file without write access, so every write
    /// fails.
    #[cfg(test)]
    pub(crate) fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self { file })
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);

        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        if offset + PAGE_SIZE as u64 > file_size {
            return Err(StorageError::PageNotFound(page_id));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;

        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);

        let offset = Self::page_offset(page_id);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;

        Ok(())
    }

    pub fn num_pages(&self) -> StorageResult<u64> {
        let file_size = self.file.metadata()?.len();
        Ok(file_size / PAGE_SIZE as u64)
    }

    pub fn allocate_page(&mut self) -> StorageResult<PageId> {
        let current_pages = self.num_pages()?;
        let new_page_id = PageId(current_pages);

        let new_size = (current_pages + 1) * PAGE_SIZE as u64;
        self.file.set_len(new_size)?;

        Ok(new_page_id)
    }

    /// Grows the file so that `page_id` is addressable. Recovery uses this
    /// for pages whose allocation never reached the disk.
    pub fn ensure_capacity(&mut self, page_id: PageId) -> StorageResult<()> {
        let required = (page_id.0 + 1) * PAGE_SIZE as u64;
        if self.file.metadata()?.len() < required {
            self.file.set_len(required)?;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 * PAGE_SIZE as u64
    }
}
