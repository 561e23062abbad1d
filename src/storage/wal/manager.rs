//! WAL manager implementation.
//!
//! The WAL manager appends log entries to a single file, assigns LSNs and
//! makes entries durable on commit or on request.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::checkpoint::{Checkpoint, DirtyPage};
use super::record::{LogEntry, LogType, Lsn};
use crate::storage::error::{WalError, WalResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// WAL manager configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Whether to sync the log to disk on every commit.
    pub sync_on_commit: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            sync_on_commit: true,
        }
    }
}

struct WalInner {
    file: File,
    /// Last LSN handed out.
    current_lsn: Lsn,
    /// Every entry up to this LSN is on stable storage.
    flushed_lsn: Lsn,
    /// Length of the file up to the end of the last complete entry.
    len: u64,
    /// Set when a failed append left bytes that could not be cut off.
    poisoned: bool,
}

impl WalInner {
    /// Cuts anything past the last complete entry.
    fn discard_partial(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.len)
    }
}

/// Append-only write-ahead log.
///
/// LSN assignment, timestamping and the append happen under one lock, so
/// entries land in the file in LSN order.
pub struct WalManager {
    path: PathBuf,
    config: WalConfig,
    inner: Mutex<WalInner>,
}

impl WalManager {
    /// Opens or creates the log at `path`.
    ///
    /// Existing entries are scanned to recover the last LSN. Everything
    /// after the last complete entry with an increasing LSN is cut off.
    pub fn open(path: &Path, config: WalConfig) -> WalResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let (entries, valid_len) = parse_entries(&data)?;

        if valid_len < data.len() {
            warn!(
                "Truncating {} bytes of invalid WAL tail in {:?}",
                data.len() - valid_len,
                path
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        let current_lsn = entries.last().map(|e| e.lsn).unwrap_or(Lsn::INVALID);
        info!(
            "Opened WAL {:?} with {} entries, last {}",
            path,
            entries.len(),
            current_lsn
        );

        Ok(Self {
            path: path.to_path_buf(),
            config,
            inner: Mutex::new(WalInner {
                file,
                current_lsn,
                flushed_lsn: current_lsn,
                len: valid_len as u64,
                poisoned: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entry`, returning the LSN it was assigned. Commit entries
    /// are on disk before this returns unless `sync_on_commit` is off.
    pub fn write(&self, mut entry: LogEntry) -> WalResult<Lsn> {
        let mut inner = self.inner.lock();
        let lsn = Self::append_locked(&mut inner, &mut entry)?;

        if entry.entry_type == LogType::Commit && self.config.sync_on_commit {
            Self::sync_locked(&mut inner)?;
        }

        Ok(lsn)
    }

    fn append_locked(inner: &mut WalInner, entry: &mut LogEntry) -> WalResult<Lsn> {
        if inner.poisoned {
            return Err(WalError::Poisoned);
        }

        let lsn = inner.current_lsn.next();
        entry.lsn = lsn;
        entry.timestamp = now_nanos();

        let bytes = entry.to_bytes();
        if let Err(e) = inner.file.write_all(&bytes) {
            if let Err(cut) = inner.discard_partial() {
                warn!("Cannot cut partial WAL entry {}: {}", lsn, cut);
                inner.poisoned = true;
            }
            return Err(e.into());
        }

        inner.len += bytes.len() as u64;
        inner.current_lsn = lsn;
        Ok(lsn)
    }

    fn sync_locked(inner: &mut WalInner) -> WalResult<()> {
        if inner.flushed_lsn < inner.current_lsn {
            inner.file.sync_data()?;
            inner.flushed_lsn = inner.current_lsn;
        }
        Ok(())
    }

    /// Makes every entry up to and including `lsn` durable.
    pub fn flush_to(&self, lsn: Lsn) -> WalResult<()> {
        let mut inner = self.inner.lock();
        if inner.flushed_lsn >= lsn {
            return Ok(());
        }
        Self::sync_locked(&mut inner)
    }

    pub fn sync(&self) -> WalResult<()> {
        let mut inner = self.inner.lock();
        Self::sync_locked(&mut inner)
    }

    /// Refuses every later append, as after an unrecoverable write error.
    #[cfg(test)]
    pub(crate) fn fail_writes(&self) {
        self.inner.lock().poisoned = true;
    }

    pub fn current_lsn(&self) -> Lsn {
        self.inner.lock().current_lsn
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.inner.lock().flushed_lsn
    }

    /// Appends a checkpoint entry and syncs the log.
    ///
    /// `start_lsn` is the last LSN assigned before the caller began
    /// collecting `dirty_pages`.
    pub fn create_checkpoint(
        &self,
        start_lsn: Lsn,
        dirty_pages: Vec<DirtyPage>,
        active_transactions: Vec<TransactionId>,
    ) -> WalResult<Lsn> {
        let checkpoint = Checkpoint {
            lsn: start_lsn,
            timestamp: now_nanos(),
            dirty_pages,
            active_transactions,
        };
        let body = checkpoint.encode()?;

        let mut inner = self.inner.lock();
        let mut entry = LogEntry::new(
            TransactionId::INVALID,
            LogType::Checkpoint,
            PageId(0),
            Vec::new(),
            body,
        );
        let lsn = Self::append_locked(&mut inner, &mut entry)?;
        Self::sync_locked(&mut inner)?;

        debug!(
            "Checkpoint at {} ({} dirty pages, {} active transactions)",
            lsn,
            checkpoint.dirty_pages.len(),
            checkpoint.active_transactions.len()
        );
        Ok(lsn)
    }

    /// Reads every complete entry in append order.
    pub fn read_entries(&self) -> WalResult<Vec<LogEntry>> {
        let mut data = Vec::new();
        File::open(&self.path)?.read_to_end(&mut data)?;
        let (entries, _) = parse_entries(&data)?;
        Ok(entries)
    }
}

/// Decodes entries until the data runs out, ends mid-entry or stops
/// increasing in LSN. Zero-filled blocks left by a crash decode as LSN 0 and
/// end the log there. Returns the entries and the length of the valid
/// prefix.
fn parse_entries(data: &[u8]) -> WalResult<(Vec<LogEntry>, usize)> {
    let mut entries: Vec<LogEntry> = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        match LogEntry::decode(&data[offset..], offset as u64)? {
            Some((entry, consumed)) => {
                let last = entries.last().map(|e| e.lsn).unwrap_or(Lsn::INVALID);
                if entry.lsn <= last {
                    break;
                }
                entries.push(entry);
                offset += consumed;
            }
            None => break,
        }
    }

    Ok((entries, offset))
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn insert_entry(txn: u64, page: u64) -> LogEntry {
        LogEntry::new(
            TransactionId(txn),
            LogType::Insert,
            PageId(page),
            vec![0u8; 16],
            vec![1u8; 16],
        )
    }

    #[test]
    fn test_write_assigns_increasing_lsns() -> Result<()> {
        let dir = tempdir()?;
        let wal = WalManager::open(&dir.path().join("test.wal"), WalConfig::default())?;

        assert_eq!(wal.write(LogEntry::begin(TransactionId(1)))?, Lsn(1));
        assert_eq!(wal.write(insert_entry(1, 0))?, Lsn(2));
        assert_eq!(wal.write(LogEntry::commit(TransactionId(1)))?, Lsn(3));
        assert_eq!(wal.flushed_lsn(), Lsn(3));

        let entries = wal.read_entries()?;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].entry_type, LogType::Insert);
        assert_eq!(entries[1].after_image, vec![1u8; 16]);
        assert!(entries[0].timestamp > 0);

        Ok(())
    }

    #[test]
    fn test_reopen_continues_lsns() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.wal");

        {
            let wal = WalManager::open(&path, WalConfig::default())?;
            wal.write(LogEntry::begin(TransactionId(1)))?;
            wal.write(insert_entry(1, 2))?;
            wal.sync()?;
        }

        let wal = WalManager::open(&path, WalConfig::default())?;
        assert_eq!(wal.current_lsn(), Lsn(2));
        assert_eq!(wal.write(LogEntry::abort(TransactionId(1)))?, Lsn(3));

        Ok(())
    }

    #[test]
    fn test_torn_tail_is_truncated() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.wal");

        {
            let wal = WalManager::open(&path, WalConfig::default())?;
            wal.write(insert_entry(1, 0))?;
            wal.write(insert_entry(1, 1))?;
            wal.sync()?;
        }

        let full_len = std::fs::metadata(&path)?.len();
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(full_len - 5)?;
        drop(file);

        let wal = WalManager::open(&path, WalConfig::default())?;
        assert_eq!(wal.current_lsn(), Lsn(1));
        assert_eq!(wal.read_entries()?.len(), 1);
        assert_eq!(wal.write(insert_entry(2, 0))?, Lsn(2));
        assert_eq!(wal.read_entries()?.len(), 2);

        Ok(())
    }

    #[test]
    fn test_zero_filled_tail_is_truncated() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.wal");

        {
            let wal = WalManager::open(&path, WalConfig::default())?;
            wal.write(LogEntry::begin(TransactionId(1)))?;
            wal.write(LogEntry::commit(TransactionId(1)))?;
        }

        let valid_len = std::fs::metadata(&path)?.len();
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&[0u8; 64])?;
        drop(file);

        let wal = WalManager::open(&path, WalConfig::default())?;
        assert_eq!(wal.current_lsn(), Lsn(2));
        assert_eq!(std::fs::metadata(&path)?.len(), valid_len);

        let entries = wal.read_entries()?;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.txn_id == TransactionId(1)));
        assert_eq!(wal.write(LogEntry::begin(TransactionId(2)))?, Lsn(3));

        Ok(())
    }

    #[test]
    fn test_non_increasing_lsn_ends_log() -> Result<()> {
        let mut stale = LogEntry::begin(TransactionId(7));
        stale.lsn = Lsn(1);
        let mut data = Vec::new();
        for lsn in [1, 2] {
            let mut entry = insert_entry(1, 0);
            entry.lsn = Lsn(lsn);
            data.extend_from_slice(&entry.to_bytes());
        }
        let valid_len = data.len();
        data.extend_from_slice(&stale.to_bytes());

        let (entries, len) = parse_entries(&data)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(len, valid_len);

        Ok(())
    }

    #[test]
    fn test_partial_append_is_cut_before_next_entry() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.wal");
        let wal = WalManager::open(&path, WalConfig::default())?;
        wal.write(LogEntry::begin(TransactionId(1)))?;

        // Half of a frame lands in the file, as after a failed write.
        let frame = insert_entry(1, 0).to_bytes();
        let mut raw = OpenOptions::new().append(true).open(&path)?;
        raw.write_all(&frame[..20])?;
        drop(raw);

        wal.inner.lock().discard_partial()?;
        wal.write(LogEntry::commit(TransactionId(1)))?;
        drop(wal);

        let wal = WalManager::open(&path, WalConfig::default())?;
        let types: Vec<LogType> = wal.read_entries()?.iter().map(|e| e.entry_type).collect();
        assert_eq!(types, vec![LogType::Begin, LogType::Commit]);
        assert_eq!(wal.current_lsn(), Lsn(2));

        Ok(())
    }

    #[test]
    fn test_failed_append_does_not_advance_lsn() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.wal");
        let wal = WalManager::open(&path, WalConfig::default())?;
        wal.write(LogEntry::begin(TransactionId(1)))?;

        // A read-only handle makes both the append and the rollback fail.
        wal.inner.lock().file = File::open(&path)?;
        assert!(wal.write(insert_entry(1, 0)).is_err());
        assert_eq!(wal.current_lsn(), Lsn(1));
        assert!(matches!(
            wal.write(LogEntry::commit(TransactionId(1))),
            Err(WalError::Poisoned)
        ));
        drop(wal);

        let wal = WalManager::open(&path, WalConfig::default())?;
        assert_eq!(wal.read_entries()?.len(), 1);

        Ok(())
    }

    #[test]
    fn test_flush_to() -> Result<()> {
        let dir = tempdir()?;
        let wal = WalManager::open(&dir.path().join("test.wal"), WalConfig::default())?;

        let lsn = wal.write(insert_entry(1, 0))?;
        assert_eq!(wal.flushed_lsn(), Lsn::INVALID);

        wal.flush_to(lsn)?;
        assert_eq!(wal.flushed_lsn(), lsn);

        Ok(())
    }

    #[test]
    fn test_commit_without_sync() -> Result<()> {
        let dir = tempdir()?;
        let config = WalConfig {
            sync_on_commit: false,
        };
        let wal = WalManager::open(&dir.path().join("test.wal"), config)?;

        wal.write(LogEntry::commit(TransactionId(1)))?;
        assert_eq!(wal.flushed_lsn(), Lsn::INVALID);

        Ok(())
    }

    #[test]
    fn test_checkpoint_entry() -> Result<()> {
        let dir = tempdir()?;
        let wal = WalManager::open(&dir.path().join("test.wal"), WalConfig::default())?;

        wal.write(LogEntry::begin(TransactionId(5)))?;
        let start = wal.current_lsn();
        let dirty = vec![DirtyPage {
            page_id: PageId(2),
            rec_lsn: Lsn(1),
        }];
        let lsn = wal.create_checkpoint(start, dirty.clone(), vec![TransactionId(5)])?;
        assert_eq!(lsn, Lsn(2));
        assert_eq!(wal.flushed_lsn(), lsn);

        let entries = wal.read_entries()?;
        let last = entries.last().expect("checkpoint entry");
        assert_eq!(last.entry_type, LogType::Checkpoint);

        let checkpoint = Checkpoint::decode(&last.after_image)?;
        assert_eq!(checkpoint.lsn, Lsn(1));
        assert_eq!(checkpoint.dirty_pages, dirty);
        assert_eq!(checkpoint.active_transactions, vec![TransactionId(5)]);

        Ok(())
    }

    #[test]
    fn test_concurrent_writers_get_unique_lsns() -> Result<()> {
        let dir = tempdir()?;
        let wal = Arc::new(WalManager::open(
            &dir.path().join("test.wal"),
            WalConfig::default(),
        )?);

        let mut handles = vec![];
        for t in 0..8u64 {
            let wal = Arc::clone(&wal);
            handles.push(thread::spawn(move || {
                let mut lsns = Vec::new();
                for i in 0..50 {
                    lsns.push(wal.write(insert_entry(t, i)).unwrap());
                }
                lsns
            }));
        }

        let mut all = HashSet::new();
        for handle in handles {
            let lsns = handle.join().unwrap();
            assert!(lsns.windows(2).all(|w| w[0] < w[1]));
            all.extend(lsns);
        }
        assert_eq!(all.len(), 400);

        let entries = wal.read_entries()?;
        assert_eq!(entries.len(), 400);
        assert!(entries.windows(2).all(|w| w[0].lsn < w[1].lsn));

        Ok(())
    }
}
