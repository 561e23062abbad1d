//! WAL entry types and their on-disk encoding.
//!
//! Every entry is written as a big-endian frame:
//!
//! ```text
//! lsn u64 | timestamp u64 | txn_id u64 | type u32 | page_id u64
//! before_len u32 | before bytes | after_len u32 | after bytes
//! ```

use crate::storage::error::{WalError, WalResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Log Sequence Number. LSNs start at 1; 0 means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const INVALID: Lsn = Lsn(0);

    pub fn next(&self) -> Self {
        Lsn(self.0 + 1)
    }

    pub fn is_invalid(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN({})", self.0)
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogType {
    Begin = 0,
    Commit = 1,
    Abort = 2,
    Insert = 3,
    Update = 4,
    Delete = 5,
    Checkpoint = 6,
    /// Undo of an earlier page mutation.
    Compensation = 7,
}

impl LogType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(LogType::Begin),
            1 => Some(LogType::Commit),
            2 => Some(LogType::Abort),
            3 => Some(LogType::Insert),
            4 => Some(LogType::Update),
            5 => Some(LogType::Delete),
            6 => Some(LogType::Checkpoint),
            7 => Some(LogType::Compensation),
            _ => None,
        }
    }

    /// Insert, Update and Delete: the mutations a rollback has to undo.
    pub fn is_undoable(&self) -> bool {
        matches!(self, LogType::Insert | LogType::Update | LogType::Delete)
    }

    /// Entries carrying a page after-image that redo reinstalls.
    pub fn is_redoable(&self) -> bool {
        self.is_undoable() || *self == LogType::Compensation
    }
}

/// Size of the fixed part of an encoded entry.
pub const ENTRY_HEADER_SIZE: usize = 8 + 8 + 8 + 4 + 8 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub lsn: Lsn,
    /// Nanoseconds since the Unix epoch, stamped on append.
    pub timestamp: u64,
    pub txn_id: TransactionId,
    pub entry_type: LogType,
    pub page_id: PageId,
    pub before_image: Vec<u8>,
    pub after_image: Vec<u8>,
}

impl LogEntry {
    /// An entry with no LSN or timestamp yet; both are assigned on append.
    pub fn new(
        txn_id: TransactionId,
        entry_type: LogType,
        page_id: PageId,
        before_image: Vec<u8>,
        after_image: Vec<u8>,
    ) -> Self {
        Self {
            lsn: Lsn::INVALID,
            timestamp: 0,
            txn_id,
            entry_type,
            page_id,
            before_image,
            after_image,
        }
    }

    pub fn begin(txn_id: TransactionId) -> Self {
        Self::new(txn_id, LogType::Begin, PageId(0), Vec::new(), Vec::new())
    }

    pub fn commit(txn_id: TransactionId) -> Self {
        Self::new(txn_id, LogType::Commit, PageId(0), Vec::new(), Vec::new())
    }

    pub fn abort(txn_id: TransactionId) -> Self {
        Self::new(txn_id, LogType::Abort, PageId(0), Vec::new(), Vec::new())
    }

    pub fn encoded_len(&self) -> usize {
        ENTRY_HEADER_SIZE + self.before_image.len() + 4 + self.after_image.len()
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.lsn.0);
        buf.put_u64(self.timestamp);
        buf.put_u64(self.txn_id.0);
        buf.put_u32(self.entry_type as u32);
        buf.put_u64(self.page_id.0);
        buf.put_u32(self.before_image.len() as u32);
        buf.put_slice(&self.before_image);
        buf.put_u32(self.after_image.len() as u32);
        buf.put_slice(&self.after_image);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }

    /// Decodes the entry at the start of `data`.
    ///
    /// Returns `Ok(None)` when `data` ends before the entry does, which is
    /// how a torn final write shows up. `offset` is only used for error
    /// reporting.
    pub fn decode(data: &[u8], offset: u64) -> WalResult<Option<(LogEntry, usize)>> {
        let mut buf = data;
        if buf.remaining() < ENTRY_HEADER_SIZE {
            return Ok(None);
        }

        let lsn = Lsn(buf.get_u64());
        let timestamp = buf.get_u64();
        let txn_id = TransactionId(buf.get_u64());
        let raw_type = buf.get_u32();
        let page_id = PageId(buf.get_u64());

        let entry_type = LogType::from_u32(raw_type).ok_or_else(|| WalError::Corrupt {
            offset,
            reason: format!("unknown entry type {}", raw_type),
        })?;

        let before_len = buf.get_u32() as usize;
        if buf.remaining() < before_len + 4 {
            return Ok(None);
        }
        let before_image = buf[..before_len].to_vec();
        buf.advance(before_len);

        let after_len = buf.get_u32() as usize;
        if buf.remaining() < after_len {
            return Ok(None);
        }
        let after_image = buf[..after_len].to_vec();
        buf.advance(after_len);

        let consumed = data.len() - buf.remaining();
        Ok(Some((
            LogEntry {
                lsn,
                timestamp,
                txn_id,
                entry_type,
                page_id,
                before_image,
                after_image,
            },
            consumed,
        )))
    }
}
