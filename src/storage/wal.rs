//! Write-Ahead Logging (WAL) module.
//!
//! - Log entry framing and the LSN type
//! - Checkpoint bodies (dirty page table and active transactions)
//! - The append-only log file with commit-time and write-ahead flushing

pub mod checkpoint;
pub mod manager;
pub mod record;

pub use checkpoint::{Checkpoint, DirtyPage};
pub use manager::{WalConfig, WalManager};
pub use record::{LogEntry, LogType, Lsn};
