//! Storage layer implementation for slotdb.
//!
//! This module provides the foundation for persistent data storage using a page-based
//! architecture. Key components:
//!
//! - **Page**: Fixed-size (4KB) blocks of data, the basic unit of I/O
//! - **PageLayout**: Slotted page format for storing variable-length records
//! - **PageManager**: Handles reading/writing pages to the data file
//! - **BufferCache**: In-memory cache of pages with LRU eviction
//! - **WalManager**: Write-ahead log guarding every page mutation
//! - **PageStore**: Ties the three together and enforces the write-ahead rule

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;
pub mod store;
pub mod wal;

pub use buffer::BufferCache;
pub use disk::PageManager;
pub use error::{StorageError, StorageResult, WalError, WalResult};
pub use page::{Page, PageId, PageLayout, PageRef, PAGE_SIZE};
pub use store::PageStore;
pub use wal::{LogEntry, LogType, Lsn, WalConfig, WalManager};
