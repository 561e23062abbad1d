//! Storage layer error types.

use crate::access::DataType;
use crate::recovery::RecoveryError;
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Insufficient space: requires {required} bytes but only {available} available")]
    InsufficientSpace { required: usize, available: usize },

    #[error("Invalid slot: {slot_id} (slot count: {slot_count})")]
    InvalidSlot { slot_id: u32, slot_count: u32 },

    #[error("Record deleted: page {page_id}, slot {slot_id}")]
    RecordDeleted { page_id: PageId, slot_id: u32 },

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Corrupt page: {0}")]
    CorruptPage(String),

    #[error("Unsupported type for column {column}: expected {expected:?}, found {found}")]
    UnsupportedType {
        column: String,
        expected: DataType,
        found: &'static str,
    },

    #[error("Unknown value type tag: {0}")]
    UnknownType(u8),

    #[error("Cannot encode a record with no values")]
    EmptyRecord,

    #[error("Schema mismatch: expected {expected} values, found {found}")]
    SchemaMismatch { expected: usize, found: usize },

    #[error("Value too long for column {column}: max {max}, got {len}")]
    ValueTooLong { column: String, max: u32, len: usize },

    #[error("Column {0} does not accept NULL")]
    NullViolation(String),

    #[error("Record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Page {page_id} is being written by {owner}")]
    PageLocked {
        page_id: PageId,
        owner: TransactionId,
    },

    #[error("Transaction not active: {0}")]
    TransactionNotActive(TransactionId),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Recovery failed: {0}")]
    Recovery(Box<RecoveryError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
}

impl From<RecoveryError> for StorageError {
    fn from(e: RecoveryError) -> Self {
        StorageError::Recovery(Box::new(e))
    }
}

/// Errors raised by the write-ahead log.
#[derive(Error, Debug)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt log entry at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("WAL refuses writes after a failed append could not be rolled back")]
    Poisoned,

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;
