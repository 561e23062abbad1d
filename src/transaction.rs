//! Transaction bookkeeping.
//!
//! - Transaction ID generation
//! - The active transaction table and per-transaction undo records
//!
//! Isolation between concurrent transactions is left to the caller.

pub mod id;
pub mod state;

pub use id::{TransactionId, TransactionIdGenerator};
pub use state::{TransactionInfo, TransactionTable, UndoRecord};
