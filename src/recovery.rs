//! Recovery and crash resilience module.
//!
//! - ARIES analysis, redo and undo over the write-ahead log
//! - Compensation entries shared with runtime rollback

pub mod aries;
pub mod log_record;

pub use aries::{RecoveryError, RecoveryManager, RecoveryStats, RecoveryTarget};
pub use log_record::{compensation_for, pending_undo};
