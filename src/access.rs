//! Access layer for record-oriented operations.
//!
//! - **Value** / **DataType**: Typed column values
//! - **Record**: A row and its binary encoding
//! - **RecordId**: Page and slot of a stored record
//! - **BTree**: Primary-key index from integer keys to record ids

pub mod btree;
pub mod record;
pub mod record_id;
pub mod value;

pub use btree::BTree;
pub use record::Record;
pub use record_id::RecordId;
pub use value::{DataType, Value};
