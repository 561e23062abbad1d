//! Column definitions.

use crate::access::DataType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    /// Maximum character count for varchar columns.
    pub length: Option<u32>,
    pub not_null: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: None,
            not_null: false,
        }
    }

    pub fn varchar(name: impl Into<String>, length: u32) -> Self {
        Self {
            length: Some(length),
            ..Self::new(name, DataType::Varchar)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}
