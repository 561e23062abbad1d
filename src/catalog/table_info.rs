//! Table metadata.

use crate::access::{DataType, Record};
use crate::catalog::column_info::Column;
use crate::storage::page::PageId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_id: TableId,
    pub name: String,
    pub columns: Vec<Column>,
    /// Index of the integer column used as the B-tree key.
    pub primary_key: Option<usize>,
    /// Pages owned by the table, in allocation order.
    pub page_ids: Vec<PageId>,
}

impl TableInfo {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn primary_key_column(&self) -> Option<&Column> {
        self.primary_key.and_then(|idx| self.columns.get(idx))
    }

    /// The index key of `record`, if the table has a primary key and the
    /// record carries an integer there.
    pub fn key_of(&self, record: &Record) -> Option<i64> {
        let idx = self.primary_key?;
        record.get(idx).and_then(|v| v.as_integer())
    }

    pub(crate) fn primary_key_is_indexable(&self) -> bool {
        match self.primary_key_column() {
            Some(column) => matches!(column.data_type, DataType::Integer | DataType::Timestamp),
            None => self.primary_key.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Value;

    fn users() -> TableInfo {
        TableInfo {
            table_id: TableId(1),
            name: "users".to_string(),
            columns: vec![
                Column::new("id", DataType::Integer),
                Column::varchar("name", 50),
            ],
            primary_key: Some(0),
            page_ids: vec![],
        }
    }

    #[test]
    fn test_key_of() {
        let table = users();
        let record = Record::new(vec![Value::Integer(12), Value::from("a")]);
        assert_eq!(table.key_of(&record), Some(12));
        assert_eq!(table.column_index("name"), Some(1));
        assert_eq!(table.column_index("missing"), None);

        let null_key = Record::new(vec![Value::Null, Value::from("a")]);
        assert_eq!(table.key_of(&null_key), None);
    }

    #[test]
    fn test_primary_key_must_be_integer() {
        let mut table = users();
        assert!(table.primary_key_is_indexable());

        table.primary_key = Some(1);
        assert!(!table.primary_key_is_indexable());

        table.primary_key = Some(5);
        assert!(!table.primary_key_is_indexable());

        table.primary_key = None;
        assert!(table.primary_key_is_indexable());
    }
}
