//! Record (row) encoding.
//!
//! ```text
//! count: u32 | tag: u8, payload | tag: u8, payload | ...
//! ```
//!
//! All integers are little-endian. Tags and payloads:
//!
//! | tag | type    | payload                          |
//! |-----|---------|----------------------------------|
//! | 0   | null    | none                             |
//! | 1   | integer | 8 bytes                          |
//! | 2   | text    | u32 length + UTF-8 bytes         |
//! | 3   | boolean | 1 byte, nonzero is true          |
//! | 4   | float   | 8 bytes, IEEE-754 bit pattern    |

use crate::access::value::Value;
use crate::catalog::Column;
use crate::storage::error::{StorageError, StorageResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

const TAG_NULL: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_TEXT: u8 = 2;
const TAG_BOOLEAN: u8 = 3;
const TAG_FLOAT: u8 = 4;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Checks arity, types, nullability and varchar lengths against a table
    /// definition.
    pub fn validate(&self, columns: &[Column]) -> StorageResult<()> {
        if self.values.len() != columns.len() {
            return Err(StorageError::SchemaMismatch {
                expected: columns.len(),
                found: self.values.len(),
            });
        }

        for (value, column) in self.values.iter().zip(columns) {
            if value.is_null() {
                if column.not_null {
                    return Err(StorageError::NullViolation(column.name.clone()));
                }
                continue;
            }
            if !value.is_compatible_with(column.data_type) {
                return Err(StorageError::UnsupportedType {
                    column: column.name.clone(),
                    expected: column.data_type,
                    found: value.type_name(),
                });
            }
            if let (Value::Text(text), Some(max)) = (value, column.length) {
                let len = text.chars().count();
                if len > max as usize {
                    return Err(StorageError::ValueTooLong {
                        column: column.name.clone(),
                        max,
                        len,
                    });
                }
            }
        }

        Ok(())
    }

    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        if self.values.is_empty() {
            return Err(StorageError::EmptyRecord);
        }

        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(self.values.len() as u32)?;

        for value in &self.values {
            match value {
                Value::Null => buf.write_u8(TAG_NULL)?,
                Value::Integer(v) => {
                    buf.write_u8(TAG_INTEGER)?;
                    buf.write_i64::<LittleEndian>(*v)?;
                }
                Value::Text(v) => {
                    buf.write_u8(TAG_TEXT)?;
                    buf.write_u32::<LittleEndian>(v.len() as u32)?;
                    buf.extend_from_slice(v.as_bytes());
                }
                Value::Boolean(v) => {
                    buf.write_u8(TAG_BOOLEAN)?;
                    buf.write_u8(u8::from(*v))?;
                }
                Value::Float(v) => {
                    buf.write_u8(TAG_FLOAT)?;
                    buf.write_u64::<LittleEndian>(v.to_bits())?;
                }
            }
        }

        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> StorageResult<Self> {
        let mut cursor = Cursor::new(data);
        let count = cursor.read_u32::<LittleEndian>().map_err(truncated)?;

        // Every value takes at least its tag byte.
        if count as usize > data.len() {
            return Err(StorageError::CorruptRecord(format!(
                "value count {} exceeds record size {}",
                count,
                data.len()
            )));
        }

        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = cursor.read_u8().map_err(truncated)?;
            let value = match tag {
                TAG_NULL => Value::Null,
                TAG_INTEGER => Value::Integer(cursor.read_i64::<LittleEndian>().map_err(truncated)?),
                TAG_TEXT => {
                    let len = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
                    let remaining = data.len() - cursor.position() as usize;
                    if len > remaining {
                        return Err(StorageError::CorruptRecord(format!(
                            "text length {} exceeds remaining {} bytes",
                            len, remaining
                        )));
                    }
                    let mut bytes = vec![0u8; len];
                    cursor.read_exact(&mut bytes).map_err(truncated)?;
                    let text = String::from_utf8(bytes)
                        .map_err(|e| StorageError::CorruptRecord(format!("invalid UTF-8: {}", e)))?;
                    Value::Text(text)
                }
                TAG_BOOLEAN => Value::Boolean(cursor.read_u8().map_err(truncated)? != 0),
                TAG_FLOAT => Value::Float(f64::from_bits(
                    cursor.read_u64::<LittleEndian>().map_err(truncated)?,
                )),
                other => return Err(StorageError::UnknownType(other)),
            };
            values.push(value);
        }

        let consumed = cursor.position() as usize;
        if consumed != data.len() {
            return Err(StorageError::CorruptRecord(format!(
                "{} trailing bytes after {} values",
                data.len() - consumed,
                count
            )));
        }

        Ok(Self { values })
    }
}

fn truncated(e: std::io::Error) -> StorageError {
    StorageError::CorruptRecord(format!("unexpected end of record: {}", e))
}
