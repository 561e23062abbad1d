//! Slotted page layout.
//!
//! ```text
//! +--------------------+---------------------+---------------+------------------+
//! | header (16 bytes)  | slot directory ->   |  free space   |  <- record data  |
//! +--------------------+---------------------+---------------+------------------+
//! 0                    16                                    free_space
//! ```
//!
//! Header fields are little-endian u32: slot count, free-space pointer, last
//! slot id and flags. Each slot entry is 8 bytes: offset (u32), length (u16)
//! and flags (u16). Slot ids are 1-based and never reused.

use crate::storage::error::{StorageError, StorageResult};
use byteorder::{ByteOrder, LittleEndian};
use std::ops::Range;

pub const HEADER_SIZE: usize = 16;
pub const SLOT_SIZE: usize = 8;

/// Slot flag bit marking a logically deleted record.
pub const SLOT_DELETED: u16 = 0x0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageHeader {
    pub slot_count: u32,
    /// Lower bound of the payload region; records are placed just below it.
    pub free_space: u32,
    pub last_slot_id: u32,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    pub offset: u32,
    pub length: u16,
    pub flags: u16,
}

impl SlotEntry {
    pub fn is_deleted(&self) -> bool {
        self.flags & SLOT_DELETED != 0
    }

    pub fn range(&self) -> Range<usize> {
        let start = self.offset as usize;
        start..start + self.length as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLayout {
    page_size: usize,
    header: PageHeader,
    slots: Vec<SlotEntry>,
}

impl PageLayout {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            header: PageHeader {
                free_space: (page_size - HEADER_SIZE) as u32,
                ..PageHeader::default()
            },
            slots: Vec::new(),
        }
    }

    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    pub fn slot_count(&self) -> u32 {
        self.header.slot_count
    }

    pub fn slots(&self) -> &[SlotEntry] {
        &self.slots
    }

    /// Iterates `(slot_id, entry)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &SlotEntry)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(idx, slot)| (idx as u32 + 1, slot))
    }

    fn directory_end(&self) -> usize {
        HEADER_SIZE + self.slots.len() * SLOT_SIZE
    }

    /// Bytes between the end of the slot directory and the payload region.
    pub fn free_space(&self) -> usize {
        (self.header.free_space as usize).saturating_sub(self.directory_end())
    }

    pub fn can_fit(&self, record_size: usize) -> bool {
        record_size <= u16::MAX as usize && self.free_space() >= record_size + SLOT_SIZE
    }

    /// Reserves room for a record of `record_size` bytes and appends a slot
    /// entry pointing at it. Returns the new 1-based slot id.
    pub fn find_free_slot(&mut self, record_size: usize) -> StorageResult<(u32, SlotEntry)> {
        if !self.can_fit(record_size) {
            return Err(StorageError::InsufficientSpace {
                required: record_size + SLOT_SIZE,
                available: self.free_space(),
            });
        }

        let offset = self.header.free_space - record_size as u32;
        let entry = SlotEntry {
            offset,
            length: record_size as u16,
            flags: 0,
        };

        self.slots.push(entry);
        self.header.free_space = offset;
        self.header.slot_count += 1;
        self.header.last_slot_id += 1;

        Ok((self.header.last_slot_id, entry))
    }

    pub fn slot(&self, slot_id: u32) -> StorageResult<SlotEntry> {
        self.slot_index(slot_id).map(|idx| self.slots[idx])
    }

    pub fn mark_deleted(&mut self, slot_id: u32) -> StorageResult<SlotEntry> {
        let idx = self.slot_index(slot_id)?;
        self.slots[idx].flags |= SLOT_DELETED;
        Ok(self.slots[idx])
    }

    /// Shrinks (or keeps) a live record in place. Growing is not possible
    /// since the neighbouring bytes belong to other records.
    pub fn resize_in_place(&mut self, slot_id: u32, new_len: usize) -> StorageResult<SlotEntry> {
        let idx = self.slot_index(slot_id)?;
        let entry = &mut self.slots[idx];
        if new_len > entry.length as usize {
            return Err(StorageError::InsufficientSpace {
                required: new_len,
                available: entry.length as usize,
            });
        }
        entry.length = new_len as u16;
        Ok(*entry)
    }

    fn slot_index(&self, slot_id: u32) -> StorageResult<usize> {
        if slot_id == 0 || slot_id > self.header.slot_count {
            return Err(StorageError::InvalidSlot {
                slot_id,
                slot_count: self.header.slot_count,
            });
        }
        Ok(slot_id as usize - 1)
    }

    /// Writes the header and slot directory into `buf`, leaving the payload
    /// region untouched.
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.header.slot_count);
        LittleEndian::write_u32(&mut buf[4..8], self.header.free_space);
        LittleEndian::write_u32(&mut buf[8..12], self.header.last_slot_id);
        LittleEndian::write_u32(&mut buf[12..16], self.header.flags);

        for (idx, slot) in self.slots.iter().enumerate() {
            let base = HEADER_SIZE + idx * SLOT_SIZE;
            LittleEndian::write_u32(&mut buf[base..base + 4], slot.offset);
            LittleEndian::write_u16(&mut buf[base + 4..base + 6], slot.length);
            LittleEndian::write_u16(&mut buf[base + 6..base + 8], slot.flags);
        }
    }

    /// A standalone page-sized buffer holding only the header and directory.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.page_size];
        self.write_to(&mut buf);
        buf
    }

    pub fn deserialize(buf: &[u8]) -> StorageResult<Self> {
        let page_size = buf.len();
        if page_size < HEADER_SIZE {
            return Err(StorageError::CorruptPage(format!(
                "page of {} bytes cannot hold a header",
                page_size
            )));
        }

        let header = PageHeader {
            slot_count: LittleEndian::read_u32(&buf[0..4]),
            free_space: LittleEndian::read_u32(&buf[4..8]),
            last_slot_id: LittleEndian::read_u32(&buf[8..12]),
            flags: LittleEndian::read_u32(&buf[12..16]),
        };

        // Freshly extended file regions read back as zeroes.
        if header == PageHeader::default() {
            return Ok(Self::new(page_size));
        }

        let free_space = header.free_space as usize;
        let directory_end = HEADER_SIZE + header.slot_count as usize * SLOT_SIZE;
        if free_space > page_size || directory_end > free_space {
            return Err(StorageError::CorruptPage(format!(
                "slot directory ({} slots) overlaps payload at {}",
                header.slot_count, header.free_space
            )));
        }

        let mut slots = Vec::with_capacity(header.slot_count as usize);
        for idx in 0..header.slot_count as usize {
            let base = HEADER_SIZE + idx * SLOT_SIZE;
            let slot = SlotEntry {
                offset: LittleEndian::read_u32(&buf[base..base + 4]),
                length: LittleEndian::read_u16(&buf[base + 4..base + 6]),
                flags: LittleEndian::read_u16(&buf[base + 6..base + 8]),
            };
            let range = slot.range();
            if range.start < free_space || range.end > page_size {
                return Err(StorageError::CorruptPage(format!(
                    "slot {} points outside the payload region: {:?}",
                    idx + 1,
                    range
                )));
            }
            slots.push(slot);
        }

        Ok(Self {
            page_size,
            header,
            slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PAGE_SIZE;

    #[test]
    fn test_new_layout() {
        let layout = PageLayout::new(PAGE_SIZE);
        assert_eq!(layout.slot_count(), 0);
        assert_eq!(layout.header().free_space, 4080);
        assert_eq!(layout.free_space(), 4080 - HEADER_SIZE);
    }

    #[test]
    fn test_slot_allocation_is_monotonic() {
        let mut layout = PageLayout::new(PAGE_SIZE);

        let (id1, slot1) = layout.find_free_slot(100).unwrap();
        let (id2, slot2) = layout.find_free_slot(50).unwrap();

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(slot1.offset, 4080 - 100);
        assert_eq!(slot2.offset, 4080 - 150);
        assert!(slot2.offset < slot1.offset);
        assert_eq!(layout.slot_count(), 2);
        assert_eq!(layout.header().last_slot_id, 2);
        assert_eq!(layout.free_space(), 4080 - 150 - HEADER_SIZE - 2 * SLOT_SIZE);
    }

    #[test]
    fn test_page_full() {
        let mut layout = PageLayout::new(PAGE_SIZE);
        let mut count = 0;
        loop {
            match layout.find_free_slot(100) {
                Ok(_) => count += 1,
                Err(StorageError::InsufficientSpace { required, available }) => {
                    assert_eq!(required, 108);
                    assert!(available < 108);
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        // (4080 - 16) / 108
        assert_eq!(count, 37);
        assert!(HEADER_SIZE + count * SLOT_SIZE <= layout.header().free_space as usize);
    }

    #[test]
    fn test_exact_fit() {
        let mut layout = PageLayout::new(PAGE_SIZE);
        let exact = layout.free_space() - SLOT_SIZE;
        assert!(layout.find_free_slot(exact).is_ok());
        assert_eq!(layout.free_space(), 0);
        assert!(layout.find_free_slot(0).is_err());
    }

    #[test]
    fn test_serialize_deserialize() {
        let mut layout = PageLayout::new(PAGE_SIZE);
        layout.find_free_slot(20).unwrap();
        layout.find_free_slot(30).unwrap();
        layout.mark_deleted(1).unwrap();

        let bytes = layout.serialize();
        assert_eq!(bytes.len(), PAGE_SIZE);
        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), 2);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 4080 - 50);

        let decoded = PageLayout::deserialize(&bytes).unwrap();
        assert_eq!(decoded, layout);
        assert!(decoded.slot(1).unwrap().is_deleted());
        assert!(!decoded.slot(2).unwrap().is_deleted());
    }

    #[test]
    fn test_zeroed_page_reads_as_empty() {
        let layout = PageLayout::deserialize(&[0u8; PAGE_SIZE]).unwrap();
        assert_eq!(layout, PageLayout::new(PAGE_SIZE));
    }

    #[test]
    fn test_corrupt_directory_rejected() {
        let mut bytes = PageLayout::new(PAGE_SIZE).serialize();
        LittleEndian::write_u32(&mut bytes[0..4], 1000);
        assert!(matches!(
            PageLayout::deserialize(&bytes),
            Err(StorageError::CorruptPage(_))
        ));
    }

    #[test]
    fn test_invalid_slot() {
        let mut layout = PageLayout::new(PAGE_SIZE);
        layout.find_free_slot(10).unwrap();
        assert!(matches!(
            layout.slot(0),
            Err(StorageError::InvalidSlot { slot_id: 0, .. })
        ));
        assert!(matches!(
            layout.slot(2),
            Err(StorageError::InvalidSlot { slot_id: 2, slot_count: 1 })
        ));
    }

    #[test]
    fn test_resize_in_place() {
        let mut layout = PageLayout::new(PAGE_SIZE);
        layout.find_free_slot(40).unwrap();
        assert_eq!(layout.resize_in_place(1, 25).unwrap().length, 25);
        assert!(layout.resize_in_place(1, 41).is_err());
    }
}
