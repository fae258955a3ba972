//! Slotted-page codec.
//!
//! Layout of a heap page (all integers little-endian):
//!
//! ```text
//! [0..4)   next_page    u32 (NONE_PAGE sentinel if this is the tail)
//! [4..6)   slot_count   u16
//! [6..8)   free_start   u16 (grows up)
//! [8..10)  free_end     u16 (grows down)
//! [10..16) reserved
//! [16..free_start)      record bytes, appended in slot order
//! [free_end..PAGE_SIZE) slot directory, growing downward from the tail;
//!                       each entry is (offset: u16, length: u16)
//! ```
//!
//! Records are never moved once written; `delete` zeroes a slot's length
//! but leaves its bytes in place. This is load-bearing for [`Rid`]
//! stability — there is no compaction.

use crate::error::{GraniteError, Result};
use crate::pager::{PageId, PAGE_SIZE};

/// Bytes of page header preceding the record region.
pub const HEAP_HEADER_SIZE: usize = 16;

/// Bytes occupied by one slot-directory entry.
pub const SLOT_SIZE: usize = 4;

/// Row identifier: a (page, slot) pair, stable for the row's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u16,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Rid { page_id, slot }
    }
}

/// A thin codec over a borrowed page buffer. `HeapPage` does not own its
/// bytes — callers fetch a fresh buffer from the [`crate::pager::Pager`],
/// wrap it, mutate it, and write it back; buffers are never shared across
/// threads.
pub struct HeapPage<'a> {
    buf: &'a mut [u8; PAGE_SIZE],
}

impl<'a> HeapPage<'a> {
    /// Wrap an existing, already-initialised page buffer.
    pub fn wrap(buf: &'a mut [u8; PAGE_SIZE]) -> Self {
        HeapPage { buf }
    }

    /// Zero `buf` and stamp a fresh, empty heap page onto it.
    pub fn initialise(buf: &'a mut [u8; PAGE_SIZE]) -> Self {
        for b in buf.iter_mut() {
            *b = 0;
        }
        let mut page = HeapPage { buf };
        page.set_next_page(crate::pager::NONE_PAGE);
        page.set_slot_count(0);
        page.set_free_start(HEAP_HEADER_SIZE as u16);
        page.set_free_end(PAGE_SIZE as u16);
        page
    }

    pub fn next_page(&self) -> PageId {
        u32::from_le_bytes(self.buf[0..4].try_into().unwrap())
    }

    pub fn set_next_page(&mut self, id: PageId) {
        self.buf[0..4].copy_from_slice(&id.to_le_bytes());
    }

    pub fn slot_count(&self) -> u16 {
        u16::from_le_bytes(self.buf[4..6].try_into().unwrap())
    }

    fn set_slot_count(&mut self, count: u16) {
        self.buf[4..6].copy_from_slice(&count.to_le_bytes());
    }

    fn free_start(&self) -> u16 {
        u16::from_le_bytes(self.buf[6..8].try_into().unwrap())
    }

    fn set_free_start(&mut self, v: u16) {
        self.buf[6..8].copy_from_slice(&v.to_le_bytes());
    }

    fn free_end(&self) -> u16 {
        u16::from_le_bytes(self.buf[8..10].try_into().unwrap())
    }

    fn set_free_end(&mut self, v: u16) {
        self.buf[8..10].copy_from_slice(&v.to_le_bytes());
    }

    /// Bytes available for a new record (including its slot entry).
    pub fn free_space(&self) -> usize {
        self.free_end() as usize - self.free_start() as usize
    }

    fn slot_dir_offset(&self, slot: u16) -> usize {
        PAGE_SIZE - (slot as usize + 1) * SLOT_SIZE
    }

    fn slot_entry(&self, slot: u16) -> Option<(u16, u16)> {
        if slot >= self.slot_count() {
            return None;
        }
        let off = self.slot_dir_offset(slot);
        let offset = u16::from_le_bytes(self.buf[off..off + 2].try_into().unwrap());
        let length = u16::from_le_bytes(self.buf[off + 2..off + 4].try_into().unwrap());
        Some((offset, length))
    }

    fn set_slot_entry(&mut self, slot: u16, offset: u16, length: u16) {
        let off = self.slot_dir_offset(slot);
        self.buf[off..off + 2].copy_from_slice(&offset.to_le_bytes());
        self.buf[off + 2..off + 4].copy_from_slice(&length.to_le_bytes());
    }

    /// Insert `record`, returning its new slot index.
    ///
    /// # Errors
    /// Fails if `record.len() + SLOT_SIZE > free_space()`.
    pub fn insert(&mut self, record: &[u8]) -> Result<u16> {
        let needed = record.len() + SLOT_SIZE;
        if needed > self.free_space() {
            return Err(GraniteError::Internal(
                "insert does not fit in remaining free space".into(),
            ));
        }

        let offset = self.free_start();
        self.buf[offset as usize..offset as usize + record.len()].copy_from_slice(record);

        let slot = self.slot_count();
        self.set_free_start(offset + record.len() as u16);
        self.set_free_end(self.free_end() - SLOT_SIZE as u16);
        self.set_slot_entry(slot, offset, record.len() as u16);
        self.set_slot_count(slot + 1);

        Ok(slot)
    }

    /// Fetch the bytes stored at `slot`.
    ///
    /// # Errors
    /// [`GraniteError::SlotOutOfBounds`] if `slot >= slot_count()`;
    /// [`GraniteError::SlotEmpty`] if the slot has been deleted.
    pub fn record(&self, slot: u16) -> Result<&[u8]> {
        let (offset, length) = self
            .slot_entry(slot)
            .ok_or(GraniteError::SlotOutOfBounds(slot))?;
        if length == 0 {
            return Err(GraniteError::SlotEmpty(slot));
        }
        Ok(&self.buf[offset as usize..offset as usize + length as usize])
    }

    /// Iterate live records in slot order, skipping tombstones.
    pub fn records(&self) -> impl Iterator<Item = (u16, &[u8])> {
        (0..self.slot_count()).filter_map(move |slot| {
            let (offset, length) = self.slot_entry(slot)?;
            if length == 0 {
                None
            } else {
                Some((slot, &self.buf[offset as usize..offset as usize + length as usize]))
            }
        })
    }

    /// Mark `slot` deleted. Data bytes are not reclaimed.
    ///
    /// # Errors
    /// [`GraniteError::SlotOutOfBounds`] if `slot >= slot_count()`;
    /// [`GraniteError::SlotEmpty`] if already deleted.
    pub fn delete(&mut self, slot: u16) -> Result<()> {
        let (offset, length) = self
            .slot_entry(slot)
            .ok_or(GraniteError::SlotOutOfBounds(slot))?;
        if length == 0 {
            return Err(GraniteError::SlotEmpty(slot));
        }
        self.set_slot_entry(slot, offset, 0);
        Ok(())
    }
}
