//! Heap file: a linked list of [`HeapPage`]s rooted at one page id.
//!
//! `insert` walks the chain from the root looking for the first page with
//! enough free space (first-fit), extending the chain with a freshly
//! allocated page when none is found. `fetch`/`scan`/`delete` address
//! rows by stable [`Rid`] — a row, once inserted, never moves to a
//! different page or slot.

use crate::error::Result;
use crate::pager::{PageId, Pager, NONE_PAGE, PAGE_SIZE};
use crate::txn::{log_then_write, Transaction};
use crate::wal::{RecordType, Wal};

use super::page::{HeapPage, Rid, SLOT_SIZE};

/// A linked list of heap pages holding one table's rows.
pub struct HeapFile {
    root: PageId,
}

impl HeapFile {
    /// Allocate a fresh, empty heap file and return a handle to it.
    pub fn create(pager: &Pager) -> Result<Self> {
        let root = pager.allocate_page()?;
        let mut buf = [0u8; PAGE_SIZE];
        HeapPage::initialise(&mut buf);
        pager.write_page(root, &buf)?;
        Ok(HeapFile { root })
    }

    /// Wrap an existing heap file whose root page is already known (as
    /// recorded in the catalog registry).
    pub fn open(root: PageId) -> Self {
        HeapFile { root }
    }

    /// The page id of this heap file's first page.
    pub fn root_page(&self) -> PageId {
        self.root
    }

    /// Insert `record`, returning the [`Rid`] it was assigned.
    pub fn insert(
        &self,
        pager: &Pager,
        wal: &Wal,
        txn: &mut Transaction,
        record: &[u8],
    ) -> Result<Rid> {
        let mut page_id = self.root;

        loop {
            let before = pager.read_page(page_id)?;
            let mut after = before;

            let (fits, next) = {
                let page = HeapPage::wrap(&mut after);
                (record.len() + SLOT_SIZE <= page.free_space(), page.next_page())
            };

            if fits {
                let slot = HeapPage::wrap(&mut after).insert(record)?;
                log_then_write(wal, pager, txn, RecordType::Insert, page_id, &before, &after)?;
                return Ok(Rid::new(page_id, slot));
            }

            if next != NONE_PAGE {
                page_id = next;
                continue;
            }

            let new_id = pager.allocate_page()?;
            let mut new_buf = [0u8; PAGE_SIZE];
            HeapPage::initialise(&mut new_buf);
            pager.write_page(new_id, &new_buf)?;

            let mut linked = before;
            HeapPage::wrap(&mut linked).set_next_page(new_id);
            log_then_write(wal, pager, txn, RecordType::PageMeta, page_id, &before, &linked)?;

            page_id = new_id;
        }
    }

    /// Fetch the bytes stored at `rid`.
    pub fn fetch(&self, pager: &Pager, rid: Rid) -> Result<Vec<u8>> {
        let mut buf = pager.read_page(rid.page_id)?;
        let page = HeapPage::wrap(&mut buf);
        page.record(rid.slot).map(|bytes| bytes.to_vec())
    }

    /// Visit every live row in the heap file in page/slot order.
    pub fn scan<F>(&self, pager: &Pager, mut f: F) -> Result<()>
    where
        F: FnMut(Rid, &[u8]),
    {
        let mut page_id = self.root;
        loop {
            let mut buf = pager.read_page(page_id)?;
            let next = {
                let page = HeapPage::wrap(&mut buf);
                for (slot, bytes) in page.records() {
                    f(Rid::new(page_id, slot), bytes);
                }
                page.next_page()
            };
            if next == NONE_PAGE {
                break;
            }
            page_id = next;
        }
        Ok(())
    }

    /// Tombstone the row at `rid`. Its bytes are not reclaimed.
    pub fn delete(&self, pager: &Pager, wal: &Wal, txn: &mut Transaction, rid: Rid) -> Result<()> {
        let before = pager.read_page(rid.page_id)?;
        let mut after = before;
        HeapPage::wrap(&mut after).delete(rid.slot)?;
        log_then_write(wal, pager, txn, RecordType::Delete, rid.page_id, &before, &after)
    }
}
