//! Heap files: primary row storage as a linked list of slotted pages.

pub mod file;
pub mod page;

pub use file::HeapFile;
pub use page::{HeapPage, Rid, HEAP_HEADER_SIZE, SLOT_SIZE};
