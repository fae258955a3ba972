//! Low-level page I/O for GraniteDB.
//!
//! The [`Pager`] is the lowest-level storage abstraction in the engine. It
//! views the database file as a flat sequence of fixed-size **pages**
//! ([`PAGE_SIZE`] = 4096 bytes each) and provides read / write / allocate /
//! free operations on those pages plus persistence of the database header
//! and the opaque catalog payload that lives in its tail.
//!
//! The pager knows nothing about the *contents* of pages beyond the header
//! — heap pages, slot directories, and records are all built on top by the
//! [`crate::heap`] module.
//!
//! # File header (page 0)
//!
//! ```text
//! [0..8)   magic       b"GRANITED"
//! [8..10)  version     u16 = 1
//! [10..12) reserved
//! [12..16) page_count  u32
//! [16..20) free_list_head u32 (sentinel = NONE_PAGE)
//! [20..24) catalog_size u32
//! [24..24+catalog_size) catalog payload
//! ```
//!
//! # Free list
//!
//! Freed pages are chained together in a singly-linked list. Each free page
//! stores the [`PageId`] of the next free page in its first four bytes
//! (little-endian). [`Pager::allocate_page`] pops the head of this list;
//! [`Pager::free_page`] pushes onto it.
//!
//! # Concurrency
//!
//! All pager state (including the file handle) lives behind one internal
//! [`Mutex`] — every mutating or reading operation serialises on it, per the
//! single-mutex-per-component discipline the rest of the engine follows.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{GraniteError, Result};

/// Every page in the database file is exactly this many bytes.
pub const PAGE_SIZE: usize = 4096;

/// Bytes of the file header that precede the catalog payload.
pub const HEADER_SIZE: usize = 24;

/// Magic bytes written at offset 0 of every valid GraniteDB file.
pub const MAGIC: &[u8; 8] = b"GRANITED";

/// On-disk format version understood by this build.
pub const VERSION: u16 = 1;

/// Sentinel value meaning "no page" — used as the free-list terminator.
pub const NONE_PAGE: u32 = 0xFFFF_FFFF;

/// Maximum size of the opaque catalog payload stored in page 0.
pub const MAX_CATALOG_SIZE: usize = PAGE_SIZE - HEADER_SIZE;

/// A zero-based page number. Page 0 is always the header page.
pub type PageId = u32;

struct PagerInner {
    file: File,
    page_count: u32,
    free_list_head: u32,
    catalog: Vec<u8>,
}

/// Owns the database file: translates page ids to file offsets, allocates
/// and frees pages, and persists the header + catalog payload.
pub struct Pager {
    inner: Mutex<PagerInner>,
}

impl Pager {
    /// Create a brand-new database file at `path`.
    ///
    /// # Errors
    /// Fails if the file already exists, or on any I/O error.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(GraniteError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("database file already exists: {}", path.display()),
            )));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let blank = vec![0u8; PAGE_SIZE];
        file.write_all(&blank)?;

        let mut inner = PagerInner {
            file,
            page_count: 1,
            free_list_head: NONE_PAGE,
            catalog: Vec::new(),
        };
        inner.flush_header()?;
        inner.file.sync_all()?;

        Ok(Pager { inner: Mutex::new(inner) })
    }

    /// Open an existing database file at `path`.
    ///
    /// # Errors
    /// Returns [`GraniteError::InvalidHeader`] if the magic or version do
    /// not match, or if the file is shorter than one page.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let file_len = file.metadata()?.len();
        if file_len < PAGE_SIZE as u64 {
            return Err(GraniteError::InvalidHeader(
                "file is shorter than a single page".into(),
            ));
        }

        let mut header = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        if &header[0..8] != MAGIC {
            return Err(GraniteError::InvalidHeader("bad magic bytes".into()));
        }
        let version = u16::from_le_bytes([header[8], header[9]]);
        if version != VERSION {
            return Err(GraniteError::InvalidHeader(format!(
                "unsupported version {version}"
            )));
        }
        let page_count = u32::from_le_bytes(header[12..16].try_into().unwrap());
        let free_list_head = u32::from_le_bytes(header[16..20].try_into().unwrap());
        let catalog_size = u32::from_le_bytes(header[20..24].try_into().unwrap()) as usize;

        if catalog_size > MAX_CATALOG_SIZE {
            return Err(GraniteError::InvalidHeader(
                "catalog payload exceeds header page capacity".into(),
            ));
        }
        if page_count == 0 {
            return Err(GraniteError::InvalidHeader("page_count must be >= 1".into()));
        }

        let mut catalog = vec![0u8; catalog_size];
        if catalog_size > 0 {
            file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
            file.read_exact(&mut catalog)?;
        }

        Ok(Pager {
            inner: Mutex::new(PagerInner { file, page_count, free_list_head, catalog }),
        })
    }

    /// Read the page identified by `page_id`.
    ///
    /// # Errors
    /// [`GraniteError::PageOutOfBounds`] if `page_id >= page_count`.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut inner = self.lock();
        inner.read_page(page_id)
    }

    /// Write `data` to the page identified by `page_id`.
    ///
    /// # Errors
    /// [`GraniteError::PageOutOfBounds`] if `page_id >= page_count`.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.lock();
        inner.write_page(page_id, data)
    }

    /// Allocate a page: pop the free-list head if non-empty, otherwise
    /// extend the file by one page. Returns a zeroed buffer's page id.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.lock();
        inner.allocate_page()
    }

    /// Return `page_id` to the free list.
    ///
    /// # Errors
    /// Refuses to free page 0; [`GraniteError::PageOutOfBounds`] if out of
    /// range.
    pub fn free_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.lock();
        inner.free_page(page_id)
    }

    /// Total number of pages, including the header page.
    pub fn page_count(&self) -> u32 {
        self.lock().page_count
    }

    /// Read the opaque catalog payload stored in the header page.
    pub fn catalog_data(&self) -> Vec<u8> {
        self.lock().catalog.clone()
    }

    /// Overwrite the opaque catalog payload and persist the header.
    ///
    /// # Errors
    /// [`GraniteError::CatalogTooLarge`] if `bytes.len() >
    /// MAX_CATALOG_SIZE`.
    pub fn update_catalog(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_CATALOG_SIZE {
            return Err(GraniteError::CatalogTooLarge);
        }
        let mut inner = self.lock();
        inner.catalog = bytes.to_vec();
        inner.flush_header()
    }

    /// Flush the file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.lock().file.sync_all()?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PagerInner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl PagerInner {
    fn read_page(&mut self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        if page_id >= self.page_count {
            return Err(GraniteError::PageOutOfBounds(page_id));
        }
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut buf = [0u8; PAGE_SIZE];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        if page_id >= self.page_count {
            return Err(GraniteError::PageOutOfBounds(page_id));
        }
        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        if self.free_list_head != NONE_PAGE {
            let page_id = self.free_list_head;
            let page = self.read_page(page_id)?;
            let next = u32::from_le_bytes(page[0..4].try_into().unwrap());
            self.free_list_head = next;

            let blank = [0u8; PAGE_SIZE];
            self.write_page(page_id, &blank)?;
            self.flush_header()?;
            Ok(page_id)
        } else {
            let page_id = self.page_count;
            self.page_count += 1;

            let blank = [0u8; PAGE_SIZE];
            let offset = page_id as u64 * PAGE_SIZE as u64;
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(&blank)?;

            self.flush_header()?;
            Ok(page_id)
        }
    }

    fn free_page(&mut self, page_id: PageId) -> Result<()> {
        if page_id == 0 {
            return Err(GraniteError::Internal("cannot free the header page".into()));
        }
        if page_id >= self.page_count {
            return Err(GraniteError::PageOutOfBounds(page_id));
        }

        let mut page = [0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&self.free_list_head.to_le_bytes());
        self.write_page(page_id, &page)?;

        self.free_list_head = page_id;
        self.flush_header()
    }

    fn flush_header(&mut self) -> Result<()> {
        let mut page = vec![0u8; PAGE_SIZE];
        page[0..8].copy_from_slice(MAGIC);
        page[8..10].copy_from_slice(&VERSION.to_le_bytes());
        page[10..12].copy_from_slice(&[0, 0]);
        page[12..16].copy_from_slice(&self.page_count.to_le_bytes());
        page[16..20].copy_from_slice(&self.free_list_head.to_le_bytes());
        page[20..24].copy_from_slice(&(self.catalog.len() as u32).to_le_bytes());
        page[HEADER_SIZE..HEADER_SIZE + self.catalog.len()].copy_from_slice(&self.catalog);

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&page)?;
        Ok(())
    }
}

/// Compute the `.wal` sidecar path for a database file path.
pub fn wal_path_for(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_owned();
    os.push(".wal");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_pager() -> (Pager, TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.gdb");
        let pager = Pager::create(&path).unwrap();
        (pager, dir, path)
    }

    #[test]
    fn create_fails_if_file_exists() {
        let (_pager, _dir, path) = new_pager();
        assert!(Pager::create(&path).is_err());
    }

    #[test]
    fn new_database_has_correct_defaults() {
        let (pager, _dir, _path) = new_pager();
        assert_eq!(pager.page_count(), 1);
        assert!(pager.catalog_data().is_empty());
    }

    #[test]
    fn magic_bytes_are_written() {
        let (pager, _dir, _path) = new_pager();
        let page0 = pager.read_page(0).unwrap();
        assert_eq!(&page0[0..8], MAGIC);
    }

    #[test]
    fn write_then_read_page() {
        let (pager, _dir, _path) = new_pager();
        let page_id = pager.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xCA;
        data[PAGE_SIZE - 1] = 0xFF;
        pager.write_page(page_id, &data).unwrap();

        let read_back = pager.read_page(page_id).unwrap();
        assert_eq!(read_back[0], 0xCA);
        assert_eq!(read_back[PAGE_SIZE - 1], 0xFF);
    }

    #[test]
    fn read_out_of_range_returns_error() {
        let (pager, _dir, _path) = new_pager();
        assert!(matches!(
            pager.read_page(999).unwrap_err(),
            GraniteError::PageOutOfBounds(999)
        ));
    }

    #[test]
    fn allocate_extends_file() {
        let (pager, _dir, _path) = new_pager();
        assert_eq!(pager.allocate_page().unwrap(), 1);
        assert_eq!(pager.allocate_page().unwrap(), 2);
        assert_eq!(pager.page_count(), 3);
    }

    #[test]
    fn allocated_page_is_zeroed() {
        let (pager, _dir, _path) = new_pager();
        let pid = pager.allocate_page().unwrap();
        assert!(pager.read_page(pid).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn free_list_is_lifo() {
        let (pager, _dir, _path) = new_pager();
        let p1 = pager.allocate_page().unwrap();
        let p2 = pager.allocate_page().unwrap();
        let p3 = pager.allocate_page().unwrap();

        pager.free_page(p1).unwrap();
        pager.free_page(p2).unwrap();
        pager.free_page(p3).unwrap();

        assert_eq!(pager.allocate_page().unwrap(), p3);
        assert_eq!(pager.allocate_page().unwrap(), p2);
        assert_eq!(pager.allocate_page().unwrap(), p1);
    }

    #[test]
    fn cannot_free_page_zero() {
        let (pager, _dir, _path) = new_pager();
        assert!(pager.free_page(0).is_err());
    }

    #[test]
    fn free_list_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.gdb");
        {
            let pager = Pager::create(&path).unwrap();
            let p1 = pager.allocate_page().unwrap();
            let _p2 = pager.allocate_page().unwrap();
            pager.free_page(p1).unwrap();
            pager.sync().unwrap();
        }
        {
            let pager = Pager::open(&path).unwrap();
            assert_eq!(pager.allocate_page().unwrap(), 1);
        }
    }

    #[test]
    fn catalog_round_trips() {
        let (pager, _dir, _path) = new_pager();
        pager.update_catalog(b"hello catalog").unwrap();
        assert_eq!(pager.catalog_data(), b"hello catalog");
    }

    #[test]
    fn catalog_too_large_is_rejected() {
        let (pager, _dir, _path) = new_pager();
        let big = vec![0u8; MAX_CATALOG_SIZE + 1];
        assert!(matches!(
            pager.update_catalog(&big).unwrap_err(),
            GraniteError::CatalogTooLarge
        ));
    }

    #[test]
    fn catalog_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.gdb");
        {
            let pager = Pager::create(&path).unwrap();
            pager.update_catalog(b"schema-bytes").unwrap();
            pager.sync().unwrap();
        }
        let pager = Pager::open(&path).unwrap();
        assert_eq!(pager.catalog_data(), b"schema-bytes");
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.gdb");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&[0xFFu8; PAGE_SIZE]).unwrap();
            f.sync_all().unwrap();
        }
        assert!(matches!(
            Pager::open(&path).unwrap_err(),
            GraniteError::InvalidHeader(_)
        ));
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.gdb");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&[0u8; 50]).unwrap();
            f.sync_all().unwrap();
        }
        assert!(matches!(
            Pager::open(&path).unwrap_err(),
            GraniteError::InvalidHeader(_)
        ));
    }

    #[test]
    fn wal_path_appends_extension() {
        let p = Path::new("/tmp/mydb.gdb");
        assert_eq!(wal_path_for(p), PathBuf::from("/tmp/mydb.gdb.wal"));
    }
}
