//! # GraniteDB
//!
//! Storage and transaction core for a single-file relational database:
//! fixed-size page I/O ([`pager`]), slotted-page heap files ([`heap`]),
//! a checksummed write-ahead log ([`wal`]), crash recovery
//! ([`recovery`]), per-resource locking ([`lock`]), and transaction
//! lifecycle ([`txn`]).
//!
//! This crate is a storage engine, not a database server: there is no
//! SQL parser, query planner, or executor here. [`Database`] wires the
//! pieces above together behind one facade and is meant to be driven by
//! an external executor that owns schema, types, and query semantics.
//! Isolation is read-committed, enforced by the lock manager — there is
//! no MVCC or snapshot isolation.

pub mod catalog;
pub mod error;
pub mod heap;
pub mod lock;
pub mod pager;
pub mod recovery;
pub mod txn;
pub mod wal;

pub use error::{GraniteError, Result};
pub use heap::{HeapFile, Rid};
pub use lock::{LockManager, LockMode, Resource};
pub use pager::{PageId, Pager};
pub use txn::{Transaction, TransactionManager};
pub use wal::Wal;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use catalog::Registry;

/// Identifies a caller's logical connection to the database, threading
/// its transaction state through [`Database`] without relying on thread
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// The storage and transaction core's public facade: a single-file
/// database made of a pager, a WAL, a lock manager, a transaction
/// manager, and a table registry.
pub struct Database {
    path: PathBuf,
    pager: Pager,
    wal: Wal,
    locks: LockManager,
    txns: TransactionManager,
    registry: Mutex<Registry>,
    sessions: Mutex<HashMap<SessionId, Transaction>>,
}

impl Database {
    /// Create a brand-new database file at `path`.
    ///
    /// # Errors
    /// Fails if a file already exists at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pager = Pager::create(&path)?;
        let wal = Wal::open(&pager::wal_path_for(&path))?;

        let registry = Registry::new();
        pager.update_catalog(&registry.encode())?;

        Ok(Database {
            path,
            pager,
            wal,
            locks: LockManager::new(),
            txns: TransactionManager::new(),
            registry: Mutex::new(registry),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Open an existing database file at `path`, running crash recovery
    /// before returning.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pager = Pager::open(&path)?;
        let wal = Wal::open(&pager::wal_path_for(&path))?;

        recovery::recover(&pager, &wal)?;

        let registry = Registry::decode(&pager.catalog_data())?;

        Ok(Database {
            path,
            pager,
            wal,
            locks: LockManager::new(),
            txns: TransactionManager::new(),
            registry: Mutex::new(registry),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Flush the pager and WAL to stable storage.
    pub fn close(self) -> Result<()> {
        self.wal.sync()?;
        self.pager.sync()
    }

    /// The path this database was opened/created at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin an explicit transaction for `session`.
    ///
    /// # Errors
    /// [`GraniteError::TransactionAlreadyActive`] if `session` already has
    /// an open transaction.
    pub fn begin(&self, session: SessionId) -> Result<()> {
        let mut sessions = self.lock_sessions();
        if sessions.contains_key(&session) {
            return Err(GraniteError::TransactionAlreadyActive);
        }
        sessions.insert(session, self.txns.begin(false));
        Ok(())
    }

    /// Commit `session`'s open transaction.
    ///
    /// # Errors
    /// [`GraniteError::NoActiveTransaction`] if `session` has none open.
    pub fn commit(&self, session: SessionId) -> Result<()> {
        let mut txn = self.take_session_txn(session)?;
        self.txns.commit(&self.wal, &self.locks, &mut txn)
    }

    /// Roll back `session`'s open transaction.
    ///
    /// # Errors
    /// [`GraniteError::NoActiveTransaction`] if `session` has none open.
    pub fn rollback(&self, session: SessionId) -> Result<()> {
        let mut txn = self.take_session_txn(session)?;
        self.txns.rollback(&self.pager, &self.wal, &self.locks, &mut txn)
    }

    /// Interpret a bare transaction-control statement (`BEGIN`,
    /// `START TRANSACTION`, `COMMIT`, `ROLLBACK`). Anything else is
    /// rejected — statement execution belongs to an external executor
    /// built on top of this crate's primitives.
    pub fn execute(&self, session: SessionId, statement: &str) -> Result<()> {
        match statement.trim().trim_end_matches(';').to_ascii_uppercase().as_str() {
            "BEGIN" | "START TRANSACTION" => self.begin(session),
            "COMMIT" => self.commit(session),
            "ROLLBACK" => self.rollback(session),
            other => Err(GraniteError::Validation(format!(
                "unsupported statement outside an external executor: {other}"
            ))),
        }
    }

    /// Run `f` against `session`'s already-open transaction.
    ///
    /// # Errors
    /// [`GraniteError::NoActiveTransaction`] if `session` has none open.
    pub fn with_transaction<T>(
        &self,
        session: SessionId,
        f: impl FnOnce(&Pager, &Wal, &mut Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut sessions = self.lock_sessions();
        let txn = sessions.get_mut(&session).ok_or(GraniteError::NoActiveTransaction)?;
        f(&self.pager, &self.wal, txn)
    }

    /// Run `f` inside a single autocommit transaction: begin, run `f`,
    /// commit on success or roll back on error.
    pub fn with_autocommit<T>(
        &self,
        f: impl FnOnce(&Pager, &Wal, &mut Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut txn = self.txns.begin(true);
        match f(&self.pager, &self.wal, &mut txn) {
            Ok(value) => {
                self.txns.commit(&self.wal, &self.locks, &mut txn)?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.txns.rollback(&self.pager, &self.wal, &self.locks, &mut txn);
                Err(err)
            }
        }
    }

    /// Create a new, empty table and register it under `name`.
    ///
    /// # Errors
    /// A [`GraniteError::Validation`] if the name is already taken.
    pub fn create_table(&self, name: &str) -> Result<PageId> {
        let heap = HeapFile::create(&self.pager)?;
        let root = heap.root_page();

        let mut registry = self.lock_registry();
        registry.register(name, root)?;
        self.pager.update_catalog(&registry.encode())?;
        Ok(root)
    }

    /// Open a handle to an existing table's heap file.
    pub fn open_table(&self, name: &str) -> Result<HeapFile> {
        let registry = self.lock_registry();
        let root = registry
            .root_page_of(name)
            .ok_or_else(|| GraniteError::Validation(format!("no such table: {name}")))?;
        Ok(HeapFile::open(root))
    }

    /// The registered tables as `(name, heap-file root page)` pairs.
    pub fn tables(&self) -> Vec<(String, PageId)> {
        self.lock_registry().tables()
    }

    /// The opaque catalog payload stored in the header page.
    pub fn catalog_data(&self) -> Vec<u8> {
        self.pager.catalog_data()
    }

    /// Overwrite the opaque catalog payload. Callers that use this
    /// directly are responsible for preserving the table registry's own
    /// encoding if they still want [`Database::tables`] to work.
    pub fn update_catalog(&self, bytes: &[u8]) -> Result<()> {
        self.pager.update_catalog(bytes)
    }

    /// The lock manager guarding table/row resources.
    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// The underlying pager.
    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    /// The underlying write-ahead log.
    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Transaction>> {
        self.sessions.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn take_session_txn(&self, session: SessionId) -> Result<Transaction> {
        self.lock_sessions().remove(&session).ok_or(GraniteError::NoActiveTransaction)
    }
}
