//! Transaction lifecycle and the log-then-write helper.
//!
//! A [`Transaction`] is a handle returned by [`TransactionManager::begin`].
//! Callers thread it through every mutating heap-file operation; each of
//! those operations funnels its page write through [`log_then_write`],
//! which appends the post-image to the WAL, syncs, writes the page, and
//! records an undo entry so [`TransactionManager::rollback`] can restore
//! the pre-image.
//!
//! Isolation is read-committed only: there is no MVCC and no snapshot
//! view. Concurrent access to the same resource is serialised by the
//! [`crate::lock`] manager, not by this module.

use std::sync::Mutex;

use crate::error::{GraniteError, Result};
use crate::lock::LockManager;
use crate::pager::{PageId, Pager, PAGE_SIZE};
use crate::wal::{RecordType, Wal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    RolledBack,
}

/// One step of rollback: restore a page to its pre-write image.
///
/// Every heap-file mutation — insert, update, delete, or page-link
/// metadata — collapses to "this page changed from `before` to `after`",
/// so a single variant is enough to undo any of them.
enum UndoEntry {
    RestorePage { page_id: PageId, before: Box<[u8; PAGE_SIZE]> },
}

/// A running (or finished) transaction handle.
pub struct Transaction {
    id: u64,
    state: TxnState,
    start_lsn: Option<u64>,
    last_lsn: u64,
    undo: Vec<UndoEntry>,
    autocommit: bool,
}

impl Transaction {
    /// The transaction's id, monotonically assigned by
    /// [`TransactionManager::begin`]. Never 0 — that id is reserved to
    /// mean "no transaction" during recovery.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this transaction is still open for writes.
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Whether this transaction was opened implicitly by a single
    /// statement rather than an explicit `BEGIN`.
    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }
}

/// Allocates transaction ids and drives commit/rollback. Stateless beyond
/// the id counter — the pager, WAL, and lock manager it operates on are
/// passed in by the caller, since they are independently-locked siblings
/// rather than children of this manager.
pub struct TransactionManager {
    next_id: Mutex<u64>,
}

impl TransactionManager {
    pub fn new() -> Self {
        TransactionManager { next_id: Mutex::new(1) }
    }

    /// Start a new transaction.
    pub fn begin(&self, autocommit: bool) -> Transaction {
        let mut next = self.next_id.lock().unwrap_or_else(|p| p.into_inner());
        let id = *next;
        *next += 1;
        Transaction {
            id,
            state: TxnState::Active,
            start_lsn: None,
            last_lsn: 0,
            undo: Vec::new(),
            autocommit,
        }
    }

    /// Commit `txn`: append a `Commit` record, sync the WAL, and release
    /// every lock it holds.
    pub fn commit(&self, wal: &Wal, lock_mgr: &LockManager, txn: &mut Transaction) -> Result<()> {
        if !txn.is_active() {
            return Err(GraniteError::Transaction("transaction is not active".into()));
        }
        wal.append(txn.id, txn.last_lsn, RecordType::Commit, 0, &[])?;
        wal.sync()?;
        txn.state = TxnState::Committed;
        lock_mgr.release_all(txn.id);
        Ok(())
    }

    /// Roll back `txn`: replay its undo log in reverse, append an `Abort`
    /// record, sync the WAL, and release every lock it holds.
    pub fn rollback(
        &self,
        pager: &Pager,
        wal: &Wal,
        lock_mgr: &LockManager,
        txn: &mut Transaction,
    ) -> Result<()> {
        if !txn.is_active() {
            return Err(GraniteError::Transaction("transaction is not active".into()));
        }
        for undo in txn.undo.drain(..).rev() {
            match undo {
                UndoEntry::RestorePage { page_id, before } => {
                    pager.write_page(page_id, &before)?;
                }
            }
        }
        wal.append(txn.id, txn.last_lsn, RecordType::Abort, 0, &[])?;
        wal.sync()?;
        txn.state = TxnState::RolledBack;
        lock_mgr.release_all(txn.id);
        Ok(())
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Append `after`'s image to the WAL, sync, write the page, and record an
/// undo entry restoring `before`.
///
/// This is the engine's single choke point for durable page mutation:
/// every heap-file write goes through it so the WAL is always ahead of
/// the data file.
pub fn log_then_write(
    wal: &Wal,
    pager: &Pager,
    txn: &mut Transaction,
    record_type: RecordType,
    page_id: PageId,
    before: &[u8; PAGE_SIZE],
    after: &[u8; PAGE_SIZE],
) -> Result<()> {
    if !txn.is_active() {
        return Err(GraniteError::Transaction("transaction is not active".into()));
    }

    let lsn = wal.append(txn.id, txn.last_lsn, record_type, page_id, &crate::wal::page_payload(after))?;
    wal.sync()?;

    if txn.start_lsn.is_none() {
        txn.start_lsn = Some(lsn);
    }
    txn.last_lsn = lsn;

    pager.write_page(page_id, after)?;
    txn.undo.push(UndoEntry::RestorePage { page_id, before: Box::new(*before) });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;
    use crate::pager::PAGE_SIZE;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn harness() -> (Pager, Wal, LockManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path: PathBuf = dir.path().join("t.gdb");
        let wal_path = crate::pager::wal_path_for(&db_path);
        let pager = Pager::create(&db_path).unwrap();
        let wal = Wal::open(&wal_path).unwrap();
        (pager, wal, LockManager::new(), dir)
    }

    #[test]
    fn begin_assigns_increasing_ids() {
        let mgr = TransactionManager::new();
        let t1 = mgr.begin(false);
        let t2 = mgr.begin(false);
        assert_eq!(t1.id(), 1);
        assert_eq!(t2.id(), 2);
    }

    #[test]
    fn commit_marks_inactive_and_releases_locks() {
        let (_pager, wal, locks, _dir) = harness();
        let mgr = TransactionManager::new();
        let mut txn = mgr.begin(false);
        locks
            .acquire(txn.id(), crate::lock::Resource::table("t"), crate::lock::LockMode::Exclusive)
            .unwrap();

        mgr.commit(&wal, &locks, &mut txn).unwrap();
        assert!(!txn.is_active());

        // Lock was released: another txn can now take it.
        locks
            .acquire(99, crate::lock::Resource::table("t"), crate::lock::LockMode::Exclusive)
            .unwrap();
    }

    #[test]
    fn rollback_restores_pre_image() {
        let (pager, wal, locks, _dir) = harness();
        let mgr = TransactionManager::new();
        let mut txn = mgr.begin(false);

        let page_id = pager.allocate_page().unwrap();
        let before = pager.read_page(page_id).unwrap();
        let mut after = before;
        after[0] = 0xAB;

        log_then_write(&wal, &pager, &mut txn, RecordType::Update, page_id, &before, &after).unwrap();
        assert_eq!(pager.read_page(page_id).unwrap()[0], 0xAB);

        mgr.rollback(&pager, &wal, &locks, &mut txn).unwrap();
        assert_eq!(pager.read_page(page_id).unwrap()[0], 0);
    }

    #[test]
    fn double_commit_errors() {
        let (_pager, wal, locks, _dir) = harness();
        let mgr = TransactionManager::new();
        let mut txn = mgr.begin(false);
        mgr.commit(&wal, &locks, &mut txn).unwrap();
        assert!(mgr.commit(&wal, &locks, &mut txn).is_err());
    }

    #[test]
    fn log_then_write_tracks_lsn_chain() {
        let (pager, wal, _locks, _dir) = harness();
        let mgr = TransactionManager::new();
        let mut txn = mgr.begin(false);

        let p1 = pager.allocate_page().unwrap();
        let before = pager.read_page(p1).unwrap();
        let mut after = before;
        after[0] = 1;
        log_then_write(&wal, &pager, &mut txn, RecordType::Insert, p1, &before, &after).unwrap();
        let first_lsn = txn.last_lsn;
        assert_eq!(txn.start_lsn, Some(first_lsn));

        let before2 = after;
        let mut after2 = before2;
        after2[1] = 2;
        log_then_write(&wal, &pager, &mut txn, RecordType::Update, p1, &before2, &after2).unwrap();
        assert!(txn.last_lsn > first_lsn);
        assert_eq!(txn.start_lsn, Some(first_lsn));
    }

    #[test]
    fn mutation_after_commit_is_rejected() {
        let (pager, wal, locks, _dir) = harness();
        let mgr = TransactionManager::new();
        let mut txn = mgr.begin(false);
        mgr.commit(&wal, &locks, &mut txn).unwrap();

        let p1 = pager.allocate_page().unwrap();
        let before = pager.read_page(p1).unwrap();
        let after = before;
        assert!(log_then_write(&wal, &pager, &mut txn, RecordType::Insert, p1, &before, &after).is_err());
    }
}
