//! Crash recovery: two-pass forward REDO.
//!
//! [`recover`] is run once, synchronously, by [`crate::Database::open`]
//! before any caller can begin a transaction. It never rolls anything
//! back — rollback is handled at commit time by undo entries, so by the
//! time a crash is recovered from, every effect still in the WAL that
//! belongs to a committed transaction is safe to replay, and everything
//! else is safe to ignore.
//!
//! Pass one scans the whole log once to build the set of committed and
//! aborted transaction ids. Pass two re-scans and replays only
//! data-bearing records (`Insert`/`Update`/`Delete`/`PageMeta`) whose
//! transaction committed and did not abort. Records with `txn_id == 0`
//! are always skipped — that id is reserved and never assigned to a real
//! transaction.

use std::collections::HashSet;

use crate::error::{GraniteError, Result};
use crate::pager::{Pager, PAGE_SIZE};
use crate::wal::{RecordType, Wal};

/// Replay every committed, data-bearing WAL record against `pager`.
pub fn recover(pager: &Pager, wal: &Wal) -> Result<()> {
    let records = wal.scan()?;

    let mut committed: HashSet<u64> = HashSet::new();
    let mut aborted: HashSet<u64> = HashSet::new();
    for record in &records {
        match record.record_type {
            RecordType::Commit => {
                committed.insert(record.txn_id);
            }
            RecordType::Abort => {
                aborted.insert(record.txn_id);
            }
            _ => {}
        }
    }

    let mut replayed = 0u64;
    for record in &records {
        if record.record_type.is_terminal() {
            continue;
        }
        if record.txn_id == 0 {
            continue;
        }
        if !committed.contains(&record.txn_id) || aborted.contains(&record.txn_id) {
            continue;
        }

        if record.payload.len() != PAGE_SIZE {
            return Err(GraniteError::InvalidWalPayload(format!(
                "record at lsn {} has payload length {}, expected {}",
                record.lsn,
                record.payload.len(),
                PAGE_SIZE
            )));
        }

        let mut page = [0u8; PAGE_SIZE];
        page.copy_from_slice(&record.payload);
        pager.write_page(record.page_id, &page)?;
        replayed += 1;
    }

    if replayed > 0 {
        log::info!("recovery: replayed {replayed} record(s) from {} committed transaction(s)", committed.len());
    }

    pager.sync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapFile;
    use crate::lock::LockManager;
    use crate::txn::TransactionManager;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn harness() -> (PathBuf, PathBuf, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("t.gdb");
        let wal_path = crate::pager::wal_path_for(&db_path);
        (db_path, wal_path, dir)
    }

    #[test]
    fn committed_writes_are_redone() {
        let (db_path, wal_path, _dir) = harness();
        let root;
        {
            let pager = Pager::create(&db_path).unwrap();
            let wal = Wal::open(&wal_path).unwrap();
            let locks = LockManager::new();
            let txns = TransactionManager::new();

            let heap = HeapFile::create(&pager).unwrap();
            root = heap.root_page();
            let mut txn = txns.begin(false);
            heap.insert(&pager, &wal, &mut txn, b"durable-row").unwrap();
            txns.commit(&wal, &locks, &mut txn).unwrap();
        }

        // Simulate a crash: reopen the pager without the in-memory heap
        // state and run recovery before trusting the page contents.
        let pager = Pager::open(&db_path).unwrap();
        let wal = Wal::open(&wal_path).unwrap();
        recover(&pager, &wal).unwrap();

        let heap = HeapFile::open(root);
        let mut seen = Vec::new();
        heap.scan(&pager, |_, bytes| seen.push(bytes.to_vec())).unwrap();
        assert_eq!(seen, vec![b"durable-row".to_vec()]);
    }

    #[test]
    fn uncommitted_writes_are_discarded() {
        let (db_path, wal_path, _dir) = harness();
        let root;
        {
            let pager = Pager::create(&db_path).unwrap();
            let wal = Wal::open(&wal_path).unwrap();
            let txns = TransactionManager::new();

            let heap = HeapFile::create(&pager).unwrap();
            root = heap.root_page();
            let mut txn = txns.begin(false);
            // Never committed: WAL record exists, page write happened,
            // but there is no Commit record for this txn id.
            heap.insert(&pager, &wal, &mut txn, b"uncommitted").unwrap();
        }

        let pager = Pager::open(&db_path).unwrap();
        let wal = Wal::open(&wal_path).unwrap();
        recover(&pager, &wal).unwrap();

        let heap = HeapFile::open(root);
        let mut seen = Vec::new();
        heap.scan(&pager, |_, bytes| seen.push(bytes.to_vec())).unwrap();
        assert!(seen.is_empty());
    }

    #[test]
    fn aborted_writes_are_discarded_even_if_a_commit_record_exists_for_another_txn() {
        let (db_path, wal_path, _dir) = harness();
        let root;
        {
            let pager = Pager::create(&db_path).unwrap();
            let wal = Wal::open(&wal_path).unwrap();
            let locks = LockManager::new();
            let txns = TransactionManager::new();

            let heap = HeapFile::create(&pager).unwrap();
            root = heap.root_page();

            let mut aborted_txn = txns.begin(false);
            heap.insert(&pager, &wal, &mut aborted_txn, b"will-be-undone").unwrap();
            txns.rollback(&pager, &wal, &locks, &mut aborted_txn).unwrap();

            let mut committed_txn = txns.begin(false);
            heap.insert(&pager, &wal, &mut committed_txn, b"kept").unwrap();
            txns.commit(&wal, &locks, &mut committed_txn).unwrap();
        }

        let pager = Pager::open(&db_path).unwrap();
        let wal = Wal::open(&wal_path).unwrap();
        recover(&pager, &wal).unwrap();

        let heap = HeapFile::open(root);
        let mut seen = Vec::new();
        heap.scan(&pager, |_, bytes| seen.push(bytes.to_vec())).unwrap();
        assert_eq!(seen, vec![b"kept".to_vec()]);
    }

    #[test]
    fn empty_log_recovers_cleanly() {
        let (db_path, wal_path, _dir) = harness();
        let _pager_create = Pager::create(&db_path).unwrap();
        let pager = Pager::open(&db_path).unwrap();
        let wal = Wal::open(&wal_path).unwrap();
        recover(&pager, &wal).unwrap();
    }
}
