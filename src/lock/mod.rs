//! Per-resource SHARED/EXCLUSIVE lock manager.
//!
//! Resources are tables or individual rows, named case-insensitively by
//! table name so `"Orders"` and `"orders"` serialise against each other.
//! [`LockManager::acquire`] blocks the calling thread with an adaptive
//! backoff until the lock is grantable or `timeout` elapses, at which
//! point it returns [`GraniteError::LockTimeout`].
//!
//! There is no deadlock detection: callers are expected to acquire locks
//! in a consistent order (table before row) and rely on the timeout to
//! break cycles, same as the bounded-wait scheme it's modelled on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{GraniteError, Result};

/// A lockable resource: an entire table, or one row within a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Table(String),
    Row(String, String),
}

impl Resource {
    /// A table-level resource; `name` is lowercased for comparison.
    pub fn table(name: &str) -> Self {
        Resource::Table(name.to_ascii_lowercase())
    }

    /// A row-level resource; `table` is lowercased, `key` is taken as-is.
    pub fn row(table: &str, key: &str) -> Self {
        Resource::Row(table.to_ascii_lowercase(), key.to_string())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Table(name) => write!(f, "Table({name})"),
            Resource::Row(table, key) => write!(f, "Row({table},{key})"),
        }
    }
}

/// SHARED locks are mutually compatible; EXCLUSIVE excludes everything
/// but the holding transaction's own other locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct Holder {
    txn_id: u64,
    mode: LockMode,
    /// Number of times `txn_id` has acquired this resource. A re-entrant
    /// acquisition only ever raises `mode`; it never lowers it — dropping
    /// back to `Shared` happens solely through `release_all`.
    count: u32,
}

struct LockManagerInner {
    holders: HashMap<Resource, Vec<Holder>>,
}

impl LockManagerInner {
    fn can_grant(&self, resource: &Resource, txn_id: u64, mode: LockMode) -> bool {
        match self.holders.get(resource) {
            None => true,
            Some(holders) => match mode {
                LockMode::Shared => {
                    holders.iter().all(|h| h.txn_id == txn_id || h.mode == LockMode::Shared)
                }
                LockMode::Exclusive => holders.iter().all(|h| h.txn_id == txn_id),
            },
        }
    }

    fn grant(&mut self, resource: Resource, txn_id: u64, mode: LockMode) {
        let holders = self.holders.entry(resource).or_default();
        match holders.iter_mut().find(|h| h.txn_id == txn_id) {
            Some(h) => {
                h.count += 1;
                if mode == LockMode::Exclusive {
                    h.mode = LockMode::Exclusive;
                }
            }
            None => holders.push(Holder { txn_id, mode, count: 1 }),
        }
    }
}

/// The default bound on how long [`LockManager::acquire`] will wait.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Guards table- and row-level resources with SHARED/EXCLUSIVE semantics.
pub struct LockManager {
    inner: Mutex<LockManagerInner>,
    timeout: Duration,
}

impl LockManager {
    /// A lock manager with the default two-second acquire timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// A lock manager with a caller-supplied acquire timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        LockManager { inner: Mutex::new(LockManagerInner { holders: HashMap::new() }), timeout }
    }

    /// Acquire `resource` in `mode` on behalf of `txn_id`, blocking with
    /// adaptive backoff until granted or the timeout elapses.
    ///
    /// # Errors
    /// [`GraniteError::LockTimeout`] if the lock cannot be granted within
    /// the configured timeout.
    pub fn acquire(&self, txn_id: u64, resource: Resource, mode: LockMode) -> Result<()> {
        let deadline = Instant::now() + self.timeout;

        loop {
            {
                let mut inner = self.lock();
                if inner.can_grant(&resource, txn_id, mode) {
                    inner.grant(resource, txn_id, mode);
                    return Ok(());
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::debug!("lock timeout: txn={txn_id} resource={resource}");
                return Err(GraniteError::LockTimeout(resource.to_string()));
            }

            let backoff = (remaining / 10).clamp(Duration::from_millis(5), Duration::from_millis(50));
            thread::sleep(backoff.min(remaining));
        }
    }

    /// Release every lock `txn_id` holds, on any resource, regardless of
    /// how many times it re-acquired each one.
    pub fn release_all(&self, txn_id: u64) {
        let mut inner = self.lock();
        inner.holders.retain(|_, holders| {
            holders.retain(|h| h.txn_id != txn_id);
            !holders.is_empty()
        });
    }

    /// How many times `txn_id` has acquired `resource` without releasing
    /// it. Zero if it does not currently hold the resource at all.
    #[cfg(test)]
    fn hold_count(&self, resource: &Resource, txn_id: u64) -> u32 {
        self.lock()
            .holders
            .get(resource)
            .and_then(|holders| holders.iter().find(|h| h.txn_id == txn_id))
            .map(|h| h.count)
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LockManagerInner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
