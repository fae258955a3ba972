//! Unified error handling for GraniteDB's storage core.
//!
//! [`GraniteError`] is the single error type propagated by the pager, heap
//! files, WAL, lock manager, transaction manager, and recovery. A
//! [`Result<T>`] alias is re-exported so callers can write `Result<T>`
//! instead of spelling out `std::result::Result<T, GraniteError>`.
//!
//! Several `Display` strings are part of the stable boundary the executor
//! and CLI depend on for error matching; see the doc comment on each
//! variant below for the exact wording.

use std::fmt;
use std::io;

/// The canonical error type for GraniteDB's storage and transaction core.
#[derive(Debug)]
pub enum GraniteError {
    /// An I/O error from the filesystem or disk layer.
    Io(io::Error),

    /// `"invalid database header"` — magic or version mismatch on open, or
    /// any other header-level corruption.
    InvalidHeader(String),

    /// `"catalog payload exceeds header page capacity"`.
    CatalogTooLarge,

    /// `"page <id> out of bounds"`.
    PageOutOfBounds(u32),

    /// `"slot <n> out of bounds"` — slot index beyond the page's slot
    /// directory.
    SlotOutOfBounds(u16),

    /// `"slot <n> is empty"` — slot exists but is tombstoned (length 0).
    SlotEmpty(u16),

    /// `"heap file has no root page"`.
    NoRootPage,

    /// `"lock timeout on <resource>"`.
    LockTimeout(String),

    /// `"transaction already active"`.
    TransactionAlreadyActive,

    /// `"no active transaction"`.
    NoActiveTransaction,

    /// A transaction-lifecycle error that is not one of the stable
    /// boundary strings above (e.g. committing a transaction twice).
    Transaction(String),

    /// Validation failure surfaced from the executor layer (malformed
    /// input, unknown column/table, type mismatch). The core itself never
    /// raises this, but carries it through `execute`'s autocommit wrapper.
    Validation(String),

    /// Constraint violation surfaced from the executor layer.
    Constraint(String),

    /// A WAL record's `payload_len` did not match `PAGE_SIZE` during
    /// recovery; `open` refuses to proceed.
    InvalidWalPayload(String),

    /// An internal invariant was violated; indicates a bug in the engine.
    Internal(String),
}

impl fmt::Display for GraniteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraniteError::Io(err) => write!(f, "I/O error: {err}"),
            GraniteError::InvalidHeader(msg) => write!(f, "invalid database header: {msg}"),
            GraniteError::CatalogTooLarge => {
                write!(f, "catalog payload exceeds header page capacity")
            }
            GraniteError::PageOutOfBounds(id) => write!(f, "page {id} out of bounds"),
            GraniteError::SlotOutOfBounds(slot) => write!(f, "slot {slot} out of bounds"),
            GraniteError::SlotEmpty(slot) => write!(f, "slot {slot} is empty"),
            GraniteError::NoRootPage => write!(f, "heap file has no root page"),
            GraniteError::LockTimeout(resource) => write!(f, "lock timeout on {resource}"),
            GraniteError::TransactionAlreadyActive => write!(f, "transaction already active"),
            GraniteError::NoActiveTransaction => write!(f, "no active transaction"),
            GraniteError::Transaction(msg) => write!(f, "transaction error: {msg}"),
            GraniteError::Validation(msg) => write!(f, "validation error: {msg}"),
            GraniteError::Constraint(msg) => write!(f, "constraint violation: {msg}"),
            GraniteError::InvalidWalPayload(msg) => write!(f, "invalid WAL payload: {msg}"),
            GraniteError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraniteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GraniteError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for GraniteError {
    fn from(err: io::Error) -> Self {
        GraniteError::Io(err)
    }
}

/// A specialised [`Result`] type for GraniteDB's storage core.
pub type Result<T> = std::result::Result<T, GraniteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts_via_question_mark() {
        fn might_fail() -> Result<()> {
            let _f = std::fs::File::open("/non/existent/path/granite_test")?;
            Ok(())
        }
        assert!(matches!(might_fail().unwrap_err(), GraniteError::Io(_)));
    }

    #[test]
    fn stable_boundary_strings_match_spec() {
        let cases: Vec<(GraniteError, &str)> = vec![
            (GraniteError::LockTimeout("Table(t)".into()), "lock timeout on Table(t)"),
            (GraniteError::TransactionAlreadyActive, "transaction already active"),
            (GraniteError::NoActiveTransaction, "no active transaction"),
            (GraniteError::PageOutOfBounds(7), "page 7 out of bounds"),
            (GraniteError::SlotOutOfBounds(3), "slot 3 out of bounds"),
            (GraniteError::SlotEmpty(3), "slot 3 is empty"),
            (
                GraniteError::InvalidHeader("bad magic".into()),
                "invalid database header: bad magic",
            ),
            (
                GraniteError::CatalogTooLarge,
                "catalog payload exceeds header page capacity",
            ),
            (GraniteError::NoRootPage, "heap file has no root page"),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn error_source_chains_io_errors() {
        use std::error::Error;
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = GraniteError::Io(io_err);
        assert!(err.source().is_some());
        assert!(GraniteError::Internal("bug".into()).source().is_none());
    }
}
