//! Error types for the indexing engine and the ledger.
//!
//! Store backends and the CLI use `anyhow::Result`. The engine, scanner,
//! and ledger need callers to tell a fatal ledger failure apart from a
//! recoverable per-file store failure, so they return these typed errors.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

/// Failures raised by the [`Ledger`](crate::ledger::Ledger).
///
/// Every variant is fatal to the caller of a mutating ledger operation:
/// a document must never be reported as indexed when its ledger entry was
/// not durably written.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("cannot read modification time of {}: {source}", .path.display())]
    ModTime {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger file {} is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("ledger persistence failed: {0}")]
    Persistence(String),
}

/// Failures raised by the engine, the reconciler, and the scanner.
#[derive(Error, Debug)]
pub enum IndexError {
    /// A content store call returned an error (connection refused, bad
    /// response, constraint violation).
    #[error("content store error: {0:#}")]
    Store(anyhow::Error),

    /// A content store call exceeded its time budget.
    #[error("content store operation `{op}` timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `process` was handed a lock guard for a different document.
    #[error("lock held for `{held}` but document is `{requested}`")]
    LockMismatch { held: String, requested: String },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// True for errors caused by the content store (including timeouts).
    ///
    /// The scanner counts these toward its consecutive-failure limit.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, IndexError::Store(_) | IndexError::Timeout { .. })
    }

    /// True for errors that must abort a scan instead of failing one file.
    ///
    /// A file whose modification time became unreadable (deleted mid-scan)
    /// only fails that file; every other ledger error is fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            IndexError::Ledger(LedgerError::ModTime { .. }) => false,
            IndexError::Ledger(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_timeout_count_as_store_failures() {
        assert!(IndexError::Store(anyhow::anyhow!("down")).is_store_failure());
        assert!(IndexError::Timeout { op: "count", secs: 5 }.is_store_failure());
        assert!(!IndexError::Other("x".into()).is_store_failure());
    }

    #[test]
    fn ledger_write_errors_are_fatal() {
        let err: IndexError = LedgerError::Persistence("disk full".into()).into();
        assert!(err.is_fatal());
        assert!(!IndexError::Store(anyhow::anyhow!("down")).is_fatal());
    }

    #[test]
    fn vanished_file_is_not_fatal() {
        let err: IndexError = LedgerError::ModTime {
            path: PathBuf::from("/data/gone.pdf"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
        .into();
        assert!(!err.is_fatal());
    }
}
