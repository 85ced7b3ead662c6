//! Storage and sync error types.

use std::io;

use thiserror::Error;

/// Errors from a [`Store`](crate::Store) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing stored under this path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path escapes the store's root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Stored bytes are not valid UTF-8 text.
    #[error("not text: {0}")]
    NotText(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True for the "absent resource" case that callers treat as empty.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the [`Hoarder`](crate::Hoarder).
#[derive(Debug, Error)]
pub enum SyncError {
    /// Reading or writing a store failed.
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },

    /// A stored blob could not be decoded.
    #[error("cannot parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("no cloud store configured")]
    NoCloudStore,

    #[error("no cloud path configured")]
    NoCloudPath,
}

impl SyncError {
    pub(crate) fn store(context: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn parse(what: &'static str, source: serde_json::Error) -> Self {
        Self::Parse { what, source }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
