use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the log store and its engine.
///
/// The contract-level kinds (`Open`, `Read`, `Write`, `Commit`,
/// `IterationFatal`, `Compaction`) name the operation that failed and carry
/// the engine-level cause. Nothing in the crate retries; callers decide.
#[derive(Debug, Error)]
pub enum Error {
    /// The store could not be opened or created.
    #[error("failed to open store at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// A point read failed.
    #[error("read failed: {0}")]
    Read(#[source] Box<Error>),

    /// A single-key write or delete failed.
    #[error("write failed: {0}")]
    Write(#[source] Box<Error>),

    /// A batch commit failed. No operation in the batch is visible.
    #[error("commit failed: {0}")]
    Commit(#[source] Box<Error>),

    /// The engine reported a broken cursor mid-scan. Not recoverable locally:
    /// the scan is aborted rather than returning truncated results.
    #[error("fatal iteration state: {0}")]
    IterationFatal(#[source] Box<Error>),

    /// Space reclamation failed. Logical content is unaffected.
    #[error("compaction failed: {0}")]
    Compaction(#[source] Box<Error>),

    /// Operation on a handle that has been closed.
    #[error("store is closed")]
    Closed,

    /// An earlier WAL append or rotation failed, so the log's tail can no
    /// longer be trusted. Mutations are refused until the store is reopened.
    #[error("WAL unusable after earlier failure: {0}")]
    WalFailed(String),

    /// Data corruption detected (CRC mismatch, bad format, etc).
    #[error("corruption: {0}")]
    Corruption(String),

    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error returned by a caller-supplied consumer or visitor.
    #[error(transparent)]
    Callback(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an arbitrary caller error so it can be returned from a
    /// `get_value` consumer or an `iterate_value` visitor.
    pub fn callback<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Callback(err.into())
    }

    pub(crate) fn open(path: impl Into<PathBuf>, source: Error) -> Self {
        Error::Open {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn read(source: Error) -> Self {
        Self::wrap(source, Error::Read)
    }

    pub(crate) fn write(source: Error) -> Self {
        Self::wrap(source, Error::Write)
    }

    pub(crate) fn commit(source: Error) -> Self {
        Self::wrap(source, Error::Commit)
    }

    pub(crate) fn iteration_fatal(source: Error) -> Self {
        Self::wrap(source, Error::IterationFatal)
    }

    pub(crate) fn compaction(source: Error) -> Self {
        Self::wrap(source, Error::Compaction)
    }

    /// `Closed` and caller errors pass through untouched; everything else is
    /// tagged with the operation that hit it.
    fn wrap(source: Error, kind: fn(Box<Error>) -> Error) -> Self {
        match source {
            Error::Closed | Error::Callback(_) => source,
            other => kind(Box::new(other)),
        }
    }

    /// True for the unrecoverable scan state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::IterationFatal(_))
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
