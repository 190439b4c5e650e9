use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or saving a transfer state file.
#[derive(Debug, Error)]
pub enum StateError {
    /// No state file exists at the given path.
    #[error("no state file at {0:?}")]
    NotFound(PathBuf),

    /// The state file exists but cannot be trusted as a resume point.
    #[error("corrupt state file {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("state file I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Network-level failures of a single attempt.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// No headers or body data arrived within the configured deadline.
    #[error("transport timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("error while receiving body: {0}")]
    Stream(String),

    #[error("response ended after {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("server resumed at byte {actual}, requested {requested}")]
    RangeMismatch { requested: u64, actual: u64 },

    #[error("server sent more than the announced {total} bytes")]
    Overrun { total: u64 },
}

/// Why an attempt did not complete.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Transport(#[from] TransportFailure),

    /// Writing the output file failed. Nothing further is written.
    #[error("output I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("server responded with HTTP {status}")]
    Server { status: u16 },
}

impl TransferError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TransferError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransferError::Transport(TransportFailure::Timeout))
    }
}
