use crate::edition::EditionId;
use crate::hash::ContentHash;
use crate::state::Source;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure surfaced by the content engine.
///
/// Errors are propagated to the caller unchanged; the engine retries nothing
/// internally. Lock acquisition polls within its own timeout, but business
/// logic is never re-run across a `LockExpired`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("session is read-only; checkout a working label to edit")]
    ReadOnlyMode,

    #[error("label {label:?} is already in use")]
    LabelInUse { label: String },

    #[error("operation requires an editing session")]
    NotInEditingMode,

    #[error("no transaction is open")]
    NotInTransaction,

    #[error("a transaction is already open")]
    AlreadyInTransaction,

    #[error("no pending submission for edition {edition}")]
    PendingNotFound { edition: EditionId },

    #[error("pending submission for edition {edition} is corrupt: {reason}")]
    PendingCorrupt { edition: EditionId, reason: String },

    #[error("base edition {base} no longer matches the current {source} edition {current}")]
    ConflictDetected {
        base: EditionId,
        current: EditionId,
        source: Source,
    },

    #[error("timed out acquiring the lock")]
    LockTimeout,

    #[error("lock lease expired or was taken over")]
    LockExpired,

    #[error("object digest mismatch: expected {expected}, read {actual}")]
    Integrity {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error(transparent)]
    Storage(#[from] storage::Error),
}

impl Error {
    pub(crate) fn invalid_path(path: &str, reason: &'static str) -> Error {
        Error::InvalidPath {
            path: path.to_string(),
            reason,
        }
    }

    pub(crate) fn not_found(path: &str) -> Error {
        Error::NotFound {
            path: path.to_string(),
        }
    }
}
