use crate::{EntityId, StorePath, Write};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Malformed record at {path}: {reason}")]
    MalformedRecord { path: StorePath, reason: String },

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Entity not found {0}")]
    NotFound(EntityId),

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Partial commit: wrote {committed:?} but failed writing {failed}: {reason}")]
    PartialCommit {
        /// Locations that were written, in order
        committed: Vec<StorePath>,

        /// Location whose write failed
        failed: StorePath,

        /// Writes not yet applied, starting with the failed one
        remaining: Vec<Write>,

        reason: String,
    },
}

impl Error {
    pub fn malformed(path: StorePath, reason: impl Into<String>) -> Error {
        Error::MalformedRecord {
            path,
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Error {
        Error::RemoteUnavailable(reason.into())
    }

    /// Returns true if the same intent may be submitted again as is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RemoteUnavailable(_) | Error::PartialCommit { .. }
        )
    }
}
