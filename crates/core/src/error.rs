//! Error taxonomy shared by every cairn crate

use crate::hash::Digest;
use crate::RevisionId;

/// Common result type used throughout cairn
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by repository, workdir and transport operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Referenced session, revision, blob or path does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Creation against an identity that already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("session already exists: {0}")]
    DuplicateSession(String),

    /// Optimistic concurrency violation: the session moved on since `parent`
    #[error("stale parent for session '{session}': committed against revision {parent} but head is {head}")]
    StaleParent {
        session: String,
        parent: RevisionId,
        head: RevisionId,
    },

    /// Policy violation the user can act on
    #[error("{0}")]
    UserError(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Stored payload does not hash to its address
    #[error("corrupt blob {digest}: content hashes to {actual}")]
    CorruptBlob { digest: Digest, actual: String },

    /// Malformed tree, revision or metadata record
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Remote transport failure (connection loss, malformed frame)
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn user(msg: impl Into<String>) -> Self {
        Self::UserError(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Whether the caller may retry after re-synchronizing
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleParent { .. } | Self::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_parent_message() {
        let err = Error::StaleParent {
            session: "docs".to_string(),
            parent: 3,
            head: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("docs"));
        assert!(msg.contains("revision 3"));
        assert!(msg.contains("head is 5"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_retryable());
    }
}
