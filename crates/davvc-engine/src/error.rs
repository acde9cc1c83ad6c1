use thiserror::Error;

/// Errors that can occur while operating on a file's version history.
#[derive(Debug, Error)]
pub enum VcError {
    /// The requested revision does not resolve to a commit in the file's
    /// repository.
    #[error("unknown version: {0}")]
    UnknownVersion(String),

    /// Checkin was attempted while HEAD is detached at a historical commit.
    #[error("cannot check in from a checked out version")]
    CheckedOut,

    /// A checkin that would not change the tracked content.
    #[error("checkin produced no change")]
    EmptyCommit,

    /// I/O error while provisioning or mutating the trees.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error from the repository library.
    #[error("repository error: {0}")]
    Git(#[from] git2::Error),
}

/// Result type for engine operations.
pub type VcResult<T> = std::result::Result<T, VcError>;
