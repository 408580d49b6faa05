use thiserror::Error;

/// Transport-level failures talking to the remote store.
///
/// Both variants are retryable: the queue leaves the item pending and the
/// next drain trigger re-attempts.  A timeout is deliberately reported as a
/// network error so a hung request lands on the same retry path instead of
/// leaving a queue item stuck in `Sending`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Remote store unreachable")]
    Unreachable,

    #[error("Remote call timed out after {0} ms")]
    Timeout(u64),
}

/// Application-level failures reported by the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The requested document does not exist.  Treated as "skip this
    /// entity" during sync, never as fatal.
    #[error("Remote document not found")]
    NotFound,

    #[error("Permission denied by remote store")]
    PermissionDenied,

    #[error("Remote store error: {0}")]
    Unknown(String),
}
