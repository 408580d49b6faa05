use palaver_shared::{NetworkError, RemoteError};
use palaver_store::StoreError;
use thiserror::Error;

use crate::remote::RemoteStoreError;

/// Errors surfaced by the sync engine, queue and session.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl From<RemoteStoreError> for SyncError {
    fn from(e: RemoteStoreError) -> Self {
        match e {
            RemoteStoreError::Network(e) => SyncError::Network(e),
            RemoteStoreError::Remote(e) => SyncError::Remote(e),
        }
    }
}

impl SyncError {
    /// Whether the failure is transport-level and worth retrying on the
    /// next connectivity trigger.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
