use archive_types::BlobId;

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No blob is stored under this identifier.
    #[error("blob not found: {0}")]
    NotFound(BlobId),

    /// Stored bytes no longer hash to their identifier (data corruption).
    #[error("hash mismatch for {id}: computed {computed}")]
    HashMismatch { id: BlobId, computed: BlobId },

    /// The caller cancelled the operation; nothing was stored.
    #[error("blob operation cancelled")]
    Cancelled,

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Convenience alias used throughout the blob crate.
pub type BlobResult<T> = Result<T, BlobError>;
