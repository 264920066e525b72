use std::io::Read;

use archive_types::{BlobId, CancelToken};

use crate::error::BlobResult;

/// Content-addressed blob store.
///
/// All implementations must satisfy these invariants:
/// - The returned id is the hash of exactly the bytes consumed from the
///   reader.
/// - Storing content that is already present succeeds and leaves a single
///   copy.
/// - `open(store(b))` yields exactly `b`.
/// - Concurrent writers of the same content are safe.
pub trait BlobStore: Send + Sync {
    /// Consume `reader` to the end, store its bytes and return their id.
    ///
    /// Returns `BlobError::Cancelled` (and stores nothing) if `cancel` fires
    /// before the blob is in place.
    fn store(&self, reader: &mut dyn Read, cancel: &CancelToken) -> BlobResult<BlobId>;

    /// Open a stored blob for streaming.
    ///
    /// Returns `BlobError::NotFound` if no blob has this id.
    fn open(&self, id: &BlobId) -> BlobResult<Box<dyn Read + Send>>;

    /// Check whether a blob is present.
    fn exists(&self, id: &BlobId) -> BlobResult<bool>;

    /// Store an in-memory buffer.
    fn store_bytes(&self, data: &[u8]) -> BlobResult<BlobId> {
        let mut reader = data;
        self.store(&mut reader, &CancelToken::new())
    }

    /// Read a whole blob into memory.
    fn read_to_vec(&self, id: &BlobId) -> BlobResult<Vec<u8>> {
        let mut out = Vec::new();
        self.open(id)?.read_to_end(&mut out)?;
        Ok(out)
    }
}
