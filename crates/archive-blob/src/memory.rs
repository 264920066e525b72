use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, RwLock};

use archive_types::{BlobId, CancelToken};

use crate::error::{BlobError, BlobResult};
use crate::traits::BlobStore;

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. Blob bodies are shared behind `Arc`, so
/// opening a blob does not copy it.
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<BlobId, Arc<Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|b| b.len() as u64)
            .sum()
    }

    /// Sorted ids of every stored blob.
    pub fn all_ids(&self) -> Vec<BlobId> {
        let map = self.blobs.read().expect("lock poisoned");
        let mut ids: Vec<BlobId> = map.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap reader over a shared blob body.
struct SharedReader(Cursor<Arc<Vec<u8>>>);

impl Read for SharedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let pos = self.0.position() as usize;
        let data = self.0.get_ref();
        let remaining = data.len().saturating_sub(pos);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.0.set_position((pos + n) as u64);
        Ok(n)
    }
}

impl BlobStore for InMemoryBlobStore {
    fn store(&self, reader: &mut dyn Read, cancel: &CancelToken) -> BlobResult<BlobId> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        if cancel.is_cancelled() {
            return Err(BlobError::Cancelled);
        }
        let id = BlobId::from_content(&data);
        let mut map = self.blobs.write().expect("lock poisoned");
        map.entry(id).or_insert_with(|| Arc::new(data));
        Ok(id)
    }

    fn open(&self, id: &BlobId) -> BlobResult<Box<dyn Read + Send>> {
        let map = self.blobs.read().expect("lock poisoned");
        let data = map.get(id).cloned().ok_or(BlobError::NotFound(*id))?;
        Ok(Box::new(SharedReader(Cursor::new(data))))
    }

    fn exists(&self, id: &BlobId) -> BlobResult<bool> {
        Ok(self.blobs.read().expect("lock poisoned").contains_key(id))
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}
