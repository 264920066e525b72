use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use archive_types::{BlobId, CancelToken};
use tracing::debug;

use crate::error::{BlobError, BlobResult};
use crate::hasher::{hash_reader, HashingWriter};
use crate::traits::BlobStore;

/// Chunk size for streaming copies; cancellation is polled once per chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Prefix of in-flight temporary files. Never a valid hex id.
const TEMP_PREFIX: &str = ".tmp-";

/// Directory-backed blob store.
///
/// Each blob lives in `<dir>/<hex id>`. Writes stream into a uniquely named
/// temporary file in the same directory while hashing, then rename it to the
/// hash-derived name. The rename is atomic, so readers see either no file or
/// the complete blob. Racing writers of the same content each rename their
/// own temporary file onto the same name; the content is identical, so
/// whichever rename lands last is harmless.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the file holding `id`.
    pub fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.dir.join(id.to_hex())
    }

    /// Stored length of `id` in bytes.
    pub fn size(&self, id: &BlobId) -> BlobResult<u64> {
        match fs::metadata(self.blob_path(id)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound(*id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-hash a stored blob and check it still matches its id.
    pub fn verify(&self, id: &BlobId) -> BlobResult<()> {
        let mut reader = self.open(id)?;
        let computed = hash_reader(&mut reader)?;
        if computed != *id {
            return Err(BlobError::HashMismatch { id: *id, computed });
        }
        Ok(())
    }

    /// Ids of every stored blob, sorted. Temporary files are skipped.
    pub fn list(&self) -> BlobResult<Vec<BlobId>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            if let Ok(id) = BlobId::from_hex(name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn copy_hashing(
        reader: &mut dyn Read,
        sink: &File,
        cancel: &CancelToken,
    ) -> BlobResult<(BlobId, u64)> {
        let mut writer = HashingWriter::new(BufWriter::new(sink));
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            if cancel.is_cancelled() {
                return Err(BlobError::Cancelled);
            }
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            writer.write_all(&buf[..n])?;
        }
        let written = writer.written();
        let (mut inner, id) = writer.finish();
        inner.flush()?;
        Ok((id, written))
    }
}

impl BlobStore for FsBlobStore {
    fn store(&self, reader: &mut dyn Read, cancel: &CancelToken) -> BlobResult<BlobId> {
        fs::create_dir_all(&self.dir)?;

        // Dropping `tmp` on any early return removes the temporary file.
        let tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)?;
        let (id, size) = Self::copy_hashing(reader, tmp.as_file(), cancel)?;
        tmp.as_file().sync_all()?;

        if cancel.is_cancelled() {
            return Err(BlobError::Cancelled);
        }

        let dest = self.blob_path(&id);
        if dest.exists() {
            debug!(blob = %id.short_hex(), size, "blob already present");
            return Ok(id);
        }
        tmp.persist(&dest).map_err(|e| BlobError::Io(e.error))?;
        debug!(blob = %id.short_hex(), size, "stored blob");
        Ok(id)
    }

    fn open(&self, id: &BlobId) -> BlobResult<Box<dyn Read + Send>> {
        match File::open(self.blob_path(id)) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound(*id)),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, id: &BlobId) -> BlobResult<bool> {
        Ok(self.blob_path(id).try_exists()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn store_in_tempdir() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().join("blobs"));
        (dir, store)
    }

    fn file_count(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    // -----------------------------------------------------------------------
    // Round-trip and dedup
    // -----------------------------------------------------------------------

    #[test]
    fn store_twice_yields_one_file() {
        let (_dir, store) = store_in_tempdir();
        let h1 = store.store_bytes(b"abc").unwrap();
        let h2 = store.store_bytes(b"abc").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.read_to_vec(&h1).unwrap(), b"abc");

        assert_eq!(file_count(store.dir()), 1);
        let only = fs::read_dir(store.dir()).unwrap().next().unwrap().unwrap();
        assert_eq!(only.file_name().to_str().unwrap(), h1.to_hex());
    }

    #[test]
    fn id_is_hash_of_content() {
        let (_dir, store) = store_in_tempdir();
        let id = store.store_bytes(b"hello world").unwrap();
        assert_eq!(id, BlobId::from_content(b"hello world"));
    }

    #[test]
    fn large_blob_streams_through() {
        let (_dir, store) = store_in_tempdir();
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let id = store.store(&mut data.as_slice(), &CancelToken::new()).unwrap();
        assert_eq!(store.read_to_vec(&id).unwrap(), data);
        store.verify(&id).unwrap();
    }

    #[test]
    fn empty_blob_is_storable() {
        let (_dir, store) = store_in_tempdir();
        let id = store.store_bytes(b"").unwrap();
        assert!(store.exists(&id).unwrap());
        assert!(store.read_to_vec(&id).unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Missing blobs
    // -----------------------------------------------------------------------

    #[test]
    fn open_missing_is_not_found() {
        let (_dir, store) = store_in_tempdir();
        let id = BlobId::from_content(b"never stored");
        let err = store.open(&id).err().unwrap();
        assert!(err.is_not_found());
        assert!(!store.exists(&id).unwrap());
    }

    #[test]
    fn size_separates_missing_from_unreadable() {
        let (dir, store) = store_in_tempdir();
        let id = store.store_bytes(b"twelve bytes").unwrap();
        assert_eq!(store.size(&id).unwrap(), 12);
        let missing = BlobId::from_content(b"absent");
        assert!(store.size(&missing).unwrap_err().is_not_found());

        // A plain file where the blob directory should be.
        fs::write(dir.path().join("flat"), b"").unwrap();
        let broken = FsBlobStore::new(dir.path().join("flat"));
        let err = broken.size(&id).unwrap_err();
        assert!(matches!(err, BlobError::Io(_)), "{err}");
    }

    #[test]
    fn list_on_missing_dir_is_empty() {
        let (_dir, store) = store_in_tempdir();
        assert!(store.list().unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[test]
    fn cancelled_store_leaves_nothing_behind() {
        let (_dir, store) = store_in_tempdir();
        let token = CancelToken::new();
        token.cancel();
        let err = store.store(&mut &b"abc"[..], &token).unwrap_err();
        assert!(matches!(err, BlobError::Cancelled));
        assert_eq!(file_count(store.dir()), 0);
    }

    // -----------------------------------------------------------------------
    // Integrity
    // -----------------------------------------------------------------------

    #[test]
    fn verify_detects_tampering() {
        let (_dir, store) = store_in_tempdir();
        let id = store.store_bytes(b"original").unwrap();
        fs::write(store.blob_path(&id), b"tampered").unwrap();
        assert!(matches!(
            store.verify(&id),
            Err(BlobError::HashMismatch { .. })
        ));
    }

    #[test]
    fn list_skips_temporary_files() {
        let (_dir, store) = store_in_tempdir();
        let id = store.store_bytes(b"kept").unwrap();
        fs::write(store.dir().join(format!("{TEMP_PREFIX}leftover")), b"x").unwrap();
        assert_eq!(store.list().unwrap(), vec![id]);
    }

    // -----------------------------------------------------------------------
    // Concurrent writers
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_writers_of_same_content() {
        let (_dir, store) = store_in_tempdir();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.store_bytes(b"shared image").unwrap())
            })
            .collect();
        let ids: Vec<BlobId> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.list().unwrap(), vec![ids[0]]);
        assert_eq!(store.read_to_vec(&ids[0]).unwrap(), b"shared image");
    }
}
