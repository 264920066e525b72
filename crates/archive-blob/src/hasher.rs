use std::io::{self, Read, Write};

use archive_types::BlobId;

/// Writer adapter that hashes every byte it forwards.
///
/// Wrapping the destination sink lets a single pass over the input both
/// persist the bytes and compute their [`BlobId`]. Only bytes the inner
/// writer accepted are hashed, so the id always matches what was written.
pub struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            written: 0,
        }
    }

    /// Bytes forwarded so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Stop writing; return the inner writer and the id of everything written.
    pub fn finish(self) -> (W, BlobId) {
        let id = BlobId::from_hash(*self.hasher.finalize().as_bytes());
        (self.inner, id)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hash everything `reader` yields without storing it.
pub fn hash_reader(reader: &mut dyn Read) -> io::Result<BlobId> {
    let mut writer = HashingWriter::new(io::sink());
    io::copy(reader, &mut writer)?;
    Ok(writer.finish().1)
}
