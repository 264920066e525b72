//! Content-addressed blob storage for the item archive.
//!
//! Blobs (resource images) are immutable byte streams identified by the
//! BLAKE3 hash of their content. Writing the same bytes twice yields the same
//! [`BlobId`](archive_types::BlobId) and a single stored object.
//!
//! # Storage Backends
//!
//! All backends implement the [`BlobStore`] trait:
//!
//! - [`FsBlobStore`] -- one file per blob in a directory, named by hex id
//! - [`InMemoryBlobStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written.
//! 2. The id is derived from the bytes actually written, never supplied by
//!    the caller.
//! 3. A reader never observes a partially written blob under its final name.
//! 4. Deleting a resource never deletes its blob; unreferenced blobs are
//!    left in place.

pub mod error;
pub mod fs;
pub mod hasher;
pub mod memory;
pub mod traits;

pub use error::{BlobError, BlobResult};
pub use fs::FsBlobStore;
pub use hasher::{hash_reader, HashingWriter};
pub use memory::InMemoryBlobStore;
pub use traits::BlobStore;

/// `Cache-Control` value for serving blobs over HTTP.
///
/// Content-derived identifiers never change meaning, so responses may be
/// cached by anyone for a year without revalidation.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
