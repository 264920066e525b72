//! Foundation types for the item archive.
//!
//! Every other archive crate depends on `archive-types`.
//!
//! # Key Types
//!
//! - [`ResourceId`] — Row identifier of a resource in the tree store
//! - [`BlobId`] — Content-addressed identifier (BLAKE3 hash) of a blob
//! - [`Resource`] — A node of the hierarchy (item or container)
//! - [`ResourcePath`] — `/`-separated sequence of names from a root resource
//! - [`CancelToken`] — Cooperative cancellation flag with optional deadline

pub mod cancel;
pub mod error;
pub mod id;
pub mod path;
pub mod resource;

pub use cancel::CancelToken;
pub use error::TypeError;
pub use id::{BlobId, ResourceId};
pub use path::{validate_name, ResourcePath};
pub use resource::{NewResource, Resource, ResourceKind, ResourceUpdate};
