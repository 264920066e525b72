//! Hierarchical resource store for the item archive.
//!
//! Resources (items and containers) form a tree through nullable `parent_id`
//! links and are addressable both by [`ResourceId`](archive_types::ResourceId)
//! and by `/`-separated [`ResourcePath`](archive_types::ResourcePath).
//!
//! # Layers
//!
//! - [`ResourceQueries`] — raw row operations and recursive tree queries.
//! - [`ResourceStore`] — a store that can run queries in one transaction.
//! - [`ResourceTree`] — the mutation protocol: every mutation in one
//!   transaction, names validated, cyclic moves rejected.
//!
//! # Stores
//!
//! - [`SqliteResourceStore`] — the production store. Path resolution,
//!   reverse lookup and subtree enumeration are each a single recursive query.
//! - [`InMemoryResourceStore`] — a reference model with the same observable
//!   behaviour, used as the oracle in property tests.

pub mod config;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod query;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use config::StoreConfig;
pub use error::{TreeError, TreeResult};
pub use memory::InMemoryResourceStore;
pub use protocol::{DeleteMode, ResourceTree};
pub use query::SqliteQueries;
pub use sqlite::SqliteResourceStore;
pub use traits::{ResourceQueries, ResourceStore};
