//! The storage interface shared by the SQLite store and the in-memory oracle.

use archive_types::{
    BlobId, CancelToken, NewResource, Resource, ResourceId, ResourcePath, ResourceUpdate,
};

use crate::error::TreeResult;

/// Row-level queries over the resource table.
///
/// These are the raw operations: they enforce referential integrity (a
/// parent must exist) but not tree-shape rules such as acyclicity or name
/// validity. [`ResourceTree`](crate::ResourceTree) layers those on top.
///
/// Writes that target a missing id affect nothing and report it through an
/// empty result rather than an error.
pub trait ResourceQueries {
    /// Insert a resource and return its new id.
    ///
    /// Fails with `ParentNotFound` if a non-null parent does not exist.
    fn create_resource(&mut self, new: &NewResource) -> TreeResult<ResourceId>;

    /// Replace name, kind, color and comments. Returns the ids updated
    /// (empty if `update.id` does not exist).
    fn update_resource(&mut self, update: &ResourceUpdate) -> TreeResult<Vec<ResourceId>>;

    /// Set or clear the image reference. Returns the ids updated.
    fn update_resource_image(
        &mut self,
        id: ResourceId,
        image: Option<BlobId>,
    ) -> TreeResult<Vec<ResourceId>>;

    /// Reparent every existing id in `ids` under `new_parent`.
    ///
    /// Unknown ids are skipped; the sorted ids actually moved are returned.
    /// A missing `new_parent` fails the whole batch with `ParentNotFound`.
    fn move_resources(
        &mut self,
        ids: &[ResourceId],
        new_parent: Option<ResourceId>,
    ) -> TreeResult<Vec<ResourceId>>;

    /// Reparent every resource whose parent is `old_parent` to `new_parent`.
    /// Returns the number of rows changed.
    fn change_parent(
        &mut self,
        old_parent: Option<ResourceId>,
        new_parent: Option<ResourceId>,
    ) -> TreeResult<u64>;

    /// Remove a resource and all of its descendants, children first.
    /// Returns the number of rows removed (0 if `id` does not exist).
    fn delete_resource(&mut self, id: ResourceId) -> TreeResult<u64>;

    fn get_resource(&self, id: ResourceId) -> TreeResult<Option<Resource>>;

    /// Direct children of `parent` (root-level resources for `None`),
    /// ordered by name then id.
    fn list_resources(&self, parent: Option<ResourceId>) -> TreeResult<Vec<Resource>>;

    /// Every resource, ordered by id.
    fn all_resources(&self) -> TreeResult<Vec<Resource>>;

    /// Resolve a path to an id.
    ///
    /// The root path resolves to `Ok(None)`. A path whose segments do not
    /// all match is `PathNotFound`. When duplicate sibling names give several
    /// full matches, the smallest id wins.
    fn resolve(&self, path: &ResourcePath) -> TreeResult<Option<ResourceId>>;

    /// The resource followed by each of its ancestors up to a root-level
    /// resource.
    ///
    /// Fails with `NotFound` for an unknown id and `CorruptTree` if the
    /// parent chain loops or dangles.
    fn lineage(&self, id: ResourceId) -> TreeResult<Vec<Resource>>;

    /// Names from the root down to `id`.
    fn get_path(&self, id: ResourceId) -> TreeResult<ResourcePath>;

    /// Full paths of every descendant of `anchor` (of every resource for
    /// `None`), sorted. The anchor itself is not included.
    fn subtree(&self, anchor: Option<ResourceId>) -> TreeResult<Vec<ResourcePath>>;

    /// Full paths of every container, sorted.
    fn containers(&self) -> TreeResult<Vec<ResourcePath>>;

    /// Full-text search over name, kind, color and comments, best match
    /// first. Each whitespace-separated term matches as a word prefix; all
    /// terms must match.
    fn search(&self, query: &str) -> TreeResult<Vec<Resource>>;

    /// Full paths of every resource, sorted.
    fn full_tree(&self) -> TreeResult<Vec<ResourcePath>> {
        self.subtree(None)
    }
}

/// A resource store that can run a group of queries atomically.
pub trait ResourceStore: ResourceQueries {
    /// Run `f` inside one transaction.
    ///
    /// The transaction commits only if `f` succeeds and `cancel` has not
    /// fired. Otherwise every change made by `f` is rolled back.
    fn transaction<T, F>(&mut self, cancel: &CancelToken, f: F) -> TreeResult<T>
    where
        F: FnOnce(&mut dyn ResourceQueries) -> TreeResult<T>;

    /// Run read-only queries against one consistent snapshot.
    ///
    /// Fails with `Cancelled` if `cancel` fires before or while `f` runs.
    fn snapshot<T, F>(&self, cancel: &CancelToken, f: F) -> TreeResult<T>
    where
        F: FnOnce(&dyn ResourceQueries) -> TreeResult<T>;
}
