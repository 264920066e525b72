//! Invariant-preserving tree mutations.
//!
//! [`ResourceTree`] wraps any [`ResourceStore`] and runs each mutation in
//! exactly one store transaction. On top of the raw queries it validates
//! names and refuses any reparenting that would close a cycle.

use archive_types::{
    validate_name, BlobId, CancelToken, NewResource, Resource, ResourceId, ResourcePath,
    ResourceUpdate,
};
use tracing::{debug, info};

use crate::error::{TreeError, TreeResult};
use crate::traits::{ResourceQueries, ResourceStore};

/// What happens to the children of a deleted resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Reparent direct children to the deleted resource's own parent.
    #[default]
    Shallow,
    /// Remove the whole subtree.
    Deep,
}

/// The mutation protocol over a resource store.
#[derive(Debug)]
pub struct ResourceTree<S> {
    store: S,
}

impl<S: ResourceStore> ResourceTree<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Create a resource under `new.parent_id`.
    pub fn create(&mut self, new: &NewResource, cancel: &CancelToken) -> TreeResult<ResourceId> {
        validate_name(&new.name)?;
        self.store.transaction(cancel, |q| q.create_resource(new))
    }

    /// Create a resource under the resource at `parent`, resolving the path
    /// in the same transaction as the insert. `new.parent_id` is ignored.
    pub fn create_at(
        &mut self,
        parent: &ResourcePath,
        new: &NewResource,
        cancel: &CancelToken,
    ) -> TreeResult<ResourceId> {
        validate_name(&new.name)?;
        self.store.transaction(cancel, |q| {
            let parent_id = q.resolve(parent)?;
            q.create_resource(&new.clone().under(parent_id))
        })
    }

    /// Create a batch of resources in one transaction.
    ///
    /// `parent` is resolved inside the transaction. Each entry hangs either
    /// directly under `parent` (`None`) or under an earlier entry of the
    /// batch, given by index; the entry's own `parent_id` is ignored.
    /// Returns the new ids in batch order.
    pub fn create_batch(
        &mut self,
        parent: &ResourcePath,
        batch: &[(Option<usize>, NewResource)],
        cancel: &CancelToken,
    ) -> TreeResult<Vec<ResourceId>> {
        for (_, new) in batch {
            validate_name(&new.name)?;
        }
        self.store.transaction(cancel, |q| {
            let base = q.resolve(parent)?;
            let mut ids: Vec<ResourceId> = Vec::with_capacity(batch.len());
            for (i, (under, new)) in batch.iter().enumerate() {
                let parent_id = match under {
                    None => base,
                    Some(p) if *p < i => Some(ids[*p]),
                    Some(p) => {
                        return Err(TreeError::InvalidData(format!(
                            "batch entry {i} refers to entry {p}, which is not created before it"
                        )))
                    }
                };
                ids.push(q.create_resource(&new.clone().under(parent_id))?);
            }
            info!(count = ids.len(), parent = %parent, "created batch");
            Ok(ids)
        })
    }

    /// Replace a resource's metadata. Returns the ids updated, empty when
    /// the resource does not exist.
    pub fn update(
        &mut self,
        update: &ResourceUpdate,
        cancel: &CancelToken,
    ) -> TreeResult<Vec<ResourceId>> {
        validate_name(&update.name)?;
        self.store.transaction(cancel, |q| q.update_resource(update))
    }

    /// Attach, replace or clear a resource's image.
    pub fn set_image(
        &mut self,
        id: ResourceId,
        image: Option<BlobId>,
        cancel: &CancelToken,
    ) -> TreeResult<Vec<ResourceId>> {
        self.store
            .transaction(cancel, |q| q.update_resource_image(id, image))
    }

    /// Reparent `ids` under `destination`.
    ///
    /// Unknown ids are skipped. A missing destination, or one that is (or
    /// lies under) any of the moved resources, fails the whole batch.
    pub fn move_resources(
        &mut self,
        ids: &[ResourceId],
        destination: Option<ResourceId>,
        cancel: &CancelToken,
    ) -> TreeResult<Vec<ResourceId>> {
        self.store.transaction(cancel, |q| {
            check_move(&*q, ids, destination)?;
            q.move_resources(ids, destination)
        })
    }

    /// Path-addressed batch move. Every source must resolve.
    pub fn move_paths(
        &mut self,
        sources: &[ResourcePath],
        destination: &ResourcePath,
        cancel: &CancelToken,
    ) -> TreeResult<Vec<ResourceId>> {
        if let Some(source) = sources.iter().find(|s| s.encloses(destination)) {
            return Err(TreeError::CyclicMove {
                moved: source.clone(),
                destination: destination.clone(),
            });
        }
        self.store.transaction(cancel, |q| {
            let dest = q.resolve(destination)?;
            let mut ids = Vec::with_capacity(sources.len());
            for source in sources {
                // Non-root sources always resolve to an id.
                ids.extend(q.resolve(source)?);
            }
            check_move(&*q, &ids, dest)?;
            let moved = q.move_resources(&ids, dest)?;
            info!(count = moved.len(), destination = %destination, "moved resources");
            Ok(moved)
        })
    }

    /// Reparent every child of `old_parent` under `new_parent`.
    pub fn change_parent(
        &mut self,
        old_parent: Option<ResourceId>,
        new_parent: Option<ResourceId>,
        cancel: &CancelToken,
    ) -> TreeResult<u64> {
        self.store.transaction(cancel, |q| {
            if let Some(dest) = new_parent {
                let chain = lineage_of_destination(&*q, dest)?;
                if let Some(hit) = chain.iter().find(|r| r.parent_id == old_parent) {
                    return Err(cyclic(&*q, hit.id, dest));
                }
            }
            q.change_parent(old_parent, new_parent)
        })
    }

    /// Delete a resource. Returns the number of resources removed, 0 when
    /// `id` does not exist.
    pub fn delete(
        &mut self,
        id: ResourceId,
        mode: DeleteMode,
        cancel: &CancelToken,
    ) -> TreeResult<u64> {
        self.store.transaction(cancel, |q| delete_in(q, id, mode))
    }

    /// Delete the resource at `path`. The root cannot be deleted.
    pub fn delete_at(
        &mut self,
        path: &ResourcePath,
        mode: DeleteMode,
        cancel: &CancelToken,
    ) -> TreeResult<u64> {
        self.store.transaction(cancel, |q| match q.resolve(path)? {
            Some(id) => delete_in(q, id, mode),
            None => Err(TreeError::PathNotFound(path.clone())),
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Resolve a path. The root resolves to `None`.
    pub fn resolve(
        &self,
        path: &ResourcePath,
        cancel: &CancelToken,
    ) -> TreeResult<Option<ResourceId>> {
        self.store.snapshot(cancel, |q| q.resolve(path))
    }

    pub fn get(&self, id: ResourceId, cancel: &CancelToken) -> TreeResult<Resource> {
        self.store
            .snapshot(cancel, |q| q.get_resource(id))?
            .ok_or(TreeError::NotFound(id))
    }

    pub fn children(
        &self,
        parent: Option<ResourceId>,
        cancel: &CancelToken,
    ) -> TreeResult<Vec<Resource>> {
        self.store.snapshot(cancel, |q| q.list_resources(parent))
    }

    pub fn get_path(&self, id: ResourceId, cancel: &CancelToken) -> TreeResult<ResourcePath> {
        self.store.snapshot(cancel, |q| q.get_path(id))
    }

    pub fn subtree(
        &self,
        anchor: Option<ResourceId>,
        cancel: &CancelToken,
    ) -> TreeResult<Vec<ResourcePath>> {
        self.store.snapshot(cancel, |q| q.subtree(anchor))
    }

    pub fn full_tree(&self, cancel: &CancelToken) -> TreeResult<Vec<ResourcePath>> {
        self.store.snapshot(cancel, |q| q.full_tree())
    }

    pub fn containers(&self, cancel: &CancelToken) -> TreeResult<Vec<ResourcePath>> {
        self.store.snapshot(cancel, |q| q.containers())
    }

    pub fn search(&self, query: &str, cancel: &CancelToken) -> TreeResult<Vec<Resource>> {
        self.store.snapshot(cancel, |q| q.search(query))
    }
}

fn delete_in(q: &mut dyn ResourceQueries, id: ResourceId, mode: DeleteMode) -> TreeResult<u64> {
    let Some(target) = q.get_resource(id)? else {
        return Ok(0);
    };
    let removed = match mode {
        DeleteMode::Shallow => {
            let adopted = q.change_parent(Some(id), target.parent_id)?;
            debug!(%id, adopted, "reparented children before delete");
            q.delete_resource(id)?
        }
        DeleteMode::Deep => q.delete_resource(id)?,
    };
    info!(%id, ?mode, removed, "deleted resource");
    Ok(removed)
}

fn lineage_of_destination(q: &dyn ResourceQueries, dest: ResourceId) -> TreeResult<Vec<Resource>> {
    q.lineage(dest).map_err(|e| match e {
        TreeError::NotFound(id) => TreeError::ParentNotFound(id),
        other => other,
    })
}

/// Fail if `dest` is one of `moved` or lies beneath one of them.
fn check_move(
    q: &dyn ResourceQueries,
    moved: &[ResourceId],
    dest: Option<ResourceId>,
) -> TreeResult<()> {
    let Some(dest) = dest else { return Ok(()) };
    if moved.is_empty() {
        return Ok(());
    }
    let chain = lineage_of_destination(q, dest)?;
    match chain.iter().find(|r| moved.contains(&r.id)) {
        Some(hit) => Err(cyclic(q, hit.id, dest)),
        None => Ok(()),
    }
}

fn cyclic(q: &dyn ResourceQueries, moved: ResourceId, dest: ResourceId) -> TreeError {
    match (q.get_path(moved), q.get_path(dest)) {
        (Ok(moved), Ok(destination)) => TreeError::CyclicMove { moved, destination },
        (Err(e), _) | (_, Err(e)) => e,
    }
}
