use std::collections::{BTreeMap, HashSet};

use archive_types::{
    BlobId, CancelToken, NewResource, Resource, ResourceId, ResourceKind, ResourcePath,
    ResourceUpdate,
};

use crate::error::{TreeError, TreeResult};
use crate::traits::{ResourceQueries, ResourceStore};

/// In-memory, BTreeMap-based resource store.
///
/// Mirrors the observable behaviour of the SQLite store: the same error
/// variants, the same orderings, ids that are never reused. Its main use is
/// as the reference model in property tests. Search is a plain
/// case-insensitive word-prefix match with results in id order rather than
/// by relevance.
#[derive(Clone, Debug)]
pub struct InMemoryResourceStore {
    resources: BTreeMap<ResourceId, Resource>,
    next_id: i64,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self {
            resources: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn require_parent(&self, parent: Option<ResourceId>) -> TreeResult<()> {
        match parent {
            Some(id) if !self.resources.contains_key(&id) => Err(TreeError::ParentNotFound(id)),
            _ => Ok(()),
        }
    }

    fn children(&self, parent: Option<ResourceId>) -> impl Iterator<Item = &Resource> {
        self.resources.values().filter(move |r| r.parent_id == parent)
    }

    /// Every descendant of `anchor` with its full path.
    fn descendants(&self, anchor: Option<ResourceId>) -> TreeResult<Vec<(&Resource, ResourcePath)>> {
        let base = match anchor {
            Some(id) => self.get_path(id)?,
            None => ResourcePath::root(),
        };
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut frontier = vec![(anchor, base)];
        while let Some((parent, parent_path)) = frontier.pop() {
            for child in self.children(parent) {
                if !seen.insert(child.id) {
                    return Err(TreeError::CorruptTree {
                        id: child.id,
                        reason: "resource reached twice while walking down".into(),
                    });
                }
                let path = parent_path.join(&child.name);
                frontier.push((Some(child.id), path.clone()));
                out.push((child, path));
            }
        }
        Ok(out)
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore for InMemoryResourceStore {
    fn transaction<T, F>(&mut self, cancel: &CancelToken, f: F) -> TreeResult<T>
    where
        F: FnOnce(&mut dyn ResourceQueries) -> TreeResult<T>,
    {
        if cancel.is_cancelled() {
            return Err(TreeError::Cancelled);
        }
        let snapshot = self.clone();
        let result = f(self).and_then(|value| {
            if cancel.is_cancelled() {
                Err(TreeError::Cancelled)
            } else {
                Ok(value)
            }
        });
        if result.is_err() {
            *self = snapshot;
        }
        result
    }

    fn snapshot<T, F>(&self, cancel: &CancelToken, f: F) -> TreeResult<T>
    where
        F: FnOnce(&dyn ResourceQueries) -> TreeResult<T>,
    {
        if cancel.is_cancelled() {
            return Err(TreeError::Cancelled);
        }
        let value = f(self)?;
        if cancel.is_cancelled() {
            return Err(TreeError::Cancelled);
        }
        Ok(value)
    }
}

impl ResourceQueries for InMemoryResourceStore {
    fn create_resource(&mut self, new: &NewResource) -> TreeResult<ResourceId> {
        self.require_parent(new.parent_id)?;
        let id = ResourceId::new(self.next_id);
        self.next_id += 1;
        self.resources.insert(id, new.clone().into_resource(id));
        Ok(id)
    }

    fn update_resource(&mut self, update: &ResourceUpdate) -> TreeResult<Vec<ResourceId>> {
        Ok(match self.resources.get_mut(&update.id) {
            Some(resource) => {
                update.apply(resource);
                vec![update.id]
            }
            None => Vec::new(),
        })
    }

    fn update_resource_image(
        &mut self,
        id: ResourceId,
        image: Option<BlobId>,
    ) -> TreeResult<Vec<ResourceId>> {
        Ok(match self.resources.get_mut(&id) {
            Some(resource) => {
                resource.image = image;
                vec![id]
            }
            None => Vec::new(),
        })
    }

    fn move_resources(
        &mut self,
        ids: &[ResourceId],
        new_parent: Option<ResourceId>,
    ) -> TreeResult<Vec<ResourceId>> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Ok(ids);
        }
        self.require_parent(new_parent)?;
        let mut moved = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(resource) = self.resources.get_mut(&id) {
                resource.parent_id = new_parent;
                moved.push(id);
            }
        }
        Ok(moved)
    }

    fn change_parent(
        &mut self,
        old_parent: Option<ResourceId>,
        new_parent: Option<ResourceId>,
    ) -> TreeResult<u64> {
        self.require_parent(new_parent)?;
        let mut changed = 0;
        for resource in self.resources.values_mut() {
            if resource.parent_id == old_parent {
                resource.parent_id = new_parent;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn delete_resource(&mut self, id: ResourceId) -> TreeResult<u64> {
        if !self.resources.contains_key(&id) {
            return Ok(0);
        }
        let mut doomed = vec![id];
        let mut i = 0;
        while i < doomed.len() {
            let children: Vec<ResourceId> = self
                .children(Some(doomed[i]))
                .map(|r| r.id)
                .filter(|c| !doomed.contains(c))
                .collect();
            doomed.extend(children);
            i += 1;
        }
        for id in doomed.iter().rev() {
            self.resources.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    fn get_resource(&self, id: ResourceId) -> TreeResult<Option<Resource>> {
        Ok(self.resources.get(&id).cloned())
    }

    fn list_resources(&self, parent: Option<ResourceId>) -> TreeResult<Vec<Resource>> {
        let mut out: Vec<Resource> = self.children(parent).cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    fn all_resources(&self) -> TreeResult<Vec<Resource>> {
        Ok(self.resources.values().cloned().collect())
    }

    fn resolve(&self, path: &ResourcePath) -> TreeResult<Option<ResourceId>> {
        if path.is_root() {
            return Ok(None);
        }
        let mut candidates: Vec<Option<ResourceId>> = vec![None];
        for segment in path.segments() {
            candidates = self
                .resources
                .values()
                .filter(|r| r.name == *segment && candidates.contains(&r.parent_id))
                .map(|r| Some(r.id))
                .collect();
            if candidates.is_empty() {
                return Err(TreeError::PathNotFound(path.clone()));
            }
        }
        Ok(candidates.into_iter().flatten().min())
    }

    fn lineage(&self, id: ResourceId) -> TreeResult<Vec<Resource>> {
        let mut current = self.resources.get(&id).ok_or(TreeError::NotFound(id))?;
        let mut chain = vec![current.clone()];
        while let Some(parent) = current.parent_id {
            if chain.len() > self.resources.len() {
                return Err(TreeError::CorruptTree {
                    id,
                    reason: "ancestor chain loops".into(),
                });
            }
            current = self.resources.get(&parent).ok_or_else(|| TreeError::CorruptTree {
                id,
                reason: format!("ancestor {parent} is missing"),
            })?;
            chain.push(current.clone());
        }
        Ok(chain)
    }

    fn get_path(&self, id: ResourceId) -> TreeResult<ResourcePath> {
        let chain = self.lineage(id)?;
        Ok(ResourcePath::from_segments(
            chain.into_iter().rev().map(|r| r.name),
        ))
    }

    fn subtree(&self, anchor: Option<ResourceId>) -> TreeResult<Vec<ResourcePath>> {
        let mut paths: Vec<ResourcePath> = self
            .descendants(anchor)?
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn containers(&self) -> TreeResult<Vec<ResourcePath>> {
        let mut paths: Vec<ResourcePath> = self
            .descendants(None)?
            .into_iter()
            .filter(|(r, _)| r.kind == ResourceKind::Container)
            .map(|(_, path)| path)
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn search(&self, query: &str) -> TreeResult<Vec<Resource>> {
        let terms: Vec<Vec<String>> = query
            .split_whitespace()
            .map(words)
            .filter(|w| !w.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .resources
            .values()
            .filter(|r| {
                let haystack: Vec<String> = [
                    r.name.as_str(),
                    r.kind.as_str(),
                    r.color.as_str(),
                    r.comments.as_str(),
                ]
                    .into_iter()
                    .flat_map(words)
                    .collect();
                terms
                    .iter()
                    .flatten()
                    .all(|t| haystack.iter().any(|w| w.starts_with(t.as_str())))
            })
            .cloned()
            .collect())
    }
}

/// Lowercased alphanumeric runs of `text`.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> ResourcePath {
        ResourcePath::parse(raw)
    }

    #[test]
    fn create_and_resolve() {
        let mut s = InMemoryResourceStore::new();
        let garage = s.create_resource(&NewResource::container("Garage")).unwrap();
        let wrench = s
            .create_resource(&NewResource::item("Wrench").under(Some(garage)))
            .unwrap();
        assert_eq!(s.resolve(&path("/Garage/Wrench")).unwrap(), Some(wrench));
        assert!(s.resolve(&path("/Wrench")).unwrap_err().is_not_found());
        assert_eq!(s.get_path(wrench).unwrap(), path("Garage/Wrench"));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn delete_counts_descendants() {
        let mut s = InMemoryResourceStore::new();
        let a = s.create_resource(&NewResource::container("a")).unwrap();
        let b = s.create_resource(&NewResource::container("b").under(Some(a))).unwrap();
        s.create_resource(&NewResource::item("c").under(Some(b))).unwrap();
        s.create_resource(&NewResource::item("d")).unwrap();
        assert_eq!(s.delete_resource(a).unwrap(), 3);
        assert_eq!(s.len(), 1);
        assert_eq!(s.delete_resource(a).unwrap(), 0);
    }

    #[test]
    fn lineage_detects_loops() {
        let mut s = InMemoryResourceStore::new();
        let a = s.create_resource(&NewResource::container("a")).unwrap();
        let b = s.create_resource(&NewResource::container("b").under(Some(a))).unwrap();
        // The raw move does not police shape; force a two-node loop.
        s.move_resources(&[a], Some(b)).unwrap();
        assert!(matches!(s.lineage(a), Err(TreeError::CorruptTree { .. })));
    }

    #[test]
    fn search_is_word_prefix_and_case_insensitive() {
        let mut s = InMemoryResourceStore::new();
        let w = s
            .create_resource(&NewResource::item("Socket Wrench").with_comments("metric set"))
            .unwrap();
        s.create_resource(&NewResource::item("Hammer")).unwrap();
        let ids = |q: &str| s.search(q).unwrap().into_iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids("wren"), vec![w]);
        assert_eq!(ids("METRIC sock"), vec![w]);
        assert!(ids("rench").is_empty());
        assert!(ids("* -").is_empty());
    }

    #[test]
    fn transaction_restores_snapshot_on_error() {
        let mut s = InMemoryResourceStore::new();
        s.create_resource(&NewResource::item("keep")).unwrap();
        let result: TreeResult<()> = s.transaction(&CancelToken::new(), |q| {
            q.create_resource(&NewResource::item("drop"))?;
            Err(TreeError::Cancelled)
        });
        assert!(result.is_err());
        assert_eq!(s.len(), 1);
        // The rolled-back id is reissued, as SQLite's sequence rolls back too.
        assert_eq!(s.create_resource(&NewResource::item("next")).unwrap().get(), 2);
    }
}
