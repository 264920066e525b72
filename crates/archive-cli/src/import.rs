//! Import a directory hierarchy as resources.
//!
//! Only directories are considered. A directory named
//! `snake_name.tag1.tag2.kind` becomes a resource called `Snake Name` of the
//! given kind, with comments `tag1,tag2`. Hidden directories are skipped
//! together with everything below them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use archive_tree::{ResourceStore, ResourceTree};
use archive_types::{CancelToken, NewResource, ResourceId, ResourceKind, ResourcePath};
use tracing::debug;
use walkdir::WalkDir;

/// `snake_case_words` to `Snake Case Words`.
pub fn normalize_name(raw: &str) -> String {
    raw.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// The resource a directory name describes.
///
/// With a single dot-free segment the directory is a container. Otherwise
/// the last segment is the kind when it names one; if it does not, the
/// directory is a container and every segment after the first is a tag.
pub fn parse_dir_name(dir_name: &str) -> NewResource {
    let segments: Vec<&str> = dir_name.split('.').collect();
    let name = normalize_name(segments[0]);
    let rest = &segments[1..];
    let (kind, tags) = match rest.split_last() {
        Some((last, tags)) => match last.parse::<ResourceKind>() {
            Ok(kind) => (kind, tags),
            Err(_) => (ResourceKind::Container, rest),
        },
        None => (ResourceKind::Container, rest),
    };
    let comments = tags
        .iter()
        .filter(|t| !t.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(",");
    NewResource::new(name, kind).with_comments(comments)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Walk `root` and lay out one create per directory, parents first.
pub fn plan(root: &Path) -> anyhow::Result<Vec<(Option<usize>, NewResource)>> {
    let mut index: HashMap<PathBuf, usize> = HashMap::new();
    let mut batch = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || (e.file_type().is_dir() && !e.file_name().to_str().is_some_and(is_hidden))
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        let dir_name = entry
            .file_name()
            .to_str()
            .with_context(|| format!("non UTF-8 directory name: {}", entry.path().display()))?;
        let parent = match entry.depth() {
            1 => None,
            _ => entry.path().parent().and_then(|p| index.get(p)).copied(),
        };
        let new = parse_dir_name(dir_name);
        debug!(dir = %entry.path().display(), name = %new.name, kind = %new.kind, "planned");
        index.insert(entry.path().to_path_buf(), batch.len());
        batch.push((parent, new));
    }
    Ok(batch)
}

/// Import every directory below `root` under the resource at `under`, in
/// one transaction. Returns the created ids.
pub fn import_dir<S: ResourceStore>(
    tree: &mut ResourceTree<S>,
    root: &Path,
    under: &ResourcePath,
    cancel: &CancelToken,
) -> anyhow::Result<Vec<ResourceId>> {
    anyhow::ensure!(root.is_dir(), "{} is not a directory", root.display());
    let batch = plan(root)?;
    let ids = tree
        .create_batch(under, &batch, cancel)
        .with_context(|| format!("importing {}", root.display()))?;
    Ok(ids)
}
