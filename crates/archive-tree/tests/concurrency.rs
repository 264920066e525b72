//! Several connections writing to one database file at once.

use std::thread;

use archive_tree::{ResourceTree, SqliteResourceStore, StoreConfig};
use archive_types::{CancelToken, NewResource, ResourcePath};

const WRITERS: usize = 4;
const PER_WRITER: usize = 25;

#[test]
fn concurrent_writers_all_commit() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("state.db");
    let store = SqliteResourceStore::open(&file, &StoreConfig::default()).unwrap();
    let mut tree = ResourceTree::new(store);
    let shelf = tree
        .create(&NewResource::container("Shelf"), &CancelToken::new())
        .unwrap();

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let conn = tree.store().connect().unwrap();
            thread::spawn(move || {
                let mut tree = ResourceTree::new(conn);
                for i in 0..PER_WRITER {
                    let name = format!("w{w}-{i}");
                    tree.create_at(
                        &ResourcePath::parse("/Shelf"),
                        &NewResource::item(name),
                        &CancelToken::new(),
                    )
                    .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer should not panic");
    }

    let live = CancelToken::new();
    let children = tree.children(Some(shelf), &live).unwrap();
    assert_eq!(children.len(), WRITERS * PER_WRITER);
    assert_eq!(tree.full_tree(&live).unwrap().len(), WRITERS * PER_WRITER + 1);
}

#[test]
fn reader_sees_committed_state_only() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("state.db");
    let mut writer = ResourceTree::new(
        SqliteResourceStore::open(&file, &StoreConfig::default()).unwrap(),
    );
    let reader = ResourceTree::new(writer.store().connect().unwrap());

    let token = CancelToken::new();
    let result = writer.create(&NewResource::container("Ghost"), &token);
    assert!(result.is_ok());
    assert!(reader
        .resolve(&ResourcePath::parse("/Ghost"), &CancelToken::new())
        .unwrap()
        .is_some());

    token.cancel();
    assert!(writer
        .create(&NewResource::container("Never"), &token)
        .is_err());
    assert!(reader
        .resolve(&ResourcePath::parse("/Never"), &CancelToken::new())
        .unwrap_err()
        .is_not_found());
}
