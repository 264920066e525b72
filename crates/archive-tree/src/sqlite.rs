use std::path::{Path, PathBuf};

use archive_types::{
    BlobId, CancelToken, NewResource, Resource, ResourceId, ResourcePath, ResourceUpdate,
};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{TreeError, TreeResult};
use crate::query::SqliteQueries;
use crate::schema;
use crate::traits::{ResourceQueries, ResourceStore};

/// Virtual-machine steps between cancellation checks.
const PROGRESS_STEPS: i32 = 1_000;

/// SQLite-backed resource store.
///
/// One value owns one connection. Threads that need concurrent access each
/// open their own with [`connect`](Self::connect); SQLite serializes the
/// writers and the busy timeout makes them wait instead of failing.
///
/// Reads through the [`ResourceQueries`] impl run in a deferred read
/// transaction so multi-statement lookups see one snapshot. Writes through
/// it each run in their own immediate transaction.
pub struct SqliteResourceStore {
    conn: Connection,
    path: Option<PathBuf>,
    config: StoreConfig,
}

impl SqliteResourceStore {
    /// Open (creating if needed) the database at `path` and bring its schema
    /// up to date.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> TreeResult<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut conn = Connection::open(path)?;
        schema::configure(&conn, config)?;
        schema::initialize(&mut conn, config)?;
        info!(path = %path.display(), "opened resource store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            config: config.clone(),
        })
    }

    /// A private database that disappears when the store is dropped.
    pub fn open_in_memory(config: &StoreConfig) -> TreeResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::configure(&conn, config)?;
        schema::initialize(&mut conn, config)?;
        Ok(Self {
            conn,
            path: None,
            config: config.clone(),
        })
    }

    /// Open another connection to the same database file.
    pub fn connect(&self) -> TreeResult<Self> {
        let path = self.path.as_ref().ok_or_else(|| {
            TreeError::InvalidData("an in-memory store cannot be shared".into())
        })?;
        let conn = Connection::open(path)?;
        schema::configure(&conn, &self.config)?;
        Ok(Self {
            conn,
            path: Some(path.clone()),
            config: self.config.clone(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn run_transaction<T, F>(&mut self, cancel: &CancelToken, f: F) -> TreeResult<T>
    where
        F: FnOnce(&mut dyn ResourceQueries) -> TreeResult<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = {
            let mut queries = SqliteQueries::new(&tx);
            f(&mut queries)?
        };
        // Dropping `tx` rolls back.
        if cancel.is_cancelled() {
            return Err(TreeError::Cancelled);
        }
        tx.commit()?;
        Ok(value)
    }

    fn read<T>(&self, f: impl FnOnce(&SqliteQueries<'_>) -> TreeResult<T>) -> TreeResult<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&SqliteQueries::new(&tx))?;
        tx.commit()?;
        Ok(value)
    }

    fn write<T>(
        &mut self,
        f: impl FnOnce(&mut dyn ResourceQueries) -> TreeResult<T>,
    ) -> TreeResult<T> {
        self.transaction(&CancelToken::new(), f)
    }
}

impl std::fmt::Debug for SqliteResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteResourceStore")
            .field("path", &self.path)
            .finish()
    }
}

impl ResourceStore for SqliteResourceStore {
    fn transaction<T, F>(&mut self, cancel: &CancelToken, f: F) -> TreeResult<T>
    where
        F: FnOnce(&mut dyn ResourceQueries) -> TreeResult<T>,
    {
        if cancel.is_cancelled() {
            return Err(TreeError::Cancelled);
        }
        let token = cancel.clone();
        self.conn
            .progress_handler(PROGRESS_STEPS, Some(move || token.is_cancelled()));
        let result = self.run_transaction(cancel, f);
        self.conn.progress_handler(0, None::<fn() -> bool>);
        if matches!(result, Err(TreeError::Cancelled)) {
            debug!("transaction cancelled and rolled back");
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
        let token = cancel.clone();
        self.conn
            .progress_handler(PROGRESS_STEPS, Some(move || token.is_cancelled()));
        let result = self.read(|q| f(q));
        self.conn.progress_handler(0, None::<fn() -> bool>);
        match result {
            Ok(_) if cancel.is_cancelled() => Err(TreeError::Cancelled),
            other => other,
        }
    }
}

impl ResourceQueries for SqliteResourceStore {
    fn create_resource(&mut self, new: &NewResource) -> TreeResult<ResourceId> {
        self.write(|q| q.create_resource(new))
    }

    fn update_resource(&mut self, update: &ResourceUpdate) -> TreeResult<Vec<ResourceId>> {
        self.write(|q| q.update_resource(update))
    }

    fn update_resource_image(
        &mut self,
        id: ResourceId,
        image: Option<BlobId>,
    ) -> TreeResult<Vec<ResourceId>> {
        self.write(|q| q.update_resource_image(id, image))
    }

    fn move_resources(
        &mut self,
        ids: &[ResourceId],
        new_parent: Option<ResourceId>,
    ) -> TreeResult<Vec<ResourceId>> {
        self.write(|q| q.move_resources(ids, new_parent))
    }

    fn change_parent(
        &mut self,
        old_parent: Option<ResourceId>,
        new_parent: Option<ResourceId>,
    ) -> TreeResult<u64> {
        self.write(|q| q.change_parent(old_parent, new_parent))
    }

    fn delete_resource(&mut self, id: ResourceId) -> TreeResult<u64> {
        self.write(|q| q.delete_resource(id))
    }

    fn get_resource(&self, id: ResourceId) -> TreeResult<Option<Resource>> {
        self.read(|q| q.get_resource(id))
    }

    fn list_resources(&self, parent: Option<ResourceId>) -> TreeResult<Vec<Resource>> {
        self.read(|q| q.list_resources(parent))
    }

    fn all_resources(&self) -> TreeResult<Vec<Resource>> {
        self.read(|q| q.all_resources())
    }

    fn resolve(&self, path: &ResourcePath) -> TreeResult<Option<ResourceId>> {
        self.read(|q| q.resolve(path))
    }

    fn lineage(&self, id: ResourceId) -> TreeResult<Vec<Resource>> {
        self.read(|q| q.lineage(id))
    }

    fn get_path(&self, id: ResourceId) -> TreeResult<ResourcePath> {
        self.read(|q| q.get_path(id))
    }

    fn subtree(&self, anchor: Option<ResourceId>) -> TreeResult<Vec<ResourcePath>> {
        self.read(|q| q.subtree(anchor))
    }

    fn containers(&self) -> TreeResult<Vec<ResourcePath>> {
        self.read(|q| q.containers())
    }

    fn search(&self, query: &str) -> TreeResult<Vec<Resource>> {
        self.read(|q| q.search(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_types::ResourceKind;

    fn store() -> SqliteResourceStore {
        SqliteResourceStore::open_in_memory(&StoreConfig::default()).unwrap()
    }

    fn path(raw: &str) -> ResourcePath {
        ResourcePath::parse(raw)
    }

    /// Garage/{Wrench, Toolbox/{Hammer}}, Kitchen
    fn seeded() -> (SqliteResourceStore, [ResourceId; 5]) {
        let mut s = store();
        let garage = s.create_resource(&NewResource::container("Garage")).unwrap();
        let wrench = s
            .create_resource(&NewResource::item("Wrench").under(Some(garage)).with_color("red"))
            .unwrap();
        let toolbox = s
            .create_resource(&NewResource::container("Toolbox").under(Some(garage)))
            .unwrap();
        let hammer = s
            .create_resource(&NewResource::item("Hammer").under(Some(toolbox)))
            .unwrap();
        let kitchen = s.create_resource(&NewResource::container("Kitchen")).unwrap();
        (s, [garage, wrench, toolbox, hammer, kitchen])
    }

    // -----------------------------------------------------------------------
    // Schema and connection
    // -----------------------------------------------------------------------

    #[test]
    fn schema_version_is_stamped() {
        let s = store();
        let version: i64 = s
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn reopening_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("state.db");
        let id = {
            let mut s = SqliteResourceStore::open(&file, &StoreConfig::default()).unwrap();
            s.create_resource(&NewResource::container("Attic")).unwrap()
        };
        let s = SqliteResourceStore::open(&file, &StoreConfig::default()).unwrap();
        assert_eq!(s.get_resource(id).unwrap().unwrap().name, "Attic");
        assert_eq!(s.path(), Some(file.as_path()));
    }

    #[test]
    fn migrations_run_on_open() {
        let config = StoreConfig::default()
            .with_migrations("create table if not exists note (body text not null);");
        let s = SqliteResourceStore::open_in_memory(&config).unwrap();
        let count: i64 = s
            .conn
            .query_row("select count(*) from note", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn failing_migration_fails_open() {
        let config = StoreConfig::default().with_migrations("this is not sql");
        assert!(SqliteResourceStore::open_in_memory(&config).is_err());
    }

    #[test]
    fn in_memory_store_cannot_connect() {
        assert!(matches!(store().connect(), Err(TreeError::InvalidData(_))));
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[test]
    fn resolve_walks_every_segment() {
        let (s, [garage, _, toolbox, hammer, _]) = seeded();
        assert_eq!(s.resolve(&path("/Garage")).unwrap(), Some(garage));
        assert_eq!(s.resolve(&path("Garage/Toolbox")).unwrap(), Some(toolbox));
        assert_eq!(s.resolve(&path("/Garage/Toolbox/Hammer/")).unwrap(), Some(hammer));
        assert_eq!(s.resolve(&ResourcePath::root()).unwrap(), None);
    }

    #[test]
    fn resolve_rejects_partial_matches() {
        let (s, _) = seeded();
        for raw in ["/Garage/Nope", "/Toolbox", "/Garage/Toolbox/Hammer/Extra", "/Kitchen/Hammer"] {
            let err = s.resolve(&path(raw)).unwrap_err();
            assert!(matches!(err, TreeError::PathNotFound(ref p) if *p == path(raw)), "{raw}");
        }
    }

    #[test]
    fn resolve_deep_path_is_not_found() {
        let (s, _) = seeded();
        let deep = ResourcePath::from_segments((0..40_000).map(|i| format!("n{i}")));
        let err = s.resolve(&deep).unwrap_err();
        assert!(err.is_not_found(), "{err}");

        let mut chain = ResourcePath::parse("/Garage/Toolbox/Hammer");
        for _ in 0..10 {
            chain.push("Hammer");
        }
        assert!(s.resolve(&chain).unwrap_err().is_not_found());
    }

    #[test]
    fn resolve_prefers_smallest_id_among_duplicates() {
        let (mut s, [garage, ..]) = seeded();
        let dup = s
            .create_resource(&NewResource::item("Wrench").under(Some(garage)))
            .unwrap();
        let first = s.resolve(&path("/Garage/Wrench")).unwrap().unwrap();
        assert!(first < dup);
    }

    #[test]
    fn cycles_are_reported_not_followed() {
        let mut s = store();
        let a = s.create_resource(&NewResource::container("A")).unwrap();
        let b = s
            .create_resource(&NewResource::container("B").under(Some(a)))
            .unwrap();
        // The raw query does no cycle check.
        assert_eq!(s.move_resources(&[a], Some(b)).unwrap(), vec![a]);

        for id in [a, b] {
            assert!(matches!(s.get_path(id), Err(TreeError::CorruptTree { .. })));
            assert!(matches!(s.lineage(id), Err(TreeError::CorruptTree { .. })));
        }
        assert!(s.subtree(Some(a)).is_err());
        // Nothing in the loop hangs off the root.
        assert!(s.full_tree().unwrap().is_empty());
    }

    #[test]
    fn get_path_and_lineage() {
        let (s, [garage, _, toolbox, hammer, _]) = seeded();
        assert_eq!(s.get_path(hammer).unwrap(), path("/Garage/Toolbox/Hammer"));
        let ids: Vec<ResourceId> = s.lineage(hammer).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![hammer, toolbox, garage]);
        assert!(s.get_path(ResourceId::new(999)).unwrap_err().is_not_found());
    }

    #[test]
    fn subtree_and_full_tree() {
        let (s, [garage, ..]) = seeded();
        assert_eq!(
            s.subtree(Some(garage)).unwrap(),
            vec![
                path("/Garage/Toolbox"),
                path("/Garage/Toolbox/Hammer"),
                path("/Garage/Wrench"),
            ]
        );
        assert_eq!(s.full_tree().unwrap().len(), 5);
        assert_eq!(
            s.containers().unwrap(),
            vec![path("/Garage"), path("/Garage/Toolbox"), path("/Kitchen")]
        );
    }

    #[test]
    fn list_orders_by_name() {
        let (s, [garage, ..]) = seeded();
        let names: Vec<String> = s
            .list_resources(Some(garage))
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["Toolbox", "Wrench"]);
        assert_eq!(s.list_resources(None).unwrap().len(), 2);
    }

    #[test]
    fn search_matches_prefixes_across_fields() {
        let (mut s, [_, wrench, ..]) = seeded();
        assert_eq!(s.search("wre").unwrap()[0].id, wrench);
        assert_eq!(s.search("red").unwrap()[0].id, wrench);
        assert!(s.search("").unwrap().is_empty());
        assert!(s.search("\"unbalanced").unwrap().is_empty());

        let mut update = ResourceUpdate::from_resource(&s.get_resource(wrench).unwrap().unwrap());
        update.name = "Spanner".into();
        s.update_resource(&update).unwrap();
        assert!(s.search("wrench").unwrap().is_empty());
        assert_eq!(s.search("span").unwrap()[0].id, wrench);

        s.delete_resource(wrench).unwrap();
        assert!(s.search("span").unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    #[test]
    fn create_under_missing_parent_fails() {
        let mut s = store();
        let err = s
            .create_resource(&NewResource::item("Lost").under(Some(ResourceId::new(42))))
            .unwrap_err();
        assert!(matches!(err, TreeError::ParentNotFound(id) if id.get() == 42));
        assert!(s.all_resources().unwrap().is_empty());
    }

    #[test]
    fn ids_are_never_reused() {
        let mut s = store();
        let a = s.create_resource(&NewResource::item("a")).unwrap();
        s.delete_resource(a).unwrap();
        let b = s.create_resource(&NewResource::item("b")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn update_missing_reports_nothing() {
        let mut s = store();
        let update = ResourceUpdate {
            id: ResourceId::new(7),
            name: "x".into(),
            kind: ResourceKind::Item,
            color: String::new(),
            comments: String::new(),
        };
        assert!(s.update_resource(&update).unwrap().is_empty());
        assert!(s.update_resource_image(ResourceId::new(7), None).unwrap().is_empty());
    }

    #[test]
    fn image_round_trips_as_hex() {
        let (mut s, [_, wrench, ..]) = seeded();
        let blob = BlobId::from_content(b"png bytes");
        assert_eq!(s.update_resource_image(wrench, Some(blob)).unwrap(), vec![wrench]);
        assert_eq!(s.get_resource(wrench).unwrap().unwrap().image, Some(blob));
        s.update_resource_image(wrench, None).unwrap();
        assert_eq!(s.get_resource(wrench).unwrap().unwrap().image, None);
    }

    #[test]
    fn move_skips_unknown_ids_and_dedups() {
        let (mut s, [_, wrench, _, hammer, kitchen]) = seeded();
        let moved = s
            .move_resources(&[hammer, ResourceId::new(999), wrench, hammer], Some(kitchen))
            .unwrap();
        assert_eq!(moved, vec![wrench, hammer]);
        assert_eq!(s.get_path(hammer).unwrap(), path("/Kitchen/Hammer"));
        assert!(s.move_resources(&[], Some(ResourceId::new(999))).unwrap().is_empty());
        assert!(matches!(
            s.move_resources(&[wrench], Some(ResourceId::new(999))),
            Err(TreeError::ParentNotFound(_))
        ));
    }

    #[test]
    fn change_parent_moves_all_children() {
        let (mut s, [garage, _, _, _, kitchen]) = seeded();
        assert_eq!(s.change_parent(Some(garage), Some(kitchen)).unwrap(), 2);
        assert!(s.list_resources(Some(garage)).unwrap().is_empty());
        assert_eq!(s.list_resources(Some(kitchen)).unwrap().len(), 2);
    }

    #[test]
    fn delete_removes_subtree_children_first() {
        let (mut s, [garage, ..]) = seeded();
        assert_eq!(s.delete_resource(garage).unwrap(), 4);
        assert_eq!(s.all_resources().unwrap().len(), 1);
        assert_eq!(s.delete_resource(garage).unwrap(), 0);
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    #[test]
    fn failed_transaction_rolls_back() {
        let mut s = store();
        let err = s
            .transaction(&CancelToken::new(), |q| {
                q.create_resource(&NewResource::item("kept?"))?;
                q.create_resource(&NewResource::item("x").under(Some(ResourceId::new(99))))
            })
            .unwrap_err();
        assert!(matches!(err, TreeError::ParentNotFound(_)));
        assert!(s.all_resources().unwrap().is_empty());
    }

    #[test]
    fn cancelled_transaction_rolls_back() {
        let mut s = store();
        let token = CancelToken::new();
        let err = s
            .transaction(&token, |q| {
                q.create_resource(&NewResource::item("a"))?;
                token.cancel();
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, TreeError::Cancelled));
        assert!(s.all_resources().unwrap().is_empty());

        let err = s.transaction(&token, |_| Ok(())).unwrap_err();
        assert!(matches!(err, TreeError::Cancelled));
    }

    #[test]
    fn snapshot_observes_cancellation() {
        let (s, [garage, ..]) = seeded();
        let token = CancelToken::new();
        let err = s
            .snapshot(&token, |q| {
                token.cancel();
                q.subtree(Some(garage))
            })
            .unwrap_err();
        assert!(matches!(err, TreeError::Cancelled));
        assert!(matches!(s.snapshot(&token, |q| q.search("wrench")), Err(TreeError::Cancelled)));

        // The handler is removed afterwards.
        let live = CancelToken::new();
        assert_eq!(s.snapshot(&live, |q| q.subtree(Some(garage))).unwrap().len(), 3);
    }

    #[test]
    fn expired_deadline_fails_read() {
        let (s, _) = seeded();
        let token = CancelToken::with_timeout(std::time::Duration::ZERO);
        assert!(matches!(s.snapshot(&token, |q| q.full_tree()), Err(TreeError::Cancelled)));
    }
}
