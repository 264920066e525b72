//! SQL behind [`ResourceQueries`].
//!
//! Every statement here runs on whatever connection it is handed: the
//! store's own connection for snapshot reads, or an open transaction while a
//! mutation is in progress.

use std::collections::HashMap;

use archive_types::{
    BlobId, NewResource, Resource, ResourceId, ResourceKind, ResourcePath, ResourceUpdate,
};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::error::{TreeError, TreeResult};
use crate::traits::ResourceQueries;

const COLUMNS: &str = "id, parent_id, name, type, color, comments, image";

/// Stays under SQLite's default host-parameter limit for `in (...)` lists.
const MAX_PARAMS: usize = 900;

/// SQLite's compiled-in ceiling on `?N` in one statement.
const MAX_BOUND_SEGMENTS: usize = 32_766;

/// Queries bound to one connection or transaction.
pub struct SqliteQueries<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteQueries<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn exists(&self, id: ResourceId) -> TreeResult<bool> {
        let found = self
            .conn
            .query_row(
                "select 1 from resource where id = ?1",
                [id.get()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn require_parent(&self, parent: Option<ResourceId>) -> TreeResult<()> {
        match parent {
            Some(id) if !self.exists(id)? => Err(TreeError::ParentNotFound(id)),
            _ => Ok(()),
        }
    }

    fn resources(&self, sql: &str, params: impl rusqlite::Params) -> TreeResult<Vec<Resource>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, resource_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn ids(&self, sql: &str, params: impl rusqlite::Params) -> TreeResult<Vec<ResourceId>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, i64>(0).map(ResourceId::new))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// `(id, kind, path)` of every descendant of `anchor`, shallowest first.
    fn descendants(
        &self,
        anchor: Option<ResourceId>,
    ) -> TreeResult<Vec<(ResourceId, ResourceKind, ResourcePath)>> {
        let base = match anchor {
            Some(id) => self.get_path(id)?,
            None => ResourcePath::root(),
        };

        let mut stmt = self.conn.prepare(
            "with recursive down(id, parent_id, name, type, depth) as (
                 select id, parent_id, name, type, 1 from resource where parent_id is ?1
                 union all
                 select r.id, r.parent_id, r.name, r.type, d.depth + 1
                 from resource r join down d on r.parent_id = d.id
                 where d.depth <= (select count(*) from resource)
             )
             select id, parent_id, name, type from down order by depth",
        )?;
        let rows = stmt.query_map([anchor.map(ResourceId::get)], |row| {
            Ok((
                ResourceId::new(row.get(0)?),
                row.get::<_, Option<i64>>(1)?.map(ResourceId::new),
                row.get::<_, String>(2)?,
                kind_from_column(row, 3)?,
            ))
        })?;

        let mut paths: HashMap<ResourceId, ResourcePath> = HashMap::new();
        let mut out = Vec::new();
        for row in rows {
            let (id, parent, name, kind) = row?;
            let parent_path = if parent == anchor {
                &base
            } else {
                parent
                    .and_then(|p| paths.get(&p))
                    .ok_or_else(|| TreeError::CorruptTree {
                        id,
                        reason: "parent visited out of order".into(),
                    })?
            };
            let path = parent_path.join(&name);
            if paths.insert(id, path.clone()).is_some() {
                return Err(TreeError::CorruptTree {
                    id,
                    reason: "resource reached twice while walking down".into(),
                });
            }
            out.push((id, kind, path));
        }
        Ok(out)
    }

    fn delete_ids(&self, ids: &[ResourceId]) -> TreeResult<u64> {
        let mut removed = 0u64;
        for chunk in ids.chunks(MAX_PARAMS) {
            let sql = format!("delete from resource where id in ({})", placeholders(chunk.len()));
            removed += self
                .conn
                .execute(&sql, params_from_iter(chunk.iter().map(|id| id.get())))?
                as u64;
        }
        Ok(removed)
    }
}

impl ResourceQueries for SqliteQueries<'_> {
    fn create_resource(&mut self, new: &NewResource) -> TreeResult<ResourceId> {
        self.require_parent(new.parent_id)?;
        self.conn.execute(
            "insert into resource (parent_id, name, type, color, comments, image)
             values (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.parent_id.map(ResourceId::get),
                new.name,
                new.kind.as_str(),
                new.color,
                new.comments,
                new.image.map(|b| b.to_hex()),
            ],
        )?;
        let id = ResourceId::new(self.conn.last_insert_rowid());
        debug!(%id, name = %new.name, kind = %new.kind, "created resource");
        Ok(id)
    }

    fn update_resource(&mut self, update: &ResourceUpdate) -> TreeResult<Vec<ResourceId>> {
        self.ids(
            "update resource set name = ?2, type = ?3, color = ?4, comments = ?5
             where id = ?1 returning id",
            params![
                update.id.get(),
                update.name,
                update.kind.as_str(),
                update.color,
                update.comments,
            ],
        )
    }

    fn update_resource_image(
        &mut self,
        id: ResourceId,
        image: Option<BlobId>,
    ) -> TreeResult<Vec<ResourceId>> {
        self.ids(
            "update resource set image = ?2 where id = ?1 returning id",
            params![id.get(), image.map(|b| b.to_hex())],
        )
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
        for chunk in ids.chunks(MAX_PARAMS - 1) {
            let sql = format!(
                "update resource set parent_id = ?1 where id in ({}) returning id",
                numbered_placeholders(2, chunk.len())
            );
            let args = std::iter::once(new_parent.map(ResourceId::get))
                .chain(chunk.iter().map(|id| Some(id.get())));
            moved.extend(self.ids(&sql, params_from_iter(args))?);
        }
        moved.sort();
        debug!(count = moved.len(), parent = ?new_parent, "moved resources");
        Ok(moved)
    }

    fn change_parent(
        &mut self,
        old_parent: Option<ResourceId>,
        new_parent: Option<ResourceId>,
    ) -> TreeResult<u64> {
        self.require_parent(new_parent)?;
        let changed = self.conn.execute(
            "update resource set parent_id = ?2 where parent_id is ?1",
            params![old_parent.map(ResourceId::get), new_parent.map(ResourceId::get)],
        )?;
        debug!(changed, from = ?old_parent, to = ?new_parent, "changed parent");
        Ok(changed as u64)
    }

    fn delete_resource(&mut self, id: ResourceId) -> TreeResult<u64> {
        let mut stmt = self.conn.prepare(
            "with recursive doomed(id, depth) as (
                 select id, 0 from resource where id = ?1
                 union all
                 select r.id, d.depth + 1 from resource r join doomed d on r.parent_id = d.id
                 where d.depth <= (select count(*) from resource)
             )
             select id, depth from doomed order by depth desc",
        )?;
        let doomed = stmt
            .query_map([id.get()], |row| {
                Ok((ResourceId::new(row.get(0)?), row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        // Deepest level first so no delete ever relies on the cascade.
        let mut removed = 0u64;
        for level in doomed.chunk_by(|a, b| a.1 == b.1) {
            let ids: Vec<ResourceId> = level.iter().map(|(id, _)| *id).collect();
            removed += self.delete_ids(&ids)?;
        }
        debug!(%id, removed, "deleted subtree");
        Ok(removed)
    }

    fn get_resource(&self, id: ResourceId) -> TreeResult<Option<Resource>> {
        let sql = format!("select {COLUMNS} from resource where id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [id.get()], resource_from_row)
            .optional()?)
    }

    fn list_resources(&self, parent: Option<ResourceId>) -> TreeResult<Vec<Resource>> {
        let sql = format!("select {COLUMNS} from resource where parent_id is ?1 order by name, id");
        self.resources(&sql, [parent.map(ResourceId::get)])
    }

    fn all_resources(&self) -> TreeResult<Vec<Resource>> {
        let sql = format!("select {COLUMNS} from resource order by id");
        self.resources(&sql, [])
    }

    fn resolve(&self, path: &ResourcePath) -> TreeResult<Option<ResourceId>> {
        if path.is_root() {
            return Ok(None);
        }
        let depth = path.depth();
        // A path deeper than the table is tall cannot match.
        let rows: i64 = self
            .conn
            .query_row("select count(*) from resource", [], |row| row.get(0))?;
        if depth > MAX_BOUND_SEGMENTS || depth as i64 > rows {
            return Err(TreeError::PathNotFound(path.clone()));
        }
        let steps = (1..=depth)
            .map(|i| format!("({i}, ?{i})"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "with recursive segments(step, name) as (values {steps}),
             found(step, id) as (
                 select 1, r.id from resource r join segments s on s.step = 1
                 where r.parent_id is null and r.name = s.name
                 union all
                 select f.step + 1, r.id from found f
                 join segments s on s.step = f.step + 1
                 join resource r on r.parent_id = f.id and r.name = s.name
             )
             select id from found where step = {depth} order by id limit 2"
        );
        let matches = self.ids(&sql, params_from_iter(path.segments()))?;
        match matches.as_slice() {
            [] => Err(TreeError::PathNotFound(path.clone())),
            [only] => Ok(Some(*only)),
            [first, ..] => {
                warn!(path = %path, chosen = %first, "path matches several resources");
                Ok(Some(*first))
            }
        }
    }

    fn lineage(&self, id: ResourceId) -> TreeResult<Vec<Resource>> {
        let sql = format!(
            "with recursive up({COLUMNS}, depth) as (
                 select {COLUMNS}, 0 from resource where id = ?1
                 union all
                 select r.id, r.parent_id, r.name, r.type, r.color, r.comments, r.image,
                        u.depth + 1
                 from resource r join up u on r.id = u.parent_id
                 where u.depth < (select count(*) from resource)
             )
             select {COLUMNS} from up order by depth"
        );
        let chain = self.resources(&sql, [id.get()])?;
        match chain.last() {
            None => Err(TreeError::NotFound(id)),
            Some(top) if top.parent_id.is_some() => Err(TreeError::CorruptTree {
                id,
                reason: format!("ancestor chain does not reach the root (stuck at {})", top.id),
            }),
            Some(_) => Ok(chain),
        }
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
            .map(|(_, _, path)| path)
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn containers(&self) -> TreeResult<Vec<ResourcePath>> {
        let mut paths: Vec<ResourcePath> = self
            .descendants(None)?
            .into_iter()
            .filter(|(_, kind, _)| *kind == ResourceKind::Container)
            .map(|(_, _, path)| path)
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn search(&self, query: &str) -> TreeResult<Vec<Resource>> {
        let Some(expr) = fts_query(query) else {
            return Ok(Vec::new());
        };
        self.resources(
            "select resource.id, resource.parent_id, resource.name, resource.type,
                    resource.color, resource.comments, resource.image
             from resource_fts join resource on resource.id = resource_fts.rowid
             where resource_fts match ?1
             order by resource_fts.rank, resource.id",
            [expr],
        )
    }
}

/// Turn free text into an FTS5 expression: every term that has at least one
/// letter or digit becomes a quoted prefix term, and all terms must match.
/// `None` when nothing searchable remains.
pub(crate) fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn numbered_placeholders(first: usize, n: usize) -> String {
    (first..first + n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn kind_from_column(row: &Row<'_>, column: usize) -> rusqlite::Result<ResourceKind> {
    row.get::<_, String>(column)?
        .parse()
        .map_err(|e| conversion_error(column, e))
}

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<Resource> {
    let image = row
        .get::<_, Option<String>>(6)?
        .map(|hex| BlobId::from_hex(&hex))
        .transpose()
        .map_err(|e| conversion_error(6, e))?;
    Ok(Resource {
        id: ResourceId::new(row.get(0)?),
        parent_id: row.get::<_, Option<i64>>(1)?.map(ResourceId::new),
        name: row.get(2)?,
        kind: kind_from_column(row, 3)?,
        color: row.get(4)?,
        comments: row.get(5)?,
        image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_query_quotes_prefix_terms() {
        assert_eq!(fts_query("red wrench").as_deref(), Some("\"red\"* \"wrench\"*"));
        assert_eq!(fts_query("say \"hi\"").as_deref(), Some("\"say\"* \"\"\"hi\"\"\"*"));
    }

    #[test]
    fn fts_query_drops_operator_only_terms() {
        assert_eq!(fts_query("   "), None);
        assert_eq!(fts_query("* - ( )"), None);
        assert_eq!(fts_query("AND * box").as_deref(), Some("\"AND\"* \"box\"*"));
    }

    #[test]
    fn placeholder_lists() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(numbered_placeholders(2, 3), "?2, ?3, ?4");
    }
}
