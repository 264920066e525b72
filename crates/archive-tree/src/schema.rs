//! Relational schema for the resource tree.
//!
//! One `resource` row per node. `parent_id` is a self-referencing foreign key
//! (null for root-level resources). `resource_fts` is an external-content
//! FTS5 index over the descriptive columns, kept in step by triggers.

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{TreeError, TreeResult};

/// Stamped into `pragma user_version` once the schema is in place.
pub const SCHEMA_VERSION: i64 = 1;

pub const SCHEMA: &str = r#"
create table if not exists resource (
    id integer primary key autoincrement,
    parent_id integer references resource(id) on delete cascade,
    name text not null,
    type text not null,
    color text not null default '',
    comments text not null default '',
    image text,
    check (parent_id is null or parent_id != id)
);

create index if not exists resource_parent_idx on resource(parent_id);

create virtual table if not exists resource_fts using fts5(
    name,
    type,
    color,
    comments,
    content = 'resource',
    content_rowid = 'id'
);

create trigger if not exists resource_fts_insert after insert on resource begin
    insert into resource_fts(rowid, name, type, color, comments)
    values (new.id, new.name, new.type, new.color, new.comments);
end;

create trigger if not exists resource_fts_delete after delete on resource begin
    insert into resource_fts(resource_fts, rowid, name, type, color, comments)
    values ('delete', old.id, old.name, old.type, old.color, old.comments);
end;

create trigger if not exists resource_fts_update
after update of name, type, color, comments on resource begin
    insert into resource_fts(resource_fts, rowid, name, type, color, comments)
    values ('delete', old.id, old.name, old.type, old.color, old.comments);
    insert into resource_fts(rowid, name, type, color, comments)
    values (new.id, new.name, new.type, new.color, new.comments);
end;
"#;

/// Apply connection pragmas.
pub(crate) fn configure(conn: &Connection, config: &StoreConfig) -> TreeResult<()> {
    // Busy timeout first so the journal-mode switch can wait out other
    // connections.
    conn.busy_timeout(config.busy_timeout())?;
    let mode: String = conn.pragma_update_and_check(
        None,
        "journal_mode",
        config.journal_mode.as_str(),
        |row| row.get(0),
    )?;
    conn.pragma_update(None, "synchronous", config.synchronous.as_str())?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    debug!(journal_mode = %mode, "configured connection");
    Ok(())
}

/// Create the schema if needed and run configured migrations, atomically.
pub(crate) fn initialize(conn: &mut Connection, config: &StoreConfig) -> TreeResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let version: i64 = tx.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(TreeError::InvalidData(format!(
            "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    tx.execute_batch(SCHEMA)?;
    if let Some(migrations) = &config.migrations {
        info!("applying migrations");
        tx.execute_batch(migrations)?;
    }
    if version < SCHEMA_VERSION {
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!(from = version, to = SCHEMA_VERSION, "initialized schema");
    }
    tx.commit()?;
    Ok(())
}
