//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety. Foreign keys are
//! enabled on every connection so deleting an entity cascades to its
//! trackers, failures, placeholder references and children.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use ferry_types::entity::{
    Entity, EntityId, EntityKind, EntityRegistration, EntityStatus, NewEntity,
};
use ferry_types::error::ErrorCategory;
use ferry_types::failure::{Failure, NewFailure, PipelineStep};
use ferry_types::identity::{DestinationUserId, PlaceholderReference, SourceUserId};
use ferry_types::page::PageInfo;
use ferry_types::tracker::{PipelineKind, Tracker, TrackerId, TrackerStatus};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    migration TEXT NOT NULL,
    source_type TEXT NOT NULL,
    source_full_path TEXT NOT NULL,
    destination_slug TEXT NOT NULL,
    destination_namespace TEXT NOT NULL DEFAULT '',
    parent_id INTEGER REFERENCES entities(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    organization_id INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (migration, source_full_path, destination_namespace, destination_slug)
);

CREATE TABLE IF NOT EXISTS trackers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    pipeline_kind TEXT NOT NULL,
    stage INTEGER NOT NULL,
    status TEXT NOT NULL,
    next_page TEXT,
    has_next_page INTEGER,
    seen_count INTEGER NOT NULL DEFAULT 0,
    imported_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (entity_id, pipeline_kind)
);

CREATE TABLE IF NOT EXISTS failures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    tracker_id INTEGER REFERENCES trackers(id) ON DELETE CASCADE,
    pipeline_kind TEXT,
    step TEXT NOT NULL,
    category TEXT NOT NULL,
    code TEXT NOT NULL,
    message TEXT NOT NULL,
    record_key TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS placeholder_references (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    pipeline_kind TEXT NOT NULL,
    relation TEXT NOT NULL,
    record_key TEXT NOT NULL,
    field TEXT NOT NULL,
    source_user_id INTEGER NOT NULL,
    placeholder_user_id INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (entity_id, pipeline_kind, relation, record_key, field)
);

CREATE INDEX IF NOT EXISTS idx_entities_migration_status ON entities (migration, status);
CREATE INDEX IF NOT EXISTS idx_failures_entity ON failures (entity_id);
";

const ENTITY_COLUMNS: &str = "id, migration, source_type, source_full_path, destination_slug, \
     destination_namespace, parent_id, status, organization_id";

const TRACKER_COLUMNS: &str = "id, entity_id, pipeline_kind, stage, status, next_page, \
     has_next_page, seen_count, imported_count, updated_at";

const FAILURE_COLUMNS: &str = "id, entity_id, tracker_id, pipeline_kind, step, category, code, \
     message, record_key, created_at";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("create state tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Format current UTC time for `SQLite` storage.
    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }

    fn query_entity(conn: &Connection, id: EntityId) -> error::Result<Option<Entity>> {
        conn.query_row(
            &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"),
            [id.get()],
            entity_from_row,
        )
        .optional()
        .map_err(|e| StateError::backend_context("get_entity", e))
    }

    fn query_tracker(conn: &Connection, id: TrackerId) -> error::Result<Option<Tracker>> {
        conn.query_row(
            &format!("SELECT {TRACKER_COLUMNS} FROM trackers WHERE id = ?1"),
            [id.get()],
            tracker_from_row,
        )
        .optional()
        .map_err(|e| StateError::backend_context("get_tracker", e))
    }

    #[cfg(test)]
    fn count_rows(&self, table: &str) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .map_err(StateError::backend)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Parse a stored enum column, surfacing bad values as conversion failures.
fn parse_column<T>(idx: usize, raw: &str, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unexpected value '{raw}'").into(),
        )
    })
}

fn count_from_sql(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

#[allow(clippy::cast_possible_wrap)]
fn count_to_sql(count: u64) -> i64 {
    count as i64
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let kind: String = row.get(2)?;
    let status: String = row.get(7)?;
    Ok(Entity {
        id: EntityId::new(row.get(0)?),
        migration: row.get(1)?,
        kind: parse_column(2, &kind, EntityKind::parse)?,
        source_full_path: row.get(3)?,
        destination_slug: row.get(4)?,
        destination_namespace: row.get(5)?,
        parent_id: row.get::<_, Option<i64>>(6)?.map(EntityId::new),
        status: parse_column(7, &status, EntityStatus::parse)?,
        organization_id: row.get(8)?,
    })
}

fn tracker_from_row(row: &Row<'_>) -> rusqlite::Result<Tracker> {
    let status: String = row.get(4)?;
    let next_page: Option<String> = row.get(5)?;
    let has_next_page: Option<bool> = row.get(6)?;
    let updated_at: String = row.get(9)?;
    Ok(Tracker {
        id: TrackerId::new(row.get(0)?),
        entity_id: EntityId::new(row.get(1)?),
        pipeline_kind: PipelineKind::new(row.get::<_, String>(2)?),
        stage: row.get(3)?,
        status: parse_column(4, &status, TrackerStatus::parse)?,
        page_info: has_next_page.map(|has_next_page| PageInfo {
            next_page,
            has_next_page,
        }),
        seen_count: count_from_sql(row.get(7)?),
        imported_count: count_from_sql(row.get(8)?),
        updated_at: SqliteStateBackend::sqlite_to_iso8601(&updated_at),
    })
}

fn failure_from_row(row: &Row<'_>) -> rusqlite::Result<Failure> {
    let step: String = row.get(4)?;
    let category: String = row.get(5)?;
    let created_at: String = row.get(9)?;
    Ok(Failure {
        id: row.get(0)?,
        entity_id: EntityId::new(row.get(1)?),
        tracker_id: row.get::<_, Option<i64>>(2)?.map(TrackerId::new),
        pipeline_kind: row.get::<_, Option<String>>(3)?.map(PipelineKind::new),
        step: parse_column(4, &step, PipelineStep::parse)?,
        category: parse_column(5, &category, ErrorCategory::parse)?,
        code: row.get(6)?,
        message: row.get(7)?,
        record_key: row.get(8)?,
        created_at: SqliteStateBackend::sqlite_to_iso8601(&created_at),
    })
}

fn placeholder_from_row(row: &Row<'_>) -> rusqlite::Result<PlaceholderReference> {
    Ok(PlaceholderReference {
        entity_id: EntityId::new(row.get(0)?),
        pipeline_kind: PipelineKind::new(row.get::<_, String>(1)?),
        relation: row.get(2)?,
        record_key: row.get(3)?,
        field: row.get(4)?,
        source_user_id: SourceUserId::new(row.get(5)?),
        placeholder_user_id: row.get::<_, Option<i64>>(6)?.map(DestinationUserId::new),
    })
}

// ---------------------------------------------------------------------------
// StateBackend
// ---------------------------------------------------------------------------

impl StateBackend for SqliteStateBackend {
    fn create_entity(&self, entity: &NewEntity) -> error::Result<EntityRegistration> {
        let conn = self.lock_conn()?;
        let now = Self::now_sqlite();
        let inserted = conn
            .execute(
                "INSERT INTO entities \
                 (migration, source_type, source_full_path, destination_slug, \
                  destination_namespace, parent_id, status, organization_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) \
                 ON CONFLICT (migration, source_full_path, destination_namespace, destination_slug) \
                 DO NOTHING",
                rusqlite::params![
                    entity.migration,
                    entity.kind.as_str(),
                    entity.source_full_path,
                    entity.destination_slug,
                    entity.destination_namespace,
                    entity.parent_id.map(EntityId::get),
                    EntityStatus::Created.as_str(),
                    entity.organization_id,
                    now,
                ],
            )
            .map_err(|e| StateError::backend_context("create_entity: insert", e))?;

        let stored = conn
            .query_row(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities WHERE migration = ?1 \
                     AND source_full_path = ?2 AND destination_namespace = ?3 \
                     AND destination_slug = ?4"
                ),
                rusqlite::params![
                    entity.migration,
                    entity.source_full_path,
                    entity.destination_namespace,
                    entity.destination_slug,
                ],
                entity_from_row,
            )
            .map_err(|e| StateError::backend_context("create_entity: select", e))?;

        Ok(EntityRegistration {
            entity: stored,
            created: inserted > 0,
        })
    }

    fn get_entity(&self, id: EntityId) -> error::Result<Option<Entity>> {
        let conn = self.lock_conn()?;
        Self::query_entity(&conn, id)
    }

    fn list_entities(
        &self,
        migration: &str,
        status: Option<EntityStatus>,
    ) -> error::Result<Vec<Entity>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTITY_COLUMNS} FROM entities \
                 WHERE migration = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY id"
            ))
            .map_err(|e| StateError::backend_context("list_entities: prepare", e))?;
        let rows = stmt
            .query_map(
                rusqlite::params![migration, status.map(EntityStatus::as_str)],
                entity_from_row,
            )
            .map_err(|e| StateError::backend_context("list_entities: query", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StateError::backend_context("list_entities: row", e))
    }

    fn set_entity_status(&self, id: EntityId, status: EntityStatus) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE entities SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.as_str(), Self::now_sqlite(), id.get()],
            )
            .map_err(|e| StateError::backend_context("set_entity_status", e))?;
        if updated == 0 {
            return Err(StateError::NotFound {
                what: "entity",
                id: id.get(),
            });
        }
        Ok(())
    }

    fn delete_entity(&self, id: EntityId) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let deleted = conn
            .execute("DELETE FROM entities WHERE id = ?1", [id.get()])
            .map_err(|e| StateError::backend_context("delete_entity", e))?;
        Ok(deleted > 0)
    }

    fn get_or_create_tracker(
        &self,
        entity_id: EntityId,
        kind: &PipelineKind,
        stage: u32,
    ) -> error::Result<Tracker> {
        let conn = self.lock_conn()?;
        let now = Self::now_sqlite();
        conn.execute(
            "INSERT INTO trackers (entity_id, pipeline_kind, stage, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
             ON CONFLICT (entity_id, pipeline_kind) DO NOTHING",
            rusqlite::params![
                entity_id.get(),
                kind.as_str(),
                stage,
                TrackerStatus::Created.as_str(),
                now,
            ],
        )
        .map_err(|e| StateError::backend_context("get_or_create_tracker: insert", e))?;

        conn.query_row(
            &format!(
                "SELECT {TRACKER_COLUMNS} FROM trackers WHERE entity_id = ?1 AND pipeline_kind = ?2"
            ),
            rusqlite::params![entity_id.get(), kind.as_str()],
            tracker_from_row,
        )
        .map_err(|e| StateError::backend_context("get_or_create_tracker: select", e))
    }

    fn get_tracker(&self, id: TrackerId) -> error::Result<Option<Tracker>> {
        let conn = self.lock_conn()?;
        Self::query_tracker(&conn, id)
    }

    fn list_trackers(&self, entity_id: EntityId) -> error::Result<Vec<Tracker>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TRACKER_COLUMNS} FROM trackers WHERE entity_id = ?1 ORDER BY stage, id"
            ))
            .map_err(|e| StateError::backend_context("list_trackers: prepare", e))?;
        let rows = stmt
            .query_map([entity_id.get()], tracker_from_row)
            .map_err(|e| StateError::backend_context("list_trackers: query", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StateError::backend_context("list_trackers: row", e))
    }

    fn set_tracker_status(&self, id: TrackerId, status: TrackerStatus) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE trackers SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.as_str(), Self::now_sqlite(), id.get()],
            )
            .map_err(|e| StateError::backend_context("set_tracker_status", e))?;
        if updated == 0 {
            return Err(StateError::NotFound {
                what: "tracker",
                id: id.get(),
            });
        }
        Ok(())
    }

    fn advance_tracker(
        &self,
        id: TrackerId,
        page_info: &PageInfo,
        seen_delta: u64,
        imported_delta: u64,
    ) -> error::Result<Tracker> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("advance_tracker: begin tx", e))?;
        let updated = tx
            .execute(
                "UPDATE trackers SET next_page = ?1, has_next_page = ?2, \
                 seen_count = seen_count + ?3, imported_count = imported_count + ?4, \
                 updated_at = ?5 WHERE id = ?6",
                rusqlite::params![
                    page_info.next_page,
                    page_info.has_next_page,
                    count_to_sql(seen_delta),
                    count_to_sql(imported_delta),
                    Self::now_sqlite(),
                    id.get(),
                ],
            )
            .map_err(|e| StateError::backend_context("advance_tracker: update", e))?;
        if updated == 0 {
            return Err(StateError::NotFound {
                what: "tracker",
                id: id.get(),
            });
        }
        let tracker = Self::query_tracker(&tx, id)?.ok_or(StateError::NotFound {
            what: "tracker",
            id: id.get(),
        })?;
        tx.commit()
            .map_err(|e| StateError::backend_context("advance_tracker: commit", e))?;
        Ok(tracker)
    }

    fn insert_failure(&self, failure: &NewFailure) -> error::Result<Failure> {
        let conn = self.lock_conn()?;
        let now = Self::now_sqlite();
        conn.execute(
            "INSERT INTO failures \
             (entity_id, tracker_id, pipeline_kind, step, category, code, message, record_key, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                failure.entity_id.get(),
                failure.tracker_id.map(TrackerId::get),
                failure.pipeline_kind.as_ref().map(PipelineKind::as_str),
                failure.step.as_str(),
                failure.category.as_str(),
                failure.code,
                failure.message,
                failure.record_key,
                now,
            ],
        )
        .map_err(|e| StateError::backend_context("insert_failure", e))?;

        Ok(Failure {
            id: conn.last_insert_rowid(),
            entity_id: failure.entity_id,
            tracker_id: failure.tracker_id,
            pipeline_kind: failure.pipeline_kind.clone(),
            step: failure.step,
            category: failure.category,
            code: failure.code.clone(),
            message: failure.message.clone(),
            record_key: failure.record_key.clone(),
            created_at: Self::sqlite_to_iso8601(&now),
        })
    }

    fn list_failures(&self, entity_id: EntityId) -> error::Result<Vec<Failure>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {FAILURE_COLUMNS} FROM failures WHERE entity_id = ?1 ORDER BY id"
            ))
            .map_err(|e| StateError::backend_context("list_failures: prepare", e))?;
        let rows = stmt
            .query_map([entity_id.get()], failure_from_row)
            .map_err(|e| StateError::backend_context("list_failures: query", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StateError::backend_context("list_failures: row", e))
    }

    fn insert_placeholder_references(&self, refs: &[PlaceholderReference]) -> error::Result<u64> {
        if refs.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("insert_placeholder_references: begin tx", e))?;
        let mut stmt = tx
            .prepare(
                "INSERT INTO placeholder_references \
                 (entity_id, pipeline_kind, relation, record_key, field, source_user_id, placeholder_user_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT (entity_id, pipeline_kind, relation, record_key, field) DO NOTHING",
            )
            .map_err(|e| StateError::backend_context("insert_placeholder_references: prepare", e))?;

        let mut count = 0u64;
        for reference in refs {
            let inserted = stmt
                .execute(rusqlite::params![
                    reference.entity_id.get(),
                    reference.pipeline_kind.as_str(),
                    reference.relation,
                    reference.record_key,
                    reference.field,
                    reference.source_user_id.get(),
                    reference.placeholder_user_id.map(DestinationUserId::get),
                ])
                .map_err(|e| StateError::backend_context("insert_placeholder_references: execute", e))?;
            count += inserted as u64;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend_context("insert_placeholder_references: commit", e))?;

        Ok(count)
    }

    fn list_placeholder_references(
        &self,
        entity_id: EntityId,
    ) -> error::Result<Vec<PlaceholderReference>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT entity_id, pipeline_kind, relation, record_key, field, source_user_id, \
                 placeholder_user_id FROM placeholder_references WHERE entity_id = ?1 ORDER BY id",
            )
            .map_err(|e| StateError::backend_context("list_placeholder_references: prepare", e))?;
        let rows = stmt
            .query_map([entity_id.get()], placeholder_from_row)
            .map_err(|e| StateError::backend_context("list_placeholder_references: query", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StateError::backend_context("list_placeholder_references: row", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entity(path: &str) -> NewEntity {
        NewEntity {
            migration: "m1".into(),
            kind: EntityKind::Project,
            source_full_path: path.into(),
            destination_slug: path.rsplit('/').next().unwrap_or(path).into(),
            destination_namespace: "imported".into(),
            parent_id: None,
            organization_id: None,
        }
    }

    fn failure(entity_id: EntityId, tracker: Option<&Tracker>, category: ErrorCategory) -> NewFailure {
        NewFailure {
            entity_id,
            tracker_id: tracker.map(|t| t.id),
            pipeline_kind: tracker.map(|t| t.pipeline_kind.clone()),
            step: PipelineStep::Loader,
            category,
            code: "X".into(),
            message: "boom".into(),
            record_key: Some("7".into()),
        }
    }

    fn placeholder(entity_id: EntityId, key: &str) -> PlaceholderReference {
        PlaceholderReference {
            entity_id,
            pipeline_kind: PipelineKind::new("issues"),
            relation: "issues".into(),
            record_key: key.into(),
            field: "author_id".into(),
            source_user_id: SourceUserId::new(42),
            placeholder_user_id: Some(DestinationUserId::new(1)),
        }
    }

    #[test]
    fn create_entity_is_idempotent() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let first = backend.create_entity(&new_entity("acme/api")).unwrap();
        assert!(first.created);
        assert_eq!(first.entity.status, EntityStatus::Created);

        let second = backend.create_entity(&new_entity("acme/api")).unwrap();
        assert!(!second.created);
        assert_eq!(second.entity.id, first.entity.id);
        assert_eq!(backend.count_rows("entities").unwrap(), 1);
    }

    #[test]
    fn same_path_in_other_migration_is_distinct() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend.create_entity(&new_entity("acme/api")).unwrap();
        let mut other = new_entity("acme/api");
        other.migration = "m2".into();
        assert!(backend.create_entity(&other).unwrap().created);
    }

    #[test]
    fn list_entities_filters_by_migration_and_status() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let a = backend.create_entity(&new_entity("acme/a")).unwrap().entity;
        let b = backend.create_entity(&new_entity("acme/b")).unwrap().entity;
        backend.set_entity_status(b.id, EntityStatus::Finished).unwrap();

        let all = backend.list_entities("m1", None).unwrap();
        assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a.id, b.id]);

        let created = backend.list_entities("m1", Some(EntityStatus::Created)).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].id, a.id);

        assert!(backend.list_entities("other", None).unwrap().is_empty());
    }

    #[test]
    fn set_status_on_missing_entity_is_not_found() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let err = backend
            .set_entity_status(EntityId::new(99), EntityStatus::Failed)
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound { what: "entity", id: 99 }));
    }

    #[test]
    fn tracker_get_or_create_is_unique_per_kind() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let entity = backend.create_entity(&new_entity("acme/api")).unwrap().entity;
        let kind = PipelineKind::new("issues");

        let t1 = backend.get_or_create_tracker(entity.id, &kind, 2).unwrap();
        let t2 = backend.get_or_create_tracker(entity.id, &kind, 2).unwrap();
        assert_eq!(t1.id, t2.id);
        assert_eq!(t1.status, TrackerStatus::Created);
        assert_eq!(t1.page_info, None);
        assert_eq!(t1.stage, 2);

        backend
            .get_or_create_tracker(entity.id, &PipelineKind::new("labels"), 1)
            .unwrap();
        let kinds: Vec<_> = backend
            .list_trackers(entity.id)
            .unwrap()
            .into_iter()
            .map(|t| t.pipeline_kind.to_string())
            .collect();
        assert_eq!(kinds, vec!["labels", "issues"]);
    }

    #[test]
    fn tracker_for_missing_entity_fails() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let err = backend
            .get_or_create_tracker(EntityId::new(5), &PipelineKind::new("issues"), 0)
            .unwrap_err();
        assert!(err.to_string().contains("get_or_create_tracker"), "got: {err}");
    }

    #[test]
    fn advance_tracker_moves_cursor_and_counts() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let entity = backend.create_entity(&new_entity("acme/api")).unwrap().entity;
        let tracker = backend
            .get_or_create_tracker(entity.id, &PipelineKind::new("issues"), 2)
            .unwrap();

        let t = backend
            .advance_tracker(tracker.id, &PageInfo::next("c1"), 5, 4)
            .unwrap();
        assert_eq!(t.cursor(), Some("c1"));
        assert_eq!(t.seen_count, 5);
        assert_eq!(t.imported_count, 4);

        let t = backend
            .advance_tracker(tracker.id, &PageInfo::last(), 2, 2)
            .unwrap();
        assert_eq!(t.cursor(), None);
        assert!(t.pages_exhausted());
        assert_eq!(t.seen_count, 7);
        assert_eq!(t.imported_count, 6);
    }

    #[test]
    fn advance_missing_tracker_is_not_found() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let err = backend
            .advance_tracker(TrackerId::new(3), &PageInfo::last(), 1, 1)
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound { what: "tracker", .. }));
    }

    #[test]
    fn status_change_keeps_cursor() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let entity = backend.create_entity(&new_entity("acme/api")).unwrap().entity;
        let tracker = backend
            .get_or_create_tracker(entity.id, &PipelineKind::new("notes"), 3)
            .unwrap();
        backend
            .advance_tracker(tracker.id, &PageInfo::next("c9"), 1, 1)
            .unwrap();
        backend
            .set_tracker_status(tracker.id, TrackerStatus::Failed)
            .unwrap();

        let t = backend.get_tracker(tracker.id).unwrap().unwrap();
        assert_eq!(t.status, TrackerStatus::Failed);
        assert_eq!(t.cursor(), Some("c9"));
    }

    #[test]
    fn failures_roundtrip() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let entity = backend.create_entity(&new_entity("acme/api")).unwrap().entity;
        let tracker = backend
            .get_or_create_tracker(entity.id, &PipelineKind::new("repository"), 1)
            .unwrap();

        let stored = backend
            .insert_failure(&failure(entity.id, Some(&tracker), ErrorCategory::Security))
            .unwrap();
        backend
            .insert_failure(&failure(entity.id, None, ErrorCategory::Internal))
            .unwrap();

        let failures = backend.list_failures(entity.id).unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0], stored);
        assert!(failures[0].is_security());
        assert_eq!(failures[0].pipeline_kind, Some(PipelineKind::new("repository")));
        assert_eq!(failures[1].tracker_id, None);
        assert!(failures[1].created_at.ends_with('Z'));
    }

    #[test]
    fn placeholder_references_dedupe_on_replay() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let entity = backend.create_entity(&new_entity("acme/api")).unwrap().entity;
        let refs = vec![placeholder(entity.id, "1"), placeholder(entity.id, "2")];

        assert_eq!(backend.insert_placeholder_references(&refs).unwrap(), 2);
        assert_eq!(backend.insert_placeholder_references(&refs).unwrap(), 0);
        assert_eq!(backend.insert_placeholder_references(&[]).unwrap(), 0);

        let listed = backend.list_placeholder_references(entity.id).unwrap();
        assert_eq!(listed, refs);
    }

    #[test]
    fn delete_entity_cascades() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let parent = backend.create_entity(&new_entity("acme")).unwrap().entity;
        let mut child = new_entity("acme/api");
        child.parent_id = Some(parent.id);
        let child = backend.create_entity(&child).unwrap().entity;

        let tracker = backend
            .get_or_create_tracker(child.id, &PipelineKind::new("issues"), 2)
            .unwrap();
        backend
            .insert_failure(&failure(child.id, Some(&tracker), ErrorCategory::Data))
            .unwrap();
        backend
            .insert_placeholder_references(&[placeholder(child.id, "1")])
            .unwrap();

        assert!(backend.delete_entity(parent.id).unwrap());
        assert!(!backend.delete_entity(parent.id).unwrap());
        assert_eq!(backend.count_rows("entities").unwrap(), 0);
        assert_eq!(backend.count_rows("trackers").unwrap(), 0);
        assert_eq!(backend.count_rows("failures").unwrap(), 0);
        assert_eq!(backend.count_rows("placeholder_references").unwrap(), 0);
    }

    #[test]
    fn file_backed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let tracker_id = {
            let backend = SqliteStateBackend::open(&path).unwrap();
            let entity = backend.create_entity(&new_entity("acme/api")).unwrap().entity;
            let tracker = backend
                .get_or_create_tracker(entity.id, &PipelineKind::new("issues"), 2)
                .unwrap();
            backend
                .advance_tracker(tracker.id, &PageInfo::next("c3"), 3, 3)
                .unwrap();
            tracker.id
        };

        let backend = SqliteStateBackend::open(&path).unwrap();
        let tracker = backend.get_tracker(tracker_id).unwrap().unwrap();
        assert_eq!(tracker.cursor(), Some("c3"));
        assert_eq!(tracker.seen_count, 3);
    }

    #[test]
    fn sqlite_to_iso8601_conversion() {
        assert_eq!(
            SqliteStateBackend::sqlite_to_iso8601("2026-03-01 10:20:30"),
            "2026-03-01T10:20:30Z"
        );
        assert_eq!(SqliteStateBackend::sqlite_to_iso8601("garbage"), "garbage");
    }
}
