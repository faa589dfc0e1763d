//! `SQLite`-backed [`DestinationStore`].
//!
//! Namespaces, relation records and users live in one database; imported
//! bundles are copied into a content directory under their SHA-256 digest.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use ferry_types::entity::EntityKind;
use ferry_types::identity::DestinationUserId;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::destination::{BundleInfo, CreateOutcome, DestinationObject, DestinationStore, StoredRecord};
use crate::error::{self, StateError};

const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS namespaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    full_path TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    attributes TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    full_path TEXT NOT NULL,
    relation TEXT NOT NULL,
    record_key TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (full_path, relation, record_key)
);

CREATE TABLE IF NOT EXISTS bundles (
    full_path TEXT NOT NULL,
    relation TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    size INTEGER NOT NULL,
    stored_path TEXT NOT NULL,
    imported_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (full_path, relation)
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    username TEXT NOT NULL
);
";

/// `SQLite` destination store with a content directory for bundles.
pub struct SqliteDestinationStore {
    conn: Mutex<Connection>,
    content_dir: PathBuf,
}

impl SqliteDestinationStore {
    /// Open or create a destination database at `path`, storing bundles
    /// under `content_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if a directory can't be created,
    /// or [`StateError::Backend`] if the database can't be opened.
    pub fn open(path: &Path, content_dir: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        Self::init(conn, content_dir)
    }

    /// Create an in-memory destination store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the database or content directory can't be
    /// initialized.
    pub fn in_memory(content_dir: &Path) -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        Self::init(conn, content_dir)
    }

    fn init(conn: Connection, content_dir: &Path) -> error::Result<Self> {
        std::fs::create_dir_all(content_dir)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("create destination tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            content_dir: content_dir.to_path_buf(),
        })
    }

    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Register a destination user. Returns the existing id if the email is
    /// already known.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] on storage failure.
    pub fn add_user(&self, email: &str, username: &str) -> error::Result<DestinationUserId> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO users (email, username) VALUES (?1, ?2) ON CONFLICT (email) DO NOTHING",
            rusqlite::params![email, username],
        )
        .map_err(|e| StateError::backend_context("add_user: insert", e))?;
        conn.query_row("SELECT id FROM users WHERE email = ?1", [email], |row| row.get(0))
            .map(DestinationUserId::new)
            .map_err(|e| StateError::backend_context("add_user: select", e))
    }
}

/// Stream a file through SHA-256.
fn digest_file(path: &Path) -> error::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

impl DestinationStore for SqliteDestinationStore {
    fn find_namespace(&self, full_path: &str) -> error::Result<Option<DestinationObject>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT id, kind, attributes FROM namespaces WHERE full_path = ?1",
                [full_path],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StateError::backend_context("find_namespace", e))?;

        let Some((id, kind, attributes)) = row else {
            return Ok(None);
        };
        let kind = EntityKind::parse(&kind).unwrap_or(EntityKind::Group);
        Ok(Some(DestinationObject {
            id,
            full_path: full_path.to_string(),
            kind,
            attributes: serde_json::from_str(&attributes)?,
        }))
    }

    fn create_namespace(
        &self,
        full_path: &str,
        kind: EntityKind,
        attributes: &Value,
    ) -> error::Result<CreateOutcome> {
        let encoded = serde_json::to_string(attributes)?;
        let conn = self.lock_conn()?;
        let inserted = conn
            .execute(
                "INSERT INTO namespaces (full_path, kind, attributes) VALUES (?1, ?2, ?3) \
                 ON CONFLICT (full_path) DO NOTHING",
                rusqlite::params![full_path, kind.as_str(), encoded],
            )
            .map_err(|e| StateError::backend_context("create_namespace: insert", e))?;
        let id = conn
            .query_row(
                "SELECT id FROM namespaces WHERE full_path = ?1",
                [full_path],
                |row| row.get(0),
            )
            .map_err(|e| StateError::backend_context("create_namespace: select", e))?;

        if inserted > 0 {
            tracing::debug!(full_path, kind = kind.as_str(), "Created destination namespace");
        }
        Ok(CreateOutcome {
            id,
            created: inserted > 0,
        })
    }

    fn exists(&self, full_path: &str, relation: &str) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM bundles WHERE full_path = ?1 AND relation = ?2) \
             OR EXISTS (SELECT 1 FROM records WHERE full_path = ?1 AND relation = ?2)",
            [full_path, relation],
            |row| row.get(0),
        )
        .map_err(|e| StateError::backend_context("exists", e))
    }

    fn find_record(
        &self,
        full_path: &str,
        relation: &str,
        key: &str,
    ) -> error::Result<Option<Value>> {
        let conn = self.lock_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT data FROM records WHERE full_path = ?1 AND relation = ?2 AND record_key = ?3",
                [full_path, relation, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StateError::backend_context("find_record", e))?;
        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(StateError::from)
    }

    fn save_record(
        &self,
        full_path: &str,
        relation: &str,
        key: &str,
        data: &Value,
    ) -> error::Result<i64> {
        let encoded = serde_json::to_string(data)?;
        let conn = self.lock_conn()?;
        conn.query_row(
            "INSERT INTO records (full_path, relation, record_key, data) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (full_path, relation, record_key) \
             DO UPDATE SET data = excluded.data, updated_at = datetime('now') \
             RETURNING id",
            rusqlite::params![full_path, relation, key, encoded],
            |row| row.get(0),
        )
        .map_err(|e| StateError::backend_context("save_record", e))
    }

    fn list_records(
        &self,
        full_path: &str,
        relation: &str,
        after_id: i64,
        limit: usize,
    ) -> error::Result<Vec<StoredRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, record_key, data FROM records \
                 WHERE full_path = ?1 AND relation = ?2 AND id > ?3 ORDER BY id LIMIT ?4",
            )
            .map_err(|e| StateError::backend_context("list_records: prepare", e))?;
        let rows = stmt
            .query_map(
                rusqlite::params![
                    full_path,
                    relation,
                    after_id,
                    i64::try_from(limit).unwrap_or(i64::MAX)
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .map_err(|e| StateError::backend_context("list_records: query", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StateError::backend_context("list_records: row", e))?;

        rows.into_iter()
            .map(|(id, key, data)| {
                Ok::<_, StateError>(StoredRecord {
                    id,
                    key,
                    data: serde_json::from_str(&data)?,
                })
            })
            .collect()
    }

    fn import_bundle(
        &self,
        full_path: &str,
        relation: &str,
        bundle: &Path,
    ) -> error::Result<BundleInfo> {
        let (sha256, size) = digest_file(bundle)?;
        let stored_path = self.content_dir.join(format!("{sha256}.bundle"));
        if !stored_path.exists() {
            std::fs::copy(bundle, &stored_path)?;
        }

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO bundles (full_path, relation, sha256, size, stored_path) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (full_path, relation) \
             DO UPDATE SET sha256 = excluded.sha256, size = excluded.size, \
             stored_path = excluded.stored_path, imported_at = datetime('now')",
            rusqlite::params![
                full_path,
                relation,
                sha256,
                i64::try_from(size).unwrap_or(i64::MAX),
                stored_path.to_string_lossy(),
            ],
        )
        .map_err(|e| StateError::backend_context("import_bundle", e))?;

        tracing::info!(full_path, relation, size, sha256 = %sha256, "Imported bundle");
        Ok(BundleInfo { size, sha256 })
    }

    fn find_user_by_email(&self, email: &str) -> error::Result<Option<DestinationUserId>> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT id FROM users WHERE email = ?1", [email], |row| row.get(0))
            .optional()
            .map(|id| id.map(DestinationUserId::new))
            .map_err(|e| StateError::backend_context("find_user_by_email", e))
    }
}
