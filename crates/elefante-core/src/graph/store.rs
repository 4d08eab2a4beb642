//! Local graph store: labeled property graph over SQLite
//!
//! Node tables `memory_nodes` / `entity_nodes` / `session_nodes` /
//! `user_nodes` hold scalar columns only; one physical table per
//! relationship type (`rel_relates_to`, ...), generated from the closed
//! `RelType` set. Write-mode mutations take an exclusive flock on the store
//! directory so only one writer exists across cooperating processes;
//! reads never touch the lock.

use std::fs::OpenOptions;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use fs2::FileExt;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use uuid::Uuid;

use super::{
    is_reserved_property, GraphResult, GraphStore, GraphStoreError, LabelMatch, Neighbor,
    NodeTable,
};
use crate::memory::{
    normalize_tags, Entity, Kind, Layer, Memory, Message, RelType, Relationship, Role,
    SessionSummary, Status, StoreCounts, Sublayer,
};

/// How long a mutation waits for the store's exclusive lock
const WRITE_LOCK_TIMEOUT: Duration = Duration::from_millis(2_000);
const WRITE_LOCK_POLL: Duration = Duration::from_millis(25);

/// Every column name used by the schema; checked against the reserved set
/// at schema creation time.
const SCHEMA_COLUMN_NAMES: &[&str] = &[
    "id",
    "title",
    "content",
    "content_hash",
    "memory_layer",
    "memory_sublayer",
    "memory_kind",
    "importance",
    "confidence",
    "created_ms",
    "last_accessed_ms",
    "access_count",
    "decay_rate",
    "reinforcement_factor",
    "memory_status",
    "session_id",
    "tags",
    "supersedes",
    "superseded_by",
    "name",
    "entity_type",
    "props",
    "started_ms",
    "last_message_ms",
    "seq",
    "msg_role",
    "body",
    "ts_ms",
    "from_id",
    "to_id",
    "weight",
];

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memory_nodes (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    memory_layer TEXT NOT NULL,
    memory_sublayer TEXT NOT NULL,
    memory_kind TEXT NOT NULL,
    importance INTEGER NOT NULL,
    confidence REAL NOT NULL,
    created_ms INTEGER NOT NULL,
    last_accessed_ms INTEGER NOT NULL,
    access_count INTEGER NOT NULL,
    decay_rate REAL NOT NULL,
    reinforcement_factor REAL NOT NULL,
    memory_status TEXT NOT NULL,
    session_id TEXT,
    tags TEXT NOT NULL,
    supersedes TEXT,
    superseded_by TEXT
);
CREATE INDEX IF NOT EXISTS idx_memory_title ON memory_nodes(title);
CREATE INDEX IF NOT EXISTS idx_memory_hash ON memory_nodes(content_hash);
CREATE INDEX IF NOT EXISTS idx_memory_status ON memory_nodes(memory_status);
CREATE INDEX IF NOT EXISTS idx_memory_session ON memory_nodes(session_id);

CREATE TABLE IF NOT EXISTS entity_nodes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    props TEXT,
    created_ms INTEGER NOT NULL,
    UNIQUE(name, entity_type)
);
CREATE INDEX IF NOT EXISTS idx_entity_name ON entity_nodes(name);

CREATE TABLE IF NOT EXISTS session_nodes (
    id TEXT PRIMARY KEY,
    started_ms INTEGER NOT NULL,
    last_message_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_nodes (
    id TEXT PRIMARY KEY,
    name TEXT,
    props TEXT,
    created_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    msg_role TEXT NOT NULL,
    body TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    PRIMARY KEY (session_id, seq)
);
"#;

/// Held exclusive lock on the store directory; released on drop
struct DirLock {
    file: std::fs::File,
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Local graph store implementation
///
/// Separate writer/reader connections: mutations go through `writer` under
/// the directory flock; every read (including the caller-facing `query`)
/// goes through `reader`, which is opened read-only with `query_only` set
/// so SQLite itself refuses any mutation smuggled into a query statement.
pub struct LocalGraphStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    lock_path: PathBuf,
}

fn ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn lock<T>(mutex: &Mutex<T>) -> GraphResult<std::sync::MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| GraphStoreError::Unavailable("lock poisoned".to_string()))
}

fn db_err(e: rusqlite::Error) -> GraphStoreError {
    GraphStoreError::WriteFailed(e.to_string())
}

fn read_err(e: rusqlite::Error) -> GraphStoreError {
    GraphStoreError::Unavailable(e.to_string())
}

/// Classify an error surfaced by the caller-facing `query` path: the
/// read-only connection reports attempted mutations as readonly violations,
/// which are a schema-level rejection rather than an outage.
fn query_err(e: rusqlite::Error) -> GraphStoreError {
    let message = e.to_string();
    let readonly = matches!(
        &e,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ReadOnly
    ) || message.contains("readonly");
    if readonly {
        GraphStoreError::SchemaMismatch(
            "statement attempted a mutation on the read-only query connection; \
             use the typed adapter operations for writes"
                .to_string(),
        )
    } else {
        GraphStoreError::Unavailable(message)
    }
}

impl LocalGraphStore {
    /// Open (or create) the store under `dir`
    pub fn open(dir: &Path) -> GraphResult<Self> {
        for column in SCHEMA_COLUMN_NAMES {
            if is_reserved_property(column) {
                return Err(GraphStoreError::ReservedWord {
                    name: (*column).to_string(),
                });
            }
        }

        std::fs::create_dir_all(dir)
            .map_err(|e| GraphStoreError::Unavailable(format!("create {:?}: {}", dir, e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
        }

        let db_path = dir.join("graph.db");
        let writer = Connection::open(&db_path)
            .map_err(|e| GraphStoreError::Unavailable(e.to_string()))?;
        writer
            .execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
            .map_err(|e| GraphStoreError::Unavailable(e.to_string()))?;
        writer
            .execute_batch(SCHEMA)
            .map_err(|e| GraphStoreError::Unavailable(e.to_string()))?;
        for rel in RelType::ALL {
            let table = rel.table_name();
            writer
                .execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                         from_id TEXT NOT NULL,
                         to_id TEXT NOT NULL,
                         weight REAL NOT NULL DEFAULT 1.0,
                         props TEXT,
                         created_ms INTEGER NOT NULL,
                         PRIMARY KEY (from_id, to_id)
                     );
                     CREATE INDEX IF NOT EXISTS idx_{table}_to ON {table}(to_id);"
                ))
                .map_err(|e| GraphStoreError::Unavailable(e.to_string()))?;
        }

        // The reader cannot write even in principle: read-only open flags
        // plus query_only, so a mutation hidden behind a CTE fails inside
        // SQLite rather than depending on statement inspection.
        let reader = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| GraphStoreError::Unavailable(e.to_string()))?;
        reader
            .execute_batch(
                "PRAGMA query_only = ON;
                 PRAGMA busy_timeout = 5000;",
            )
            .map_err(|e| GraphStoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            lock_path: dir.join("store.lock"),
        })
    }

    /// Take the store's exclusive write lock, waiting up to the timeout.
    /// The holder's pid and acquisition time are recorded in the lock file
    /// so contenders can report who is blocking them.
    fn write_guard(&self) -> GraphResult<DirLock> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| GraphStoreError::Unavailable(e.to_string()))?;

        let deadline = Instant::now() + WRITE_LOCK_TIMEOUT;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(_) if Instant::now() < deadline => std::thread::sleep(WRITE_LOCK_POLL),
                Err(_) => {
                    let mut raw = String::new();
                    let _ = file.rewind();
                    let _ = file.read_to_string(&mut raw);
                    let holder: serde_json::Value =
                        serde_json::from_str(&raw).unwrap_or_default();
                    return Err(GraphStoreError::LockHeld {
                        pid: holder["pid"].as_u64().unwrap_or(0) as u32,
                        ts_ms: holder["ts_ms"].as_i64().unwrap_or(0),
                    });
                }
            }
        }

        let record = serde_json::json!({
            "pid": std::process::id(),
            "ts_ms": Utc::now().timestamp_millis(),
        });
        let _ = file.set_len(0);
        let _ = file.rewind();
        let _ = file.write_all(record.to_string().as_bytes());
        Ok(DirLock { file })
    }

    /// Whether any node table contains `id`
    fn node_exists(&self, conn: &Connection, id: &str) -> GraphResult<bool> {
        conn.query_row(
            "SELECT 1 WHERE EXISTS (SELECT 1 FROM memory_nodes WHERE id = ?1)
                OR EXISTS (SELECT 1 FROM entity_nodes WHERE id = ?1)
                OR EXISTS (SELECT 1 FROM session_nodes WHERE id = ?1)
                OR EXISTS (SELECT 1 FROM user_nodes WHERE id = ?1)",
            params![id],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(read_err)
    }

    fn node_table(&self, conn: &Connection, id: &str) -> GraphResult<Option<NodeTable>> {
        for (table, kind) in [
            ("memory_nodes", NodeTable::Memory),
            ("entity_nodes", NodeTable::Entity),
            ("session_nodes", NodeTable::Session),
            ("user_nodes", NodeTable::User),
        ] {
            let found: Option<()> = conn
                .query_row(
                    &format!("SELECT 1 FROM {table} WHERE id = ?1"),
                    params![id],
                    |_| Ok(()),
                )
                .optional()
                .map_err(read_err)?;
            if found.is_some() {
                return Ok(Some(kind));
            }
        }
        Ok(None)
    }
}

fn memory_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRow> {
    Ok(MemoryRow {
        id: row.get("id")?,
        title: row.get("title")?,
        content: row.get("content")?,
        content_hash: row.get("content_hash")?,
        layer: row.get("memory_layer")?,
        sublayer: row.get("memory_sublayer")?,
        kind: row.get("memory_kind")?,
        importance: row.get("importance")?,
        confidence: row.get("confidence")?,
        created_ms: row.get("created_ms")?,
        last_accessed_ms: row.get("last_accessed_ms")?,
        access_count: row.get("access_count")?,
        decay_rate: row.get("decay_rate")?,
        reinforcement_factor: row.get("reinforcement_factor")?,
        status: row.get("memory_status")?,
        session_id: row.get("session_id")?,
        tags: row.get("tags")?,
        supersedes: row.get("supersedes")?,
        superseded_by: row.get("superseded_by")?,
    })
}

struct MemoryRow {
    id: String,
    title: String,
    content: String,
    content_hash: String,
    layer: String,
    sublayer: String,
    kind: String,
    importance: i64,
    confidence: f64,
    created_ms: i64,
    last_accessed_ms: i64,
    access_count: i64,
    decay_rate: f64,
    reinforcement_factor: f64,
    status: String,
    session_id: Option<String>,
    tags: String,
    supersedes: Option<String>,
    superseded_by: Option<String>,
}

impl MemoryRow {
    fn into_memory(self) -> GraphResult<Memory> {
        let row_id = self.id.clone();
        let corrupt = move |reason: String| GraphStoreError::Corrupt {
            id: row_id.clone(),
            reason,
        };
        Ok(Memory {
            layer: Layer::parse(&self.layer)
                .ok_or_else(|| corrupt(format!("bad layer '{}'", self.layer)))?,
            sublayer: Sublayer::parse(&self.sublayer)
                .ok_or_else(|| corrupt(format!("bad sublayer '{}'", self.sublayer)))?,
            kind: Kind::parse(&self.kind)
                .ok_or_else(|| corrupt(format!("bad kind '{}'", self.kind)))?,
            status: Status::parse(&self.status)
                .ok_or_else(|| corrupt(format!("bad status '{}'", self.status)))?,
            id: self.id,
            title: self.title,
            content: self.content,
            content_hash: self.content_hash,
            importance: self.importance.clamp(1, 10) as u8,
            confidence: self.confidence as f32,
            created_at: from_ms(self.created_ms),
            last_accessed_at: from_ms(self.last_accessed_ms),
            access_count: self.access_count,
            decay_rate: self.decay_rate,
            reinforcement_factor: self.reinforcement_factor,
            session_id: self.session_id,
            tags: normalize_tags(self.tags.split(',').filter(|t| !t.is_empty())),
            supersedes: self.supersedes,
            superseded_by: self.superseded_by,
        })
    }
}

const MEMORY_COLUMNS: &str = "id, title, content, content_hash, memory_layer, memory_sublayer, \
     memory_kind, importance, confidence, created_ms, last_accessed_ms, access_count, \
     decay_rate, reinforcement_factor, memory_status, session_id, tags, supersedes, superseded_by";

impl GraphStore for LocalGraphStore {
    fn upsert_memory(&self, memory: &Memory) -> GraphResult<()> {
        let _guard = self.write_guard()?;
        let conn = lock(&self.writer)?;
        conn.execute(
            &format!(
                "INSERT INTO memory_nodes ({MEMORY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     content = excluded.content,
                     content_hash = excluded.content_hash,
                     memory_layer = excluded.memory_layer,
                     memory_sublayer = excluded.memory_sublayer,
                     memory_kind = excluded.memory_kind,
                     importance = excluded.importance,
                     confidence = excluded.confidence,
                     created_ms = excluded.created_ms,
                     last_accessed_ms = excluded.last_accessed_ms,
                     access_count = excluded.access_count,
                     decay_rate = excluded.decay_rate,
                     reinforcement_factor = excluded.reinforcement_factor,
                     memory_status = excluded.memory_status,
                     session_id = excluded.session_id,
                     tags = excluded.tags,
                     supersedes = excluded.supersedes,
                     superseded_by = excluded.superseded_by"
            ),
            params![
                memory.id,
                memory.title,
                memory.content,
                memory.content_hash,
                memory.layer.as_str(),
                memory.sublayer.as_str(),
                memory.kind.as_str(),
                i64::from(memory.importance),
                f64::from(memory.confidence),
                ms(memory.created_at),
                ms(memory.last_accessed_at),
                memory.access_count,
                memory.decay_rate,
                memory.reinforcement_factor,
                memory.status.as_str(),
                memory.session_id,
                memory.tags.join(","),
                memory.supersedes,
                memory.superseded_by,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn memory(&self, id: &str) -> GraphResult<Option<Memory>> {
        let conn = lock(&self.reader)?;
        let row = conn
            .query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memory_nodes WHERE id = ?1"),
                params![id],
                memory_from_row,
            )
            .optional()
            .map_err(read_err)?;
        row.map(MemoryRow::into_memory).transpose()
    }

    fn memory_by_title(&self, title: &str, status: Status) -> GraphResult<Option<Memory>> {
        let conn = lock(&self.reader)?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {MEMORY_COLUMNS} FROM memory_nodes
                     WHERE title = ?1 AND memory_status = ?2
                     ORDER BY created_ms ASC LIMIT 1"
                ),
                params![title, status.as_str()],
                memory_from_row,
            )
            .optional()
            .map_err(read_err)?;
        row.map(MemoryRow::into_memory).transpose()
    }

    fn memory_by_hash(&self, content_hash: &str, status: Status) -> GraphResult<Option<Memory>> {
        let conn = lock(&self.reader)?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {MEMORY_COLUMNS} FROM memory_nodes
                     WHERE content_hash = ?1 AND memory_status = ?2
                     ORDER BY created_ms ASC LIMIT 1"
                ),
                params![content_hash, status.as_str()],
                memory_from_row,
            )
            .optional()
            .map_err(read_err)?;
        row.map(MemoryRow::into_memory).transpose()
    }

    fn memories_with_status(&self, status: Status) -> GraphResult<Vec<Memory>> {
        let conn = lock(&self.reader)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MEMORY_COLUMNS} FROM memory_nodes
                 WHERE memory_status = ?1 ORDER BY created_ms ASC, id ASC"
            ))
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![status.as_str()], memory_from_row)
            .map_err(read_err)?;
        let mut memories = Vec::new();
        for row in rows {
            memories.push(row.map_err(read_err)?.into_memory()?);
        }
        Ok(memories)
    }

    fn delete_memory(&self, id: &str) -> GraphResult<bool> {
        let _guard = self.write_guard()?;
        let conn = lock(&self.writer)?;
        let changed = conn
            .execute("DELETE FROM memory_nodes WHERE id = ?1", params![id])
            .map_err(db_err)?;
        for rel in RelType::ALL {
            let table = rel.table_name();
            conn.execute(
                &format!("DELETE FROM {table} WHERE from_id = ?1 OR to_id = ?1"),
                params![id],
            )
            .map_err(db_err)?;
        }
        Ok(changed > 0)
    }

    fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        props: Option<&str>,
    ) -> GraphResult<String> {
        let _guard = self.write_guard()?;
        let conn = lock(&self.writer)?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM entity_nodes WHERE name = ?1 AND entity_type = ?2",
                params![name, entity_type],
                |row| row.get(0),
            )
            .optional()
            .map_err(read_err)?;

        if let Some(id) = existing {
            if props.is_some() {
                conn.execute(
                    "UPDATE entity_nodes SET props = ?1 WHERE id = ?2",
                    params![props, id],
                )
                .map_err(db_err)?;
            }
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO entity_nodes (id, name, entity_type, props, created_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, entity_type, props, ms(Utc::now())],
        )
        .map_err(db_err)?;
        Ok(id)
    }

    fn entity(&self, id: &str) -> GraphResult<Option<Entity>> {
        let conn = lock(&self.reader)?;
        conn.query_row(
            "SELECT id, name, entity_type, props, created_ms FROM entity_nodes WHERE id = ?1",
            params![id],
            |row| {
                Ok(Entity {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    entity_type: row.get(2)?,
                    props: row.get(3)?,
                    created_at: from_ms(row.get(4)?),
                })
            },
        )
        .optional()
        .map_err(read_err)
    }

    fn upsert_session(&self, session_id: &str, at: DateTime<Utc>) -> GraphResult<()> {
        let _guard = self.write_guard()?;
        let conn = lock(&self.writer)?;
        conn.execute(
            "INSERT INTO session_nodes (id, started_ms, last_message_ms)
             VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO UPDATE SET
                 last_message_ms = MAX(last_message_ms, excluded.last_message_ms)",
            params![session_id, ms(at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn append_message(&self, message: &Message) -> GraphResult<()> {
        let _guard = self.write_guard()?;
        let conn = lock(&self.writer)?;
        conn.execute(
            "INSERT INTO session_nodes (id, started_ms, last_message_ms)
             VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO UPDATE SET
                 last_message_ms = MAX(last_message_ms, excluded.last_message_ms)",
            params![message.session_id, ms(message.timestamp)],
        )
        .map_err(db_err)?;
        conn.execute(
            "INSERT INTO messages (session_id, seq, msg_role, body, ts_ms)
             VALUES (
                 ?1,
                 (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?1),
                 ?2, ?3, ?4
             )",
            params![
                message.session_id,
                message.role.as_str(),
                message.text,
                ms(message.timestamp)
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn recent_messages(&self, session_id: &str, n: usize) -> GraphResult<Vec<Message>> {
        let conn = lock(&self.reader)?;
        let mut stmt = conn
            .prepare(
                "SELECT msg_role, body, ts_ms FROM messages
                 WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![session_id, n as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(read_err)?;

        let mut messages = Vec::new();
        for row in rows {
            let (role_raw, body, ts_ms) = row.map_err(read_err)?;
            let role = Role::parse(&role_raw).ok_or_else(|| GraphStoreError::Corrupt {
                id: session_id.to_string(),
                reason: format!("bad message role '{}'", role_raw),
            })?;
            messages.push(Message {
                session_id: session_id.to_string(),
                role,
                text: body,
                timestamp: from_ms(ts_ms),
            });
        }
        messages.reverse();
        Ok(messages)
    }

    fn sessions(&self, offset: usize, limit: usize) -> GraphResult<Vec<SessionSummary>> {
        let conn = lock(&self.reader)?;
        let mut stmt = conn
            .prepare(
                "SELECT s.id, s.started_ms, s.last_message_ms,
                        (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id),
                        (SELECT COUNT(*) FROM rel_part_of p WHERE p.to_id = s.id)
                 FROM session_nodes s
                 ORDER BY s.last_message_ms DESC, s.id ASC
                 LIMIT ?1 OFFSET ?2",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                Ok(SessionSummary {
                    id: row.get(0)?,
                    started_at: from_ms(row.get(1)?),
                    last_message_at: from_ms(row.get(2)?),
                    message_count: row.get(3)?,
                    memory_count: row.get(4)?,
                })
            })
            .map_err(read_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
    }

    fn session_memory_ids(&self, session_id: &str) -> GraphResult<Vec<String>> {
        let conn = lock(&self.reader)?;
        let mut stmt = conn
            .prepare(
                "SELECT from_id FROM rel_part_of WHERE to_id = ?1 ORDER BY created_ms ASC",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))
            .map_err(read_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
    }

    fn upsert_edge(&self, relationship: &Relationship) -> GraphResult<()> {
        let _guard = self.write_guard()?;
        let conn = lock(&self.writer)?;
        for endpoint in [&relationship.from_id, &relationship.to_id] {
            if !self.node_exists(&conn, endpoint)? {
                return Err(GraphStoreError::EndpointMissing {
                    id: endpoint.clone(),
                });
            }
        }

        let table = relationship.rel_type.table_name();
        conn.execute(
            &format!(
                "INSERT INTO {table} (from_id, to_id, weight, props, created_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(from_id, to_id) DO UPDATE SET
                     weight = excluded.weight,
                     props = COALESCE(excluded.props, props)"
            ),
            params![
                relationship.from_id,
                relationship.to_id,
                relationship.weight.unwrap_or(1.0),
                relationship.props,
                ms(relationship.created_at)
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn edges_from(&self, id: &str) -> GraphResult<Vec<Relationship>> {
        let conn = lock(&self.reader)?;
        let mut edges = Vec::new();
        for rel in RelType::ALL {
            let table = rel.table_name();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT from_id, to_id, weight, props, created_ms FROM {table}
                     WHERE from_id = ?1"
                ))
                .map_err(read_err)?;
            let rows = stmt
                .query_map(params![id], |row| {
                    Ok(Relationship {
                        from_id: row.get(0)?,
                        to_id: row.get(1)?,
                        rel_type: *rel,
                        weight: row.get(2)?,
                        props: row.get(3)?,
                        created_at: from_ms(row.get(4)?),
                    })
                })
                .map_err(read_err)?;
            for row in rows {
                edges.push(row.map_err(read_err)?);
            }
        }
        Ok(edges)
    }

    fn find_by_label(&self, needle: &str, k: usize) -> GraphResult<Vec<LabelMatch>> {
        let conn = lock(&self.reader)?;
        let prefix = format!("{}%", escape_like(needle));
        let mut matches = Vec::new();

        for (table, node_table, label_column) in [
            ("entity_nodes", NodeTable::Entity, "name"),
            ("memory_nodes", NodeTable::Memory, "title"),
        ] {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id, {label_column} FROM {table}
                     WHERE {label_column} = ?1
                        OR {label_column} LIKE ?2 ESCAPE '\\'
                     ORDER BY ({label_column} = ?1) DESC, {label_column} ASC, id ASC
                     LIMIT ?3"
                ))
                .map_err(read_err)?;
            let rows = stmt
                .query_map(params![needle, prefix, k as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(read_err)?;
            for row in rows {
                let (id, entity_label) = row.map_err(read_err)?;
                let exact = entity_label == needle;
                matches.push(LabelMatch {
                    id,
                    entity_label,
                    table: node_table,
                    exact,
                });
            }
        }

        matches.sort_by(|a, b| {
            b.exact
                .cmp(&a.exact)
                .then_with(|| a.entity_label.cmp(&b.entity_label))
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    fn neighborhood(&self, id: &str, depth: u8, limit: usize) -> GraphResult<Vec<Neighbor>> {
        let depth = depth.clamp(1, 2);
        let conn = lock(&self.reader)?;

        let mut visited: std::collections::HashSet<String> = std::collections::HashSet::new();
        visited.insert(id.to_string());
        let mut frontier = vec![id.to_string()];
        let mut neighbors: Vec<Neighbor> = Vec::new();

        for hop in 1..=depth {
            let mut next_frontier = Vec::new();
            for origin in &frontier {
                for rel in RelType::ALL {
                    let table = rel.table_name();
                    let mut stmt = conn
                        .prepare(&format!(
                            "SELECT to_id, weight FROM {table} WHERE from_id = ?1
                             UNION ALL
                             SELECT from_id, weight FROM {table} WHERE to_id = ?1"
                        ))
                        .map_err(read_err)?;
                    let rows = stmt
                        .query_map(params![origin], |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                        })
                        .map_err(read_err)?;
                    for row in rows {
                        let (other, weight) = row.map_err(read_err)?;
                        if !visited.insert(other.clone()) {
                            continue;
                        }
                        let Some(table_kind) = self.node_table(&conn, &other)? else {
                            continue;
                        };
                        neighbors.push(Neighbor {
                            id: other.clone(),
                            table: table_kind,
                            rel_type: rel.as_str().to_string(),
                            weight,
                            distance: hop,
                        });
                        next_frontier.push(other);
                        if neighbors.len() >= limit {
                            return Ok(neighbors);
                        }
                    }
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }
        Ok(neighbors)
    }

    fn query(
        &self,
        statement: &str,
        params: &[serde_json::Value],
    ) -> GraphResult<Vec<serde_json::Map<String, serde_json::Value>>> {
        let trimmed = statement.trim().trim_end_matches(';').trim();
        if trimmed.is_empty() {
            return Err(GraphStoreError::SchemaMismatch(
                "empty statement".to_string(),
            ));
        }
        if trimmed.contains(';') {
            return Err(GraphStoreError::SchemaMismatch(
                "multiple statements are not accepted".to_string(),
            ));
        }

        let bound: Vec<rusqlite::types::Value> = params.iter().map(json_to_sql).collect();

        // Enforcement is the connection itself (read-only open + query_only),
        // not statement inspection: a DELETE, or a mutation hidden behind a
        // leading CTE, fails inside SQLite with a readonly error.
        let conn = lock(&self.reader)?;
        let mut stmt = conn.prepare(trimmed).map_err(query_err)?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt
            .query(params_from_iter(bound.iter()))
            .map_err(query_err)?;

        let mut output = Vec::new();
        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(query_err(e)),
            };
            let mut object = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                object.insert(name.clone(), sql_to_json(row.get_ref(i).map_err(read_err)?));
            }
            output.push(object);
        }
        Ok(output)
    }

    fn counts(&self) -> GraphResult<StoreCounts> {
        let conn = lock(&self.reader)?;
        let mut counts = StoreCounts::default();

        let mut stmt = conn
            .prepare("SELECT memory_status, COUNT(*) FROM memory_nodes GROUP BY memory_status")
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(read_err)?;
        for row in rows {
            let (status, n) = row.map_err(read_err)?;
            counts.memories_total += n;
            match Status::parse(&status) {
                Some(Status::Active) => counts.memories_active = n,
                Some(Status::Redundant) => counts.memories_redundant = n,
                Some(Status::Archived) => counts.memories_archived = n,
                Some(Status::Superseded) => counts.memories_superseded = n,
                _ => {}
            }
        }
        drop(stmt);

        counts.entities = conn
            .query_row("SELECT COUNT(*) FROM entity_nodes", [], |row| row.get(0))
            .map_err(read_err)?;
        counts.sessions = conn
            .query_row("SELECT COUNT(*) FROM session_nodes", [], |row| row.get(0))
            .map_err(read_err)?;
        for rel in RelType::ALL {
            let n: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", rel.table_name()),
                    [],
                    |row| row.get(0),
                )
                .map_err(read_err)?;
            counts.relationships += n;
        }
        Ok(counts)
    }

    fn export_snapshot(&self) -> GraphResult<serde_json::Value> {
        let memories: Vec<Memory> = {
            let conn = lock(&self.reader)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {MEMORY_COLUMNS} FROM memory_nodes ORDER BY created_ms ASC, id ASC"
                ))
                .map_err(read_err)?;
            let rows = stmt.query_map([], memory_from_row).map_err(read_err)?;
            let mut memories = Vec::new();
            for row in rows {
                memories.push(row.map_err(read_err)?.into_memory()?);
            }
            memories
        };

        let conn = lock(&self.reader)?;
        let mut entities = Vec::new();
        let mut stmt = conn
            .prepare("SELECT id, name, entity_type, props, created_ms FROM entity_nodes ORDER BY id")
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(serde_json::json!({
                    "id": row.get::<_, String>(0)?,
                    "name": row.get::<_, String>(1)?,
                    "entity_type": row.get::<_, String>(2)?,
                    "props": row.get::<_, Option<String>>(3)?,
                    "created_ms": row.get::<_, i64>(4)?,
                }))
            })
            .map_err(read_err)?;
        for row in rows {
            entities.push(row.map_err(read_err)?);
        }
        drop(stmt);

        let mut relationships = serde_json::Map::new();
        for rel in RelType::ALL {
            let table = rel.table_name();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT from_id, to_id, weight, props, created_ms FROM {table}
                     ORDER BY from_id, to_id"
                ))
                .map_err(read_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(serde_json::json!({
                        "from_id": row.get::<_, String>(0)?,
                        "to_id": row.get::<_, String>(1)?,
                        "weight": row.get::<_, f64>(2)?,
                        "props": row.get::<_, Option<String>>(3)?,
                        "created_ms": row.get::<_, i64>(4)?,
                    }))
                })
                .map_err(read_err)?;
            let mut edges = Vec::new();
            for row in rows {
                edges.push(row.map_err(read_err)?);
            }
            if !edges.is_empty() {
                relationships.insert(rel.as_str().to_string(), serde_json::Value::Array(edges));
            }
        }

        Ok(serde_json::json!({
            "exported_ms": ms(Utc::now()),
            "memories": memories,
            "entities": entities,
            "relationships": relationships,
        }))
    }
}

fn json_to_sql(value: &serde_json::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    use serde_json::Value as Json;
    match value {
        Json::Null => Sql::Null,
        Json::Bool(b) => Sql::Integer(i64::from(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn sql_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::json!(i),
        ValueRef::Real(f) => serde_json::json!(f),
        ValueRef::Text(t) => serde_json::json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => serde_json::json!(format!("blob:{}b", b.len())),
    }
}

// ============================================================================
// TESTS
// ============================================================================
