//! Local vector store: HNSW index over a SQLite record table
//!
//! Vectors live in a usearch HNSW index (cosine metric, f32 scalars) keyed
//! by a monotonically increasing integer; the authoritative record (content,
//! embedding bytes, flat metadata) lives in `records.db`. The index is
//! rebuilt from the table at open.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::{
    memory_from_parts, Metadata, VectorQueryHit, VectorRecord, VectorResult, VectorStore,
    VectorStoreError,
};
use crate::embeddings::{embedding_from_bytes, embedding_to_bytes};
use crate::memory::MemoryFilter;

/// HNSW connectivity parameter
const CONNECTIVITY: usize = 16;
/// HNSW expansion factor for index building
const EXPANSION_ADD: usize = 128;
/// HNSW expansion factor for search
const EXPANSION_SEARCH: usize = 64;
/// How far the ANN over-fetches when a filter will drop candidates
const FILTER_OVERFETCH: usize = 4;

/// Local vector store implementation
pub struct LocalVectorStore {
    conn: Mutex<Connection>,
    index: Mutex<Index>,
    key_to_id: Mutex<HashMap<u64, String>>,
    dimensions: usize,
    next_key: Mutex<u64>,
    /// Highest vec_key already loaded into the HNSW index; rows above it
    /// (written by other processes) are folded in before each query
    max_loaded_key: Mutex<u64>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vector_records (
    id TEXT PRIMARY KEY,
    vec_key INTEGER NOT NULL UNIQUE,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    dim INTEGER NOT NULL,
    metadata TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vector_records_key ON vector_records(vec_key);
"#;

impl LocalVectorStore {
    /// Open (or create) the store under `dir`
    pub fn open(dir: &Path, dimensions: usize) -> VectorResult<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| VectorStoreError::Unavailable(format!("create {:?}: {}", dir, e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
        }

        let conn = Connection::open(dir.join("records.db"))
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        let index = new_index(dimensions)?;

        let store = Self {
            conn: Mutex::new(conn),
            index: Mutex::new(index),
            key_to_id: Mutex::new(HashMap::new()),
            dimensions,
            next_key: Mutex::new(1),
            max_loaded_key: Mutex::new(0),
        };
        store.rebuild_index()?;
        Ok(store)
    }

    /// Fold in rows another process committed since our last load, so an
    /// ingestion committed before a read begins is visible to that read.
    fn load_new_rows(&self) -> VectorResult<()> {
        let since = *lock(&self.max_loaded_key)?;
        let rows: Vec<(String, u64, Vec<u8>, i64)> = {
            let conn = lock(&self.conn)?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, vec_key, embedding, dim FROM vector_records
                     WHERE vec_key > ?1 ORDER BY vec_key",
                )
                .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
            let mapped = stmt
                .query_map(params![since as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)? as u64,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
            mapped.filter_map(|r| r.ok()).collect()
        };
        if rows.is_empty() {
            return Ok(());
        }

        let index = lock(&self.index)?;
        let mut key_map = lock(&self.key_to_id)?;
        let mut max_key = since;
        for (id, key, bytes, dim) in rows {
            max_key = max_key.max(key);
            if key_map.contains_key(&key) {
                continue;
            }
            if dim as usize != self.dimensions {
                continue;
            }
            let Some(vector) = embedding_from_bytes(&bytes) else {
                continue;
            };
            if index.size() >= index.capacity() {
                reserve(&index, (index.capacity() * 2).max(16))?;
            }
            if index.add(key, &vector).is_ok() {
                key_map.insert(key, id);
            }
        }
        drop(index);
        drop(key_map);

        let mut loaded = lock(&self.max_loaded_key)?;
        *loaded = (*loaded).max(max_key);
        let mut next = lock(&self.next_key)?;
        *next = (*next).max(max_key + 1);
        Ok(())
    }

    /// Re-populate the HNSW index from the record table. Records whose
    /// stored dimension no longer matches are skipped and logged; the next
    /// consolidation pass reports them.
    fn rebuild_index(&self) -> VectorResult<()> {
        let rows: Vec<(String, u64, Vec<u8>, i64)> = {
            let conn = lock(&self.conn)?;
            let mut stmt = conn
                .prepare("SELECT id, vec_key, embedding, dim FROM vector_records")
                .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
            let mapped = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)? as u64,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
            mapped
                .filter_map(|r| r.ok())
                .collect()
        };

        let index = lock(&self.index)?;
        let mut key_map = lock(&self.key_to_id)?;
        let mut max_key = 0u64;

        reserve(&index, rows.len().max(16))?;
        for (id, key, bytes, dim) in rows {
            max_key = max_key.max(key);
            if dim as usize != self.dimensions {
                tracing::warn!(
                    id = %id,
                    stored_dim = dim,
                    expected = self.dimensions,
                    "skipping vector record with stale dimension"
                );
                continue;
            }
            let Some(vector) = embedding_from_bytes(&bytes) else {
                tracing::warn!(id = %id, "skipping undecodable embedding");
                continue;
            };
            if let Err(e) = index.add(key, &vector) {
                tracing::warn!(id = %id, "failed to load embedding: {}", e);
                continue;
            }
            key_map.insert(key, id);
        }

        *lock(&self.next_key)? = max_key + 1;
        *lock(&self.max_loaded_key)? = max_key;
        Ok(())
    }
}

fn new_index(dimensions: usize) -> VectorResult<Index> {
    let options = IndexOptions {
        dimensions,
        metric: MetricKind::Cos,
        quantization: ScalarKind::F32,
        connectivity: CONNECTIVITY,
        expansion_add: EXPANSION_ADD,
        expansion_search: EXPANSION_SEARCH,
        multi: false,
    };
    Index::new(&options).map_err(|e| VectorStoreError::Unavailable(e.to_string()))
}

fn reserve(index: &Index, capacity: usize) -> VectorResult<()> {
    index
        .reserve(capacity)
        .map_err(|e| VectorStoreError::WriteFailed(format!("reserve: {}", e)))
}

fn lock<T>(mutex: &Mutex<T>) -> VectorResult<std::sync::MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| VectorStoreError::Unavailable("lock poisoned".to_string()))
}

fn decode_metadata(id: &str, raw: &str) -> VectorResult<Metadata> {
    serde_json::from_str(raw).map_err(|e| VectorStoreError::Corrupt {
        id: id.to_string(),
        reason: format!("metadata: {}", e),
    })
}

impl VectorStore for LocalVectorStore {
    fn upsert(&self, record: &VectorRecord) -> VectorResult<()> {
        if record.embedding.len() != self.dimensions {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimensions,
                got: record.embedding.len(),
            });
        }

        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| VectorStoreError::WriteFailed(e.to_string()))?;
        let bytes = embedding_to_bytes(&record.embedding);

        let conn = lock(&self.conn)?;
        let existing_key: Option<u64> = conn
            .query_row(
                "SELECT vec_key FROM vector_records WHERE id = ?1",
                params![record.id],
                |row| row.get::<_, i64>(0).map(|v| v as u64),
            )
            .optional()
            .map_err(|e| VectorStoreError::WriteFailed(e.to_string()))?;

        let key = match existing_key {
            Some(key) => key,
            None => {
                let mut next = lock(&self.next_key)?;
                let key = *next;
                *next += 1;
                key
            }
        };

        conn.execute(
            "INSERT INTO vector_records (id, vec_key, content, embedding, dim, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 content = excluded.content,
                 embedding = excluded.embedding,
                 dim = excluded.dim,
                 metadata = excluded.metadata",
            params![
                record.id,
                key as i64,
                record.content,
                bytes,
                self.dimensions as i64,
                metadata_json
            ],
        )
        .map_err(|e| VectorStoreError::WriteFailed(e.to_string()))?;
        drop(conn);

        let index = lock(&self.index)?;
        if existing_key.is_some() {
            index
                .remove(key)
                .map_err(|e| VectorStoreError::WriteFailed(e.to_string()))?;
        }
        if index.size() >= index.capacity() {
            reserve(&index, (index.capacity() * 2).max(16))?;
        }
        index
            .add(key, &record.embedding)
            .map_err(|e| VectorStoreError::WriteFailed(e.to_string()))?;
        drop(index);

        lock(&self.key_to_id)?.insert(key, record.id.clone());
        let mut loaded = lock(&self.max_loaded_key)?;
        *loaded = (*loaded).max(key);
        Ok(())
    }

    fn update_metadata(&self, id: &str, metadata: &Metadata) -> VectorResult<bool> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| VectorStoreError::WriteFailed(e.to_string()))?;
        let conn = lock(&self.conn)?;
        let changed = conn
            .execute(
                "UPDATE vector_records SET metadata = ?1 WHERE id = ?2",
                params![metadata_json, id],
            )
            .map_err(|e| VectorStoreError::WriteFailed(e.to_string()))?;
        Ok(changed > 0)
    }

    fn delete(&self, id: &str) -> VectorResult<bool> {
        let conn = lock(&self.conn)?;
        let key: Option<u64> = conn
            .query_row(
                "SELECT vec_key FROM vector_records WHERE id = ?1",
                params![id],
                |row| row.get::<_, i64>(0).map(|v| v as u64),
            )
            .optional()
            .map_err(|e| VectorStoreError::WriteFailed(e.to_string()))?;

        let Some(key) = key else {
            return Ok(false);
        };

        conn.execute("DELETE FROM vector_records WHERE id = ?1", params![id])
            .map_err(|e| VectorStoreError::WriteFailed(e.to_string()))?;
        drop(conn);

        let index = lock(&self.index)?;
        if let Err(e) = index.remove(key) {
            tracing::warn!(id = %id, "index removal failed: {}", e);
        }
        drop(index);
        lock(&self.key_to_id)?.remove(&key);
        Ok(true)
    }

    fn get(&self, id: &str) -> VectorResult<Option<VectorRecord>> {
        let conn = lock(&self.conn)?;
        let row: Option<(String, Vec<u8>, String)> = conn
            .query_row(
                "SELECT content, embedding, metadata FROM vector_records WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        let Some((content, bytes, metadata_json)) = row else {
            return Ok(None);
        };
        let embedding = embedding_from_bytes(&bytes).ok_or_else(|| VectorStoreError::Corrupt {
            id: id.to_string(),
            reason: "undecodable embedding".to_string(),
        })?;
        Ok(Some(VectorRecord {
            id: id.to_string(),
            embedding,
            content,
            metadata: decode_metadata(id, &metadata_json)?,
        }))
    }

    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MemoryFilter>,
    ) -> VectorResult<Vec<VectorQueryHit>> {
        if embedding.len() != self.dimensions {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }
        if k == 0 {
            return Ok(vec![]);
        }
        self.load_new_rows()?;

        let fetch = if filter.is_some() { k * FILTER_OVERFETCH } else { k };
        let matches = {
            let index = lock(&self.index)?;
            if index.size() == 0 {
                return Ok(vec![]);
            }
            index
                .search(embedding, fetch)
                .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?
        };

        let key_map = lock(&self.key_to_id)?;
        let mut hits = Vec::with_capacity(k);
        let conn = lock(&self.conn)?;
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            let Some(id) = key_map.get(key) else {
                continue;
            };
            let similarity = (1.0 - distance).clamp(0.0, 1.0);

            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT content, metadata FROM vector_records WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
            let Some((content, metadata_json)) = row else {
                continue;
            };
            let metadata = decode_metadata(id, &metadata_json)?;

            if let Some(filter) = filter {
                match memory_from_parts(id, &content, &metadata) {
                    Ok(memory) if filter.matches(&memory) => {}
                    _ => continue,
                }
            }

            hits.push(VectorQueryHit {
                id: id.clone(),
                similarity,
                content,
                metadata,
            });
            if hits.len() == k {
                break;
            }
        }
        Ok(hits)
    }

    fn get_all(&self, offset: usize, limit: usize) -> VectorResult<Vec<VectorRecord>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, content, embedding, metadata FROM vector_records
                 ORDER BY vec_key LIMIT ?1 OFFSET ?2",
            )
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, content, bytes, metadata_json) =
                row.map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
            let embedding =
                embedding_from_bytes(&bytes).ok_or_else(|| VectorStoreError::Corrupt {
                    id: id.clone(),
                    reason: "undecodable embedding".to_string(),
                })?;
            let metadata = decode_metadata(&id, &metadata_json)?;
            records.push(VectorRecord {
                id,
                embedding,
                content,
                metadata,
            });
        }
        Ok(records)
    }

    fn count(&self) -> VectorResult<i64> {
        let conn = lock(&self.conn)?;
        conn.query_row("SELECT COUNT(*) FROM vector_records", [], |row| row.get(0))
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{Embedder, HashEmbedder};
    use crate::memory::{content_hash, Kind, Layer, Memory, Status, Sublayer};
    use crate::vector::memory_to_metadata;
    use chrono::Utc;
    use tempfile::TempDir;

    const DIM: usize = 64;

    fn store() -> (LocalVectorStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LocalVectorStore::open(dir.path(), DIM).unwrap();
        (store, dir)
    }

    fn record(id: &str, content: &str) -> VectorRecord {
        let embedder = HashEmbedder::new(DIM);
        let now = Utc::now();
        let memory = Memory {
            id: id.into(),
            content: content.into(),
            title: format!("T-{}", id),
            content_hash: content_hash(content),
            layer: Layer::World,
            sublayer: Sublayer::Fact,
            kind: Kind::Note,
            importance: 5,
            confidence: 0.7,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            decay_rate: 0.01,
            reinforcement_factor: 0.1,
            status: Status::Active,
            session_id: None,
            tags: vec![],
            supersedes: None,
            superseded_by: None,
        };
        VectorRecord {
            id: id.into(),
            embedding: embedder.embed(content).unwrap(),
            content: content.into(),
            metadata: memory_to_metadata(&memory),
        }
    }

    #[test]
    fn test_upsert_get_roundtrip() {
        let (store, _dir) = store();
        let rec = record("a", "rust ownership rules");
        store.upsert(&rec).unwrap();

        let loaded = store.get("a").unwrap().unwrap();
        assert_eq!(loaded.content, "rust ownership rules");
        assert_eq!(loaded.embedding.len(), DIM);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let (store, _dir) = store();
        store.upsert(&record("a", "first version")).unwrap();
        store.upsert(&record("a", "second version")).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let loaded = store.get("a").unwrap().unwrap();
        assert_eq!(loaded.content, "second version");
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let (store, _dir) = store();
        let mut rec = record("a", "short");
        rec.embedding = vec![1.0, 2.0];
        assert!(matches!(
            store.upsert(&rec),
            Err(VectorStoreError::DimensionMismatch { expected: 64, got: 2 })
        ));
    }

    #[test]
    fn test_query_ranks_by_similarity() {
        let (store, _dir) = store();
        store
            .upsert(&record("dark", "dark mode editor preferences"))
            .unwrap();
        store
            .upsert(&record("sales", "quarterly sales report numbers"))
            .unwrap();

        let embedder = HashEmbedder::new(DIM);
        let query = embedder.embed("dark mode preferences").unwrap();
        let hits = store.query(&query, 2, None).unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, "dark");
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn test_query_applies_filter() {
        let (store, _dir) = store();
        store.upsert(&record("a", "dark mode themes")).unwrap();

        let embedder = HashEmbedder::new(DIM);
        let query = embedder.embed("dark mode").unwrap();

        let strict = MemoryFilter {
            min_importance: Some(9),
            ..Default::default()
        };
        assert!(store.query(&query, 5, Some(&strict)).unwrap().is_empty());

        let loose = MemoryFilter::default();
        assert_eq!(store.query(&query, 5, Some(&loose)).unwrap().len(), 1);
    }

    #[test]
    fn test_get_all_is_insertion_ordered() {
        let (store, _dir) = store();
        store.upsert(&record("first", "alpha content")).unwrap();
        store.upsert(&record("second", "beta content")).unwrap();
        store.upsert(&record("third", "gamma content")).unwrap();

        let all = store.get_all(0, 10).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);

        let page = store.get_all(1, 1).unwrap();
        assert_eq!(page[0].id, "second");
    }

    #[test]
    fn test_delete() {
        let (store, _dir) = store();
        store.upsert(&record("a", "to be deleted")).unwrap();
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(store.get("a").unwrap().is_none());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_second_handle_sees_rows_committed_after_open() {
        let dir = TempDir::new().unwrap();
        let writer = LocalVectorStore::open(dir.path(), DIM).unwrap();
        let reader = LocalVectorStore::open(dir.path(), DIM).unwrap();

        // Committed by the writer after the reader's index was built
        writer.upsert(&record("late", "late arrival content")).unwrap();

        let embedder = HashEmbedder::new(DIM);
        let query = embedder.embed("late arrival").unwrap();
        let hits = reader.query(&query, 1, None).unwrap();
        assert_eq!(hits[0].id, "late");
    }

    #[test]
    fn test_reopen_rebuilds_index() {
        let dir = TempDir::new().unwrap();
        {
            let store = LocalVectorStore::open(dir.path(), DIM).unwrap();
            store.upsert(&record("persist", "persisted content here")).unwrap();
        }

        let store = LocalVectorStore::open(dir.path(), DIM).unwrap();
        let embedder = HashEmbedder::new(DIM);
        let query = embedder.embed("persisted content").unwrap();
        let hits = store.query(&query, 1, None).unwrap();
        assert_eq!(hits[0].id, "persist");
    }
}
