//! Docstore - rusqlite 기반 청크 메타데이터 저장소
//!
//! 벡터 id(= 인덱스 내 순번)를 청크 메타데이터에 매핑합니다.
//! `meta` 테이블에 벡터 파일의 SHA-256을 함께 기록하여
//! 두 아티팩트의 짝이 맞는지 로드 시 검증할 수 있게 합니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::Result;

use super::chunker::Chunk;

/// 동시 접근 시 대기 시간
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// 인덱스 메타데이터 (커밋 마커 역할)
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub embedding_model: String,
    pub dimension: usize,
    pub entry_count: usize,
    /// vectors.bin 전체의 SHA-256 (hex)
    pub vectors_sha256: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Docstore
// ============================================================================

pub struct Docstore {
    conn: Connection,
    db_path: PathBuf,
}

impl Docstore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let store = Self {
            conn,
            db_path: path.to_path_buf(),
        };
        store.initialize()?;
        Ok(store)
    }

    /// 기존 저장소만 열기 (생성하지 않음)
    pub fn open_existing(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Ok(Self {
            conn,
            db_path: path.to_path_buf(),
        })
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY,
                doc_name TEXT NOT NULL,
                page INTEGER NOT NULL,
                position INTEGER NOT NULL,
                text TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        tracing::debug!("Docstore initialized at {:?}", self.db_path);
        Ok(())
    }

    fn has_table(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 커밋된 메타데이터 조회. 없으면 아직 완성되지 않은 인덱스.
    pub fn read_meta(&self) -> Result<Option<IndexMeta>> {
        if !self.has_table("meta")? || !self.has_table("chunks")? {
            return Ok(None);
        }

        let get = |key: &str| -> Result<Option<String>> {
            Ok(self
                .conn
                .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        };

        let (Some(model), Some(dimension), Some(count), Some(digest), Some(created), Some(updated)) = (
            get("embedding_model")?,
            get("dimension")?,
            get("entry_count")?,
            get("vectors_sha256")?,
            get("created_at")?,
            get("updated_at")?,
        ) else {
            return Ok(None);
        };

        Ok(Some(IndexMeta {
            embedding_model: model,
            dimension: dimension.parse().unwrap_or(0),
            entry_count: count.parse().unwrap_or(0),
            vectors_sha256: digest,
            created_at: parse_datetime(&created),
            updated_at: parse_datetime(&updated),
        }))
    }

    /// 전체 청크를 id 순서로 조회
    pub fn read_chunks(&self) -> Result<Vec<Chunk>> {
        let mut stmt = self
            .conn
            .prepare("SELECT doc_name, page, position, text FROM chunks ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            Ok(Chunk {
                doc_name: row.get(0)?,
                page: row.get(1)?,
                position: row.get(2)?,
                text: row.get(3)?,
            })
        })?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// 청크 + 메타데이터를 한 트랜잭션으로 기록
    ///
    /// 청크는 불변이므로 이미 있는 id는 건너뜁니다. `before_commit`은
    /// 트랜잭션 커밋 직전에 실행되며 (벡터 파일 교체), 실패하면 롤백됩니다.
    pub fn write<F>(&mut self, chunks: &[Chunk], meta: &IndexMeta, before_commit: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO chunks (id, doc_name, page, position, text)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (id, chunk) in chunks.iter().enumerate() {
                insert.execute(params![
                    id as i64,
                    chunk.doc_name,
                    chunk.page,
                    chunk.position,
                    chunk.text
                ])?;
            }

            let mut upsert =
                tx.prepare("INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)")?;
            for (key, value) in [
                ("embedding_model", meta.embedding_model.clone()),
                ("dimension", meta.dimension.to_string()),
                ("entry_count", meta.entry_count.to_string()),
                ("vectors_sha256", meta.vectors_sha256.clone()),
                ("created_at", meta.created_at.to_rfc3339()),
                ("updated_at", meta.updated_at.to_rfc3339()),
            ] {
                upsert.execute(params![key, value])?;
            }
        }

        before_commit()?;
        tx.commit()?;
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, Docstore) {
        let dir = TempDir::new().unwrap();
        let store = Docstore::open(&dir.path().join("docstore.db")).unwrap();
        (dir, store)
    }

    fn chunk(i: u32) -> Chunk {
        Chunk {
            text: format!("chunk {}", i),
            doc_name: "a.pdf".to_string(),
            page: 1 + i / 2,
            position: i,
        }
    }

    fn meta(count: usize) -> IndexMeta {
        IndexMeta {
            embedding_model: "hash-embedder".to_string(),
            dimension: 16,
            entry_count: count,
            vectors_sha256: "abc".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_fresh_store_has_no_meta() {
        let (_dir, store) = create_test_store();
        assert!(store.read_meta().unwrap().is_none());
        assert_eq!(store.read_chunks().unwrap().len(), 0);
    }

    #[test]
    fn test_write_and_read_back() {
        let (_dir, mut store) = create_test_store();
        let chunks: Vec<Chunk> = (0..3).map(chunk).collect();

        store.write(&chunks, &meta(3), || Ok(())).unwrap();

        assert_eq!(store.read_chunks().unwrap(), chunks);
        let m = store.read_meta().unwrap().unwrap();
        assert_eq!(m.entry_count, 3);
        assert_eq!(m.dimension, 16);
        assert_eq!(m.embedding_model, "hash-embedder");
    }

    #[test]
    fn test_rewrite_is_additive() {
        let (_dir, mut store) = create_test_store();
        let mut chunks: Vec<Chunk> = (0..2).map(chunk).collect();
        store.write(&chunks, &meta(2), || Ok(())).unwrap();

        chunks.extend((2..5).map(chunk));
        store.write(&chunks, &meta(5), || Ok(())).unwrap();

        assert_eq!(store.read_chunks().unwrap().len(), 5);
        assert_eq!(store.read_chunks().unwrap(), chunks);
    }

    #[test]
    fn test_failed_hook_rolls_back() {
        let (_dir, mut store) = create_test_store();
        let chunks: Vec<Chunk> = (0..2).map(chunk).collect();

        let result = store.write(&chunks, &meta(2), || Err(RagError::EmptyInput));
        assert!(result.is_err());
        assert_eq!(store.read_chunks().unwrap().len(), 0);
        assert!(store.read_meta().unwrap().is_none());
    }

    #[test]
    fn test_open_existing_requires_file() {
        let dir = TempDir::new().unwrap();
        assert!(Docstore::open_existing(&dir.path().join("missing.db")).is_err());
    }
}
