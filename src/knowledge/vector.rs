//! Vector Index - 네임스페이스별 벡터 인덱스
//!
//! 청크 임베딩을 메모리에 평탄한 f32 배열로 보관하고 정확한 코사인 유사도
//! 스캔으로 k-최근접 이웃을 찾습니다.
//!
//! 디스크에는 네임스페이스 디렉토리마다 두 파일이 짝으로 저장됩니다.
//! - `vectors.bin`: 벡터 구조 (magic, 차원, 개수, f32 LE)
//! - `docstore.db`: 벡터 id → 청크 메타데이터 (SQLite)
//!
//! 둘 중 하나라도 없으면 인덱스가 없는 것으로 취급합니다.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::chunker::Chunk;
use super::docstore::{Docstore, IndexMeta};

/// 벡터 구조 파일
pub const VECTORS_FILE: &str = "vectors.bin";
/// 메타데이터 저장소 파일
pub const DOCSTORE_FILE: &str = "docstore.db";

const VECTORS_TMP: &str = "vectors.bin.tmp";
const MAGIC: &[u8; 8] = b"PRAGVEC1";
const HEADER_LEN: usize = 8 + 4 + 8;

// ============================================================================
// Types
// ============================================================================

/// 임베딩이 붙은 청크
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// 인덱스 내 벡터 id
    pub id: usize,
    pub chunk: Chunk,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub similarity: f32,
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 한 네임스페이스의 인덱스
#[derive(Debug, Clone)]
pub struct VectorIndex {
    embedding_model: String,
    dimension: usize,
    chunks: Vec<Chunk>,
    /// chunks.len() * dimension
    vectors: Vec<f32>,
    created_at: DateTime<Utc>,
}

impl VectorIndex {
    /// 청크를 임베딩하여 새 인덱스 생성
    ///
    /// 청크가 비어있으면 `EmptyInput`.
    pub async fn create(chunks: Vec<Chunk>, embedder: &dyn EmbeddingProvider) -> Result<Self> {
        if chunks.is_empty() {
            return Err(RagError::EmptyInput);
        }
        let entries = embed_chunks(chunks, embedder).await?;
        Self::from_embedded(embedder.name(), embedder.dimension(), entries)
    }

    /// 미리 임베딩된 청크로 생성
    pub fn from_embedded(
        embedding_model: &str,
        dimension: usize,
        entries: Vec<EmbeddedChunk>,
    ) -> Result<Self> {
        if entries.is_empty() {
            return Err(RagError::EmptyInput);
        }
        if dimension == 0 {
            return Err(RagError::Config("embedding dimension must be > 0".into()));
        }

        let mut index = Self {
            embedding_model: embedding_model.to_string(),
            dimension,
            chunks: Vec::with_capacity(entries.len()),
            vectors: Vec::with_capacity(entries.len() * dimension),
            created_at: Utc::now(),
        };
        index.append(embedding_model, entries)?;
        Ok(index)
    }

    /// 청크를 임베딩하여 추가 (기존 항목 보존)
    pub async fn add(&mut self, chunks: Vec<Chunk>, embedder: &dyn EmbeddingProvider) -> Result<usize> {
        self.ensure_compatible(embedder)?;
        let entries = embed_chunks(chunks, embedder).await?;
        self.append(embedder.name(), entries)
    }

    /// 미리 임베딩된 청크 추가
    ///
    /// 중복 제거는 하지 않습니다. 추가된 개수를 반환합니다.
    pub fn append(&mut self, embedding_model: &str, entries: Vec<EmbeddedChunk>) -> Result<usize> {
        if embedding_model != self.embedding_model {
            return Err(RagError::EmbeddingMismatch {
                expected: self.embedding_model.clone(),
                actual: embedding_model.to_string(),
            });
        }
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != self.dimension) {
            return Err(RagError::EmbeddingMismatch {
                expected: format!("{} dims", self.dimension),
                actual: format!("{} dims", bad.embedding.len()),
            });
        }

        let added = entries.len();
        for entry in entries {
            self.vectors.extend_from_slice(&entry.embedding);
            self.chunks.push(entry.chunk);
        }
        Ok(added)
    }

    /// 쿼리 텍스트로 검색
    ///
    /// 유사도 내림차순, 최대 `k`개 (항목 수로 제한). 빈 인덱스는 빈 결과.
    pub async fn search(
        &self,
        query: &str,
        embedder: &dyn EmbeddingProvider,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        if self.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        self.ensure_compatible(embedder)?;

        let query_embedding = embedder.embed_query(query).await?;
        self.search_embedding(&query_embedding, k)
    }

    /// 이미 임베딩된 쿼리로 검색 (정확한 전수 스캔)
    pub fn search_embedding(&self, query_embedding: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let k = k.min(self.len());
        if k == 0 {
            return Ok(vec![]);
        }
        if query_embedding.len() != self.dimension {
            return Err(RagError::EmbeddingMismatch {
                expected: format!("{} dims", self.dimension),
                actual: format!("{} dims", query_embedding.len()),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .map(|v| cosine_similarity(query_embedding, v))
            .enumerate()
            .collect();

        // 안정 정렬: 동점이면 먼저 들어온 항목 우선
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(id, similarity)| SearchResult {
                id,
                chunk: self.chunks[id].clone(),
                similarity,
            })
            .collect())
    }

    /// 임베더가 이 인덱스와 같은 모델/차원인지
    pub fn ensure_compatible(&self, embedder: &dyn EmbeddingProvider) -> Result<()> {
        if embedder.name() != self.embedding_model || embedder.dimension() != self.dimension {
            return Err(RagError::EmbeddingMismatch {
                expected: format!("{} ({} dims)", self.embedding_model, self.dimension),
                actual: format!("{} ({} dims)", embedder.name(), embedder.dimension()),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// 두 아티팩트가 모두 있는지
    pub fn exists(dir: &Path) -> bool {
        dir.join(VECTORS_FILE).is_file() && dir.join(DOCSTORE_FILE).is_file()
    }

    /// 디렉토리에 저장
    ///
    /// docstore 트랜잭션 안에서 벡터 임시 파일을 제자리로 rename 한 뒤 커밋합니다.
    /// 중간에 중단되면 docstore의 다이제스트가 벡터 파일과 맞지 않게 되어
    /// 로드 시 `CorruptIndex`로 드러납니다.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let bytes = encode_vectors(self.dimension, &self.vectors);
        let digest = hex::encode(Sha256::digest(&bytes));

        let tmp = dir.join(VECTORS_TMP);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }

        let meta = IndexMeta {
            embedding_model: self.embedding_model.clone(),
            dimension: self.dimension,
            entry_count: self.len(),
            vectors_sha256: digest,
            created_at: self.created_at,
            updated_at: Utc::now(),
        };

        let result = Docstore::open(&dir.join(DOCSTORE_FILE)).and_then(|mut store| {
            store.write(&self.chunks, &meta, || {
                fs::rename(&tmp, dir.join(VECTORS_FILE))?;
                Ok(())
            })
        });

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        tracing::debug!("Saved index ({} entries) to {:?}", self.len(), dir);
        Ok(())
    }

    /// 디렉토리에서 로드
    ///
    /// 파일 짝이 불완전하거나 메타데이터가 커밋되지 않았으면 `Ok(None)`.
    /// 두 파일이 서로 맞지 않으면 `CorruptIndex`.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        if !Self::exists(dir) {
            return Ok(None);
        }

        let store = match Docstore::open_existing(&dir.join(DOCSTORE_FILE)) {
            Ok(store) => store,
            Err(e) => return Err(RagError::corrupt(dir, format!("docstore: {}", e))),
        };
        let meta = match store.read_meta() {
            Ok(Some(meta)) => meta,
            Ok(None) => return Ok(None),
            Err(e) => return Err(RagError::corrupt(dir, format!("docstore: {}", e))),
        };

        let bytes = match fs::read(dir.join(VECTORS_FILE)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if hex::encode(Sha256::digest(&bytes)) != meta.vectors_sha256 {
            return Err(RagError::corrupt(dir, "vectors digest does not match docstore"));
        }

        let (dimension, vectors) = decode_vectors(&bytes).map_err(|reason| RagError::corrupt(dir, reason))?;
        let chunks = store.read_chunks()?;
        let count = if dimension == 0 { 0 } else { vectors.len() / dimension };

        if dimension != meta.dimension || count != meta.entry_count || chunks.len() != count {
            return Err(RagError::corrupt(
                dir,
                format!(
                    "entry mismatch (vectors={}x{}, docstore={}x{}, chunks={})",
                    count,
                    dimension,
                    meta.entry_count,
                    meta.dimension,
                    chunks.len()
                ),
            ));
        }

        tracing::debug!("Loaded index ({} entries) from {:?}", count, dir);

        Ok(Some(Self {
            embedding_model: meta.embedding_model,
            dimension,
            chunks,
            vectors,
            created_at: meta.created_at,
        }))
    }

    /// 인덱스가 반드시 있어야 하는 경우의 로드
    pub fn load_required(dir: &Path) -> Result<Self> {
        Self::load(dir)?.ok_or_else(|| RagError::IndexNotFound(dir.to_path_buf()))
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 청크 배치 임베딩
pub async fn embed_chunks(
    chunks: Vec<Chunk>,
    embedder: &dyn EmbeddingProvider,
) -> Result<Vec<EmbeddedChunk>> {
    if chunks.is_empty() {
        return Ok(vec![]);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embedder.embed_batch(&texts).await?;

    if embeddings.len() != chunks.len() {
        return Err(RagError::service(
            embedder.name(),
            format!("expected {} embeddings, got {}", chunks.len(), embeddings.len()),
        ));
    }

    Ok(chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
        .collect())
}

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

fn encode_vectors(dimension: usize, vectors: &[f32]) -> Vec<u8> {
    let count = if dimension == 0 { 0 } else { vectors.len() / dimension };
    let mut bytes = Vec::with_capacity(HEADER_LEN + vectors.len() * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&(dimension as u32).to_le_bytes());
    bytes.extend_from_slice(&(count as u64).to_le_bytes());
    for v in vectors {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_vectors(bytes: &[u8]) -> std::result::Result<(usize, Vec<f32>), String> {
    if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
        return Err("vectors file has no valid header".to_string());
    }

    let dimension = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let body = &bytes[HEADER_LEN..];
    if body.len() != count * dimension * 4 {
        return Err(format!(
            "vectors file is truncated ({} bytes for {}x{})",
            body.len(),
            count,
            dimension
        ));
    }

    let vectors = body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((dimension, vectors))
}

// ============================================================================
// Tests
// ============================================================================
