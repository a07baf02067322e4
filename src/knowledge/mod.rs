//! Knowledge 모듈 - 네임스페이스별 RAG 지식 저장소
//!
//! - Chunker: 페이지 단위 슬라이딩 윈도우 분할
//! - VectorIndex: 평탄 코사인 검색 + vectors.bin / docstore.db 짝 저장
//! - SessionStore: 세션 id와 디렉토리 배치
//! - IndexRegistry: 네임스페이스 → 인덱스 핸들 캐시
//! - IngestionPipeline: 로드 → 청킹 → 임베딩 → 추가
//! - RetrievalBlender: 세션 우선, 글로벌 이어붙이기

mod blend;
mod chunker;
mod docstore;
mod ingest;
mod registry;
mod session;
mod vector;

// Re-exports
pub use blend::{AnswerMode, BlendQuery, Blended, RetrievalBlender};
pub use chunker::{Chunk, ChunkConfig, Chunker, SlidingWindowChunker};
pub use docstore::{Docstore, IndexMeta};
pub use ingest::{IngestFailure, IngestReport, IngestionPipeline};
pub use registry::{IndexRegistry, NamespaceStats, RetrievedPassage, WriteOutcome};
pub use session::{Namespace, SessionId, SessionStore};
pub use vector::{
    cosine_similarity, embed_chunks, EmbeddedChunk, SearchResult, VectorIndex, DOCSTORE_FILE,
    VECTORS_FILE,
};
