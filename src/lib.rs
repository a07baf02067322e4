//! pdf-chat-rag - PDF 문서 기반 RAG 질의응답 서비스
//!
//! PDF를 페이지 단위로 청킹·임베딩하여 네임스페이스(글로벌 / 세션)별
//! 벡터 인덱스에 저장하고, 질문에 대해 세션 → 글로벌 순으로 검색한
//! 구절을 근거로 언어 모델이 답합니다. 검색 결과가 없으면 모델의
//! 일반 지식으로 답합니다.

pub mod answer;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod gemini;
pub mod knowledge;
pub mod server;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use answer::{format_answer, format_sources, GeminiLlm, LanguageModel, Source, TimedLlm};
pub use config::{get_api_key, has_api_key, RagConfig};
pub use embedding::{EmbeddingProvider, GeminiEmbedding, Timed};
pub use error::{RagError, Result};
pub use knowledge::{
    AnswerMode, Chunk, ChunkConfig, IndexRegistry, IngestReport, IngestionPipeline, Namespace,
    RetrievalBlender, RetrievedPassage, SessionId, SessionStore, VectorIndex,
};
pub use server::RagServer;
pub use service::{ChatRequest, ChatResponse, RagService, UploadResponse};
