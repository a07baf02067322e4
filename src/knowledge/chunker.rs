//! Text Chunking Module
//!
//! 페이지 단위 고정 크기 슬라이딩 윈도우 청킹을 제공합니다.
//! 청크는 페이지 경계를 넘지 않으므로 모든 청크의 페이지 번호가 정확합니다.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::extractor::Document;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (단위: 문자)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// 청크 최대 크기
    pub chunk_size: usize,
    /// 연속 청크 간 공유 문자 수 (chunk_size 미만)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// 윈도우 이동 폭
    fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 검색 단위 청크 (생성 후 불변)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// 원본 문서 이름 (파일명)
    pub doc_name: String,
    /// 로더가 준 페이지 번호 그대로
    pub page: u32,
    /// 문서 내 순번 (0-based, 페이지 순서대로 증가)
    pub position: u32,
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;

    /// 문서 전체를 페이지별로 청킹
    fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut position = 0u32;

        for page in &doc.pages {
            for text in self.chunk(&page.text) {
                chunks.push(Chunk {
                    text,
                    doc_name: doc.name.clone(),
                    page: page.number,
                    position,
                });
                position += 1;
            }
        }

        chunks
    }
}

// ============================================================================
// SlidingWindowChunker
// ============================================================================

/// 고정 크기 슬라이딩 윈도우 청커
///
/// - 페이지 텍스트 앞뒤 공백 제거 후 문자 단위로 분할
/// - 연속 청크는 정확히 `chunk_overlap` 문자를 공유
/// - 마지막 윈도우는 페이지 끝에서 종료
pub struct SlidingWindowChunker {
    config: ChunkConfig,
}

impl SlidingWindowChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self {
            config: ChunkConfig::default(),
        }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }
}

impl Chunker for SlidingWindowChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return vec![];
        }

        // 멀티바이트 문자 대응: 문자 경계 바이트 오프셋
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_count = bounds.len() - 1;

        if char_count <= self.config.chunk_size {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.config.chunk_size).min(char_count);
            chunks.push(text[bounds[start]..bounds[end]].to_string());

            if end == char_count {
                break;
            }
            start += self.config.stride();
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "SlidingWindowChunker"
    }
}

// ============================================================================
// Tests
// ============================================================================
