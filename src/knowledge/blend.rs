//! 검색 블렌딩
//!
//! 쿼리 하나에 대해 어느 네임스페이스를 검색할지 정하고 결과를 합칩니다.
//!
//! 1. 세션 인덱스가 있으면 세션에서 top_k → `session_rag`
//! 2. `use_global`이고 글로벌 인덱스가 있으면 글로벌에서 top_k
//!    - 세션 결과가 있으면 그 뒤에 이어붙임 (점수로 재정렬하지 않음)
//!    - 없으면 글로벌 결과가 있을 때 `global_rag`
//! 3. 둘 다 없으면 `llm_only`

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::Result;

use super::registry::{IndexRegistry, RetrievedPassage};
use super::session::{Namespace, SessionId};
use super::vector::VectorIndex;

/// 실제로 사용된 검색 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    LlmOnly,
    SessionRag,
    GlobalRag,
}

impl AnswerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LlmOnly => "llm_only",
            Self::SessionRag => "session_rag",
            Self::GlobalRag => "global_rag",
        }
    }
}

impl std::fmt::Display for AnswerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 블렌딩 결과
#[derive(Debug, Clone, PartialEq)]
pub struct Blended {
    pub mode: AnswerMode,
    /// 세션 구절이 항상 글로벌 구절보다 앞
    pub passages: Vec<RetrievedPassage>,
}

/// 블렌딩 입력
#[derive(Debug, Clone)]
pub struct BlendQuery<'a> {
    pub query: &'a str,
    pub session: Option<SessionId>,
    pub use_global: bool,
    pub top_k: usize,
}

pub struct RetrievalBlender {
    registry: Arc<IndexRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrievalBlender {
    pub fn new(registry: Arc<IndexRegistry>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { registry, embedder }
    }

    pub async fn retrieve(&self, q: &BlendQuery<'_>) -> Result<Blended> {
        let session_index = match q.session {
            Some(id) => self.registry.snapshot(Namespace::Session(id)).await?,
            None => None,
        };
        let global_index = if q.use_global {
            self.registry.snapshot(Namespace::Global).await?
        } else {
            None
        };

        if session_index.is_none() && global_index.is_none() {
            tracing::debug!("No index available, answering without retrieval");
            return Ok(Blended {
                mode: AnswerMode::LlmOnly,
                passages: vec![],
            });
        }

        // 쿼리 임베딩은 한 번만
        let query_embedding = self.embedder.embed_query(q.query).await?;

        let mut mode = AnswerMode::LlmOnly;
        let mut passages = Vec::new();

        if let (Some(id), Some(index)) = (q.session, &session_index) {
            let found = self.search(index, &query_embedding, q.top_k, Namespace::Session(id))?;
            if !found.is_empty() {
                mode = AnswerMode::SessionRag;
            }
            passages.extend(found);
        }

        if let Some(index) = &global_index {
            let found = self.search(index, &query_embedding, q.top_k, Namespace::Global)?;
            if mode == AnswerMode::LlmOnly && !found.is_empty() {
                mode = AnswerMode::GlobalRag;
            }
            passages.extend(found);
        }

        tracing::debug!("Retrieved {} passages (mode={})", passages.len(), mode);
        Ok(Blended { mode, passages })
    }

    fn search(
        &self,
        index: &VectorIndex,
        query_embedding: &[f32],
        top_k: usize,
        namespace: Namespace,
    ) -> Result<Vec<RetrievedPassage>> {
        index.ensure_compatible(self.embedder.as_ref())?;
        Ok(index
            .search_embedding(query_embedding, top_k)?
            .into_iter()
            .map(|r| RetrievedPassage {
                chunk: r.chunk,
                score: r.similarity,
                namespace,
            })
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
