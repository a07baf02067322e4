//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 텍스트를 고정 길이 벡터로 변환하는 프로바이더입니다.
//! 인덱스는 `name()`과 `dimension()`을 기록해 모델 혼용을 막습니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::new(api_key, &config.embedding)?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::gemini::GeminiClient;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 검색 쿼리 임베딩 (기본 구현: 문서 임베딩과 동일)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Timeout Decorator
// ============================================================================

/// 외부 호출에 타임아웃을 씌움. 초과 시 `TransientService`.
pub(crate) async fn bounded<T, F>(service: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RagError::transient(
            service,
            format!("timed out after {:?}", limit),
        )),
    }
}

/// 모든 호출에 타임아웃을 적용하는 임베딩 래퍼
pub struct Timed {
    inner: Arc<dyn EmbeddingProvider>,
    limit: Duration,
}

impl Timed {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl EmbeddingProvider for Timed {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        bounded(self.inner.name(), self.limit, self.inner.embed(text)).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        bounded(self.inner.name(), self.limit, self.inner.embed_query(text)).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // 배치 크기에 비례해 한도를 늘림
        let batches = texts.len().div_ceil(BATCH_LIMIT).max(1) as u32;
        bounded(
            self.inner.name(),
            self.limit * batches,
            self.inner.embed_batch(texts),
        )
        .await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// batchEmbedContents 한 번에 보낼 수 있는 최대 요청 수
const BATCH_LIMIT: usize = 100;

/// Gemini가 지원하는 출력 차원 (MRL)
const VALID_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

/// Google Gemini 임베딩 구현체
///
/// source: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug)]
pub struct GeminiEmbedding {
    client: GeminiClient,
    model: String,
    dimension: usize,
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: &'static str,
    #[serde(rename = "outputDimensionality")]
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl GeminiEmbedding {
    /// 설정으로 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `config` - 모델/차원/타임아웃 설정 (차원은 768, 1536, 3072 중 선택)
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        if !VALID_DIMENSIONS.contains(&config.dimension) {
            return Err(RagError::Config(format!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                config.dimension
            )));
        }

        let client = GeminiClient::new(
            "gemini-embedding",
            api_key,
            config.timeout(),
            config.requests_per_minute,
            config.max_retries,
        )?;

        Ok(Self {
            client,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    fn request(&self, text: &str, task_type: &'static str) -> EmbedRequest {
        EmbedRequest {
            model: format!("models/{}", self.model),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type,
            output_dimensionality: self.dimension,
        }
    }

    async fn embed_one(&self, text: &str, task_type: &'static str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let response: EmbedResponse = self
            .client
            .call(&self.model, "embedContent", &self.request(text, task_type))
            .await?;

        self.check_dimension(response.embedding.values)
    }

    fn check_dimension(&self, values: Vec<f32>) -> Result<Vec<f32>> {
        if values.len() != self.dimension {
            return Err(RagError::EmbeddingMismatch {
                expected: format!("{} dims", self.dimension),
                actual: format!("{} dims", values.len()),
            });
        }
        Ok(values)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, "RETRIEVAL_DOCUMENT").await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, "RETRIEVAL_QUERY").await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(BATCH_LIMIT).enumerate() {
            tracing::debug!(
                "Embedding batch {}/{} ({} texts)",
                i + 1,
                texts.len().div_ceil(BATCH_LIMIT),
                batch.len()
            );

            let request = BatchEmbedRequest {
                requests: batch
                    .iter()
                    .map(|t| self.request(t, "RETRIEVAL_DOCUMENT"))
                    .collect(),
            };

            let response: BatchEmbedResponse = self
                .client
                .call(&self.model, "batchEmbedContents", &request)
                .await?;

            if response.embeddings.len() != batch.len() {
                return Err(RagError::service(
                    "gemini-embedding",
                    format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        response.embeddings.len()
                    ),
                ));
            }

            for values in response.embeddings {
                results.push(self.check_dimension(values.values)?);
            }
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
