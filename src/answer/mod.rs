//! 응답 생성 모듈
//!
//! 검색된 구절과 질문으로 프롬프트를 구성하고 언어 모델에 위임합니다.
//! 구절이 있으면 그 내용에 근거하되, 부족하면 일반 지식으로 보완하도록 지시합니다.

pub mod format;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::embedding::bounded;
use crate::error::{RagError, Result};
use crate::gemini::GeminiClient;
use crate::knowledge::RetrievedPassage;

pub use format::{format_answer, format_sources, truncate_text, Source};

// ============================================================================
// LanguageModel Trait
// ============================================================================

/// 언어 모델 트레이트
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// 프롬프트 완성
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

/// 모든 호출에 타임아웃을 적용하는 래퍼
pub struct TimedLlm {
    inner: Arc<dyn LanguageModel>,
    limit: Duration,
}

impl TimedLlm {
    pub fn new(inner: Arc<dyn LanguageModel>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl LanguageModel for TimedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        bounded(self.inner.name(), self.limit, self.inner.complete(prompt)).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============================================================================
// Prompt
// ============================================================================

const GROUNDED_TEMPLATE: &str = "You are a helpful assistant answering questions about the user's documents.
Use the context below to answer the question. Prefer information from the context.
If the context does not contain enough information, answer from your general knowledge
and make clear that the documents did not cover it.
If the question is simple, reply shortly.

Context:
{context}

Question:
{question}

Answer:
";

const OPEN_TEMPLATE: &str = "You are a helpful assistant.
No documents are available for this question. Answer from your general knowledge.
If you are not sure, say that you don't know.
If the question is simple, reply shortly.

Question:
{question}

Answer:
";

/// 프롬프트 구성
pub fn compose_prompt(passages: &[RetrievedPassage], query: &str) -> String {
    if passages.is_empty() {
        return OPEN_TEMPLATE.replace("{question}", query.trim());
    }

    let context = passages
        .iter()
        .map(|p| format!("[{} p.{}]\n{}", p.chunk.doc_name, p.chunk.page, p.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    GROUNDED_TEMPLATE
        .replace("{context}", &context)
        .replace("{question}", query.trim())
}

/// 구절 + 질문 → 모델 원문 응답
pub async fn answer(
    llm: &dyn LanguageModel,
    passages: &[RetrievedPassage],
    query: &str,
) -> Result<String> {
    let prompt = compose_prompt(passages, query);
    tracing::debug!(
        "Prompting {} with {} passages ({} chars)",
        llm.name(),
        passages.len(),
        prompt.len()
    );
    llm.complete(&prompt).await
}

// ============================================================================
// Google Gemini
// ============================================================================

/// 생성 API 분당 요청 한도
const LLM_REQUESTS_PER_MINUTE: u32 = 60;

/// Gemini generateContent 구현체
#[derive(Debug)]
pub struct GeminiLlm {
    client: GeminiClient,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiLlm {
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self> {
        let client = GeminiClient::new(
            "gemini-llm",
            api_key,
            config.timeout(),
            LLM_REQUESTS_PER_MINUTE,
            config.max_retries,
        )?;

        Ok(Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn request(&self, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![GenerateContent {
                parts: vec![TextPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl LanguageModel for GeminiLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response: GenerateResponse = self
            .client
            .call(&self.model, "generateContent", &self.request(prompt))
            .await?;

        response.into_text().ok_or_else(|| {
            RagError::service("gemini-llm", "response contained no text candidates")
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<GenerateContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateContent {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GenerateContent>,
}

impl GenerateResponse {
    /// 첫 후보의 텍스트 파트를 이어붙임
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().map(|p| p.text).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Namespace;
    use crate::testing::{chunk, EchoLlm, StallingProvider};

    fn passage(doc: &str, page: u32, text: &str) -> RetrievedPassage {
        RetrievedPassage {
            chunk: chunk(doc, page, 0, text),
            score: 0.9,
            namespace: Namespace::Global,
        }
    }

    #[test]
    fn test_prompt_with_context_allows_fallback() {
        let prompt = compose_prompt(
            &[passage("a.pdf", 3, "The sky is blue."), passage("b.pdf", 1, "Grass is green.")],
            "  What colour is the sky? ",
        );
        assert!(prompt.contains("[a.pdf p.3]\nThe sky is blue."));
        assert!(prompt.contains("[b.pdf p.1]"));
        assert!(prompt.contains("general knowledge"));
        assert!(prompt.contains("Question:\nWhat colour is the sky?\n"));
        assert!(prompt.find("a.pdf").unwrap() < prompt.find("b.pdf").unwrap());
    }

    #[test]
    fn test_prompt_without_context() {
        let prompt = compose_prompt(&[], "Who wrote Hamlet?");
        assert!(!prompt.contains("Context:"));
        assert!(prompt.contains("don't know"));
        assert!(prompt.contains("Who wrote Hamlet?"));
    }

    #[tokio::test]
    async fn test_answer_delegates_to_model() {
        let llm = EchoLlm::default();
        let raw = answer(&llm, &[], "hello?").await.unwrap();
        assert!(raw.contains("hello?"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_timed_llm_times_out_as_transient() {
        let llm = TimedLlm::new(Arc::new(StallingProvider), Duration::from_millis(20));
        let err = llm.complete("anything").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_request_shape() {
        let llm = GeminiLlm::new("fake_key".to_string(), &LlmConfig::default()).unwrap();
        let json = serde_json::to_value(llm.request("hi")).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_response_text_extraction() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}],"role":"model"}}]}"#;
        let response: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.into_text().unwrap(), "Hello world");

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(empty.into_text().is_none());
    }
}
