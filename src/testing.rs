//! 테스트용 결정적 대역 (네트워크/실제 PDF 없이 동작)

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::answer::LanguageModel;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extractor::{self, Document, Page, PageLoader};
use crate::knowledge::Chunk;

pub fn chunk(doc: &str, page: u32, position: u32, text: &str) -> Chunk {
    Chunk {
        text: text.to_string(),
        doc_name: doc.to_string(),
        page,
        position,
    }
}

// ============================================================================
// Embedders
// ============================================================================

/// 단어 해시 기반 bag-of-words 임베더
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash-embedder"
    }
}

/// 응답하지 않는 프로바이더 (타임아웃 테스트용)
pub struct StallingProvider;

#[async_trait]
impl EmbeddingProvider for StallingProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![])
    }

    fn dimension(&self) -> usize {
        16
    }

    fn name(&self) -> &str {
        "stalling"
    }
}

#[async_trait]
impl LanguageModel for StallingProvider {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(String::new())
    }

    fn name(&self) -> &str {
        "stalling"
    }
}

// ============================================================================
// Language Models
// ============================================================================

/// 프롬프트를 기록하고 마크다운이 섞인 응답을 돌려주는 모델
#[derive(Default)]
pub struct EchoLlm {
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl EchoLlm {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for EchoLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock() = Some(prompt.to_string());

        let question = prompt
            .split("Question:")
            .nth(1)
            .and_then(|rest| rest.split("Answer:").next())
            .unwrap_or(prompt)
            .trim();
        Ok(format!("## Echo\n\n**{}**\n", question))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// 항상 일시적 장애를 반환하는 모델
pub struct FailingLlm;

#[async_trait]
impl LanguageModel for FailingLlm {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(RagError::transient("failing-llm", "service unavailable"))
    }

    fn name(&self) -> &str {
        "failing-llm"
    }
}

// ============================================================================
// Page Loader
// ============================================================================

/// 폼피드로 페이지를 나눈 텍스트 파일을 PDF 대신 읽는 로더
pub struct TextPageLoader;

impl PageLoader for TextPageLoader {
    fn load(&self, path: &Path) -> Result<Document> {
        let name = extractor::file_name(path);
        let text = std::fs::read_to_string(path)
            .map_err(|e| RagError::unreadable_pdf(&name, e.to_string()))?;

        Ok(Document {
            name,
            pages: split_pages(&text)
                .into_iter()
                .enumerate()
                .map(|(i, text)| Page {
                    number: i as u32 + 1,
                    text,
                })
                .collect(),
        })
    }
}

/// 폼피드 문자 (\x0c)로 페이지 분리. 마지막 폼피드 뒤의 빈 꼬리만 버립니다.
fn split_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split('\x0c').map(|s| s.trim().to_string()).collect();

    if pages.len() > 1 && pages.last().map(|p| p.is_empty()).unwrap_or(false) {
        pages.pop();
    }

    pages
}

/// 가짜 PDF 작성 (페이지를 폼피드로 연결)
pub fn write_fake_pdf(dir: &Path, name: &str, pages: &[&str]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, pages.join("\x0c")).unwrap();
    path
}
