//! 수집 파이프라인
//!
//! PDF 로드 → 청킹 → 임베딩 → 네임스페이스 인덱스 추가.
//! 파일 하나의 실패는 배치 전체를 중단시키지 않습니다.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extractor::{self, PageLoader};

use super::chunker::{Chunk, Chunker};
use super::registry::IndexRegistry;
use super::session::Namespace;

/// 수집 실패한 파일
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub file: String,
    pub error: String,
}

/// 수집 결과 (사용자에게 그대로 보여주는 피드백)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    /// 이번 호출로 추가된 청크 수
    pub chunks_added: usize,
    /// 처리된 문서 이름 (입력 순서)
    pub documents: Vec<String>,
    pub failures: Vec<IngestFailure>,
    /// 추가 후 네임스페이스 전체 청크 수
    pub total_chunks: usize,
}

/// 수집 파이프라인
pub struct IngestionPipeline {
    loader: Arc<dyn PageLoader>,
    chunker: Arc<dyn Chunker>,
    registry: Arc<IndexRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IngestionPipeline {
    pub fn new(
        loader: Arc<dyn PageLoader>,
        chunker: Arc<dyn Chunker>,
        registry: Arc<IndexRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            loader,
            chunker,
            registry,
            embedder,
        }
    }

    /// 파일들을 네임스페이스에 수집
    ///
    /// PDF가 아닌 파일이 하나라도 있으면 I/O 전에 전체를 거부합니다.
    /// 모든 파일이 실패하면 첫 번째 에러를 반환합니다.
    pub async fn ingest(&self, paths: &[PathBuf], ns: Namespace) -> Result<IngestReport> {
        if paths.is_empty() {
            return Err(RagError::NoFiles);
        }
        if let Some(bad) = paths.iter().find(|p| !extractor::is_pdf(p)) {
            return Err(RagError::UnsupportedFileType(extractor::file_name(bad)));
        }

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut documents = Vec::new();
        let mut failures = Vec::new();
        let mut first_error: Option<RagError> = None;

        for path in paths {
            let name = extractor::file_name(path);
            tracing::info!("Loading {}", name);

            let doc = match extractor::load_blocking(Arc::clone(&self.loader), path).await {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", name, e);
                    failures.push(IngestFailure {
                        file: name,
                        error: e.to_string(),
                    });
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            let doc_chunks = self.chunker.chunk_document(&doc);
            if doc_chunks.is_empty() {
                tracing::warn!("{} produced no text ({} pages)", name, doc.pages.len());
            } else {
                tracing::debug!(
                    "{}: {} pages -> {} chunks ({})",
                    name,
                    doc.pages.len(),
                    doc_chunks.len(),
                    self.chunker.name()
                );
            }

            chunks.extend(doc_chunks);
            documents.push(doc.name);
        }

        if documents.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        let outcome = self
            .registry
            .ingest_chunks(ns, chunks, self.embedder.as_ref())
            .await?;

        tracing::info!(
            "Ingested {} document(s) into {}: +{} chunks, {} failed",
            documents.len(),
            ns,
            outcome.added,
            failures.len()
        );

        Ok(IngestReport {
            chunks_added: outcome.added,
            documents,
            failures,
            total_chunks: outcome.total,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::{ChunkConfig, SlidingWindowChunker};
    use crate::knowledge::session::SessionStore;
    use crate::testing::{write_fake_pdf, HashEmbedder, TextPageLoader};
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir) -> (IngestionPipeline, Arc<IndexRegistry>) {
        let registry = Arc::new(IndexRegistry::new(SessionStore::new(
            dir.path().join("indexes"),
            dir.path().join("uploads"),
        )));
        let chunker = SlidingWindowChunker::new(ChunkConfig {
            chunk_size: 40,
            chunk_overlap: 10,
        })
        .unwrap();
        let pipeline = IngestionPipeline::new(
            Arc::new(TextPageLoader),
            Arc::new(chunker),
            Arc::clone(&registry),
            Arc::new(HashEmbedder::new(16)),
        );
        (pipeline, registry)
    }

    #[tokio::test]
    async fn test_rejects_non_pdf_before_io() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir);
        let good = write_fake_pdf(dir.path(), "a.pdf", &["hello"]);

        // notes.txt 는 존재하지 않아도 타입 에러가 먼저
        let err = pipeline
            .ingest(&[good, dir.path().join("notes.txt")], Namespace::Global)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFileType(name) if name == "notes.txt"));
        assert!(!dir.path().join("indexes").exists());
    }

    #[tokio::test]
    async fn test_no_files() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir);
        let err = pipeline.ingest(&[], Namespace::Global).await.unwrap_err();
        assert!(matches!(err, RagError::NoFiles));
    }

    #[tokio::test]
    async fn test_reports_chunks_and_documents() {
        let dir = TempDir::new().unwrap();
        let (pipeline, registry) = pipeline(&dir);
        let a = write_fake_pdf(dir.path(), "a.pdf", &["short page", "another short page"]);
        let b = write_fake_pdf(dir.path(), "b.pdf", &["x".repeat(100).as_str()]);

        let report = pipeline.ingest(&[a, b], Namespace::Global).await.unwrap();

        // a: 2 페이지 x 1 청크, b: 100자 / (40, stride 30) = 3 청크
        assert_eq!(report.documents, vec!["a.pdf", "b.pdf"]);
        assert_eq!(report.chunks_added, 5);
        assert_eq!(report.total_chunks, 5);
        assert!(report.failures.is_empty());

        let index = registry.snapshot(Namespace::Global).await.unwrap().unwrap();
        assert_eq!(index.chunks()[1].page, 2);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_good_files() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir);
        let good = write_fake_pdf(dir.path(), "good.pdf", &["readable text"]);
        let missing = dir.path().join("missing.pdf");

        let report = pipeline
            .ingest(&[missing, good], Namespace::Global)
            .await
            .unwrap();

        assert_eq!(report.documents, vec!["good.pdf"]);
        assert_eq!(report.chunks_added, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].file, "missing.pdf");
    }

    #[tokio::test]
    async fn test_all_failures_return_first_error() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir);

        let err = pipeline
            .ingest(
                &[dir.path().join("one.pdf"), dir.path().join("two.pdf")],
                Namespace::Global,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UnreadablePdf { file, .. } if file == "one.pdf"));
    }

    #[tokio::test]
    async fn test_second_ingest_is_additive() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir);
        let a = write_fake_pdf(dir.path(), "a.pdf", &["first document"]);
        let b = write_fake_pdf(dir.path(), "b.pdf", &["second document"]);

        pipeline.ingest(&[a], Namespace::Global).await.unwrap();
        let report = pipeline.ingest(&[b], Namespace::Global).await.unwrap();

        assert_eq!(report.chunks_added, 1);
        assert_eq!(report.total_chunks, 2);
    }

    #[tokio::test]
    async fn test_textless_documents_into_empty_namespace() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir);
        let blank = write_fake_pdf(dir.path(), "blank.pdf", &["", "  "]);

        let err = pipeline.ingest(&[blank], Namespace::Global).await.unwrap_err();
        assert!(matches!(err, RagError::EmptyInput));
    }
}
