//! RAG 서비스 파사드
//!
//! 프로세스 시작 시 한 번 구성되어 HTTP 핸들러와 CLI가 공유합니다.
//! 임베더/언어 모델/로더는 생성자에서 주입됩니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::answer::{self, format_answer, format_sources, GeminiLlm, LanguageModel, Source, TimedLlm};
use crate::config::{self, RagConfig};
use crate::embedding::{EmbeddingProvider, GeminiEmbedding, Timed};
use crate::error::{RagError, Result};
use crate::extractor::{self, PageLoader, PdfExtractLoader};
use crate::knowledge::{
    AnswerMode, BlendQuery, IndexRegistry, IngestFailure, IngestReport, IngestionPipeline,
    Namespace, NamespaceStats, RetrievalBlender, SessionId, SessionStore, SlidingWindowChunker,
};

/// 모델이 빈 응답을 줬을 때
const EMPTY_ANSWER: &str = "I don't know.";

// ============================================================================
// Request / Response Types
// ============================================================================

/// 채팅 요청
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// 네임스페이스별 검색 개수 (기본값: 설정의 default_top_k)
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default = "default_use_global")]
    pub use_global: bool,
}

fn default_use_global() -> bool {
    true
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
            top_k: None,
            use_global: true,
        }
    }
}

/// 채팅 응답
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub mode: AnswerMode,
}

/// 업로드된 파일 하나
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// 업로드 응답
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub session_id: SessionId,
    pub files_ingested: Vec<String>,
    pub chunks_added: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<IngestFailure>,
}

/// 서비스 상태
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub data_dir: PathBuf,
    pub namespaces: Vec<NamespaceStats>,
}

// ============================================================================
// RagService
// ============================================================================

pub struct RagService {
    config: RagConfig,
    registry: Arc<IndexRegistry>,
    pipeline: IngestionPipeline,
    blender: RetrievalBlender,
    llm: Arc<dyn LanguageModel>,
}

impl RagService {
    /// 주입된 협력자로 생성
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        loader: Arc<dyn PageLoader>,
    ) -> Result<Self> {
        config.validate()?;

        let store = SessionStore::new(config.index_root(), config.upload_root());
        let registry = Arc::new(IndexRegistry::new(store));
        let chunker = Arc::new(SlidingWindowChunker::new(config.chunking)?);
        let pipeline = IngestionPipeline::new(
            loader,
            chunker,
            Arc::clone(&registry),
            Arc::clone(&embedder),
        );
        let blender = RetrievalBlender::new(Arc::clone(&registry), embedder);

        Ok(Self {
            config,
            registry,
            pipeline,
            blender,
            llm,
        })
    }

    /// Gemini 임베딩/생성 + pdf-extract 로더로 생성
    ///
    /// 요청 한 번은 설정된 타임아웃으로 끊기고, 호출 전체는 재시도와
    /// 백오프까지 포함한 한도로 감쌉니다.
    pub fn from_config(config: RagConfig) -> Result<Self> {
        let api_key = config::get_api_key()?;

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(Timed::new(
            Arc::new(GeminiEmbedding::new(api_key.clone(), &config.embedding)?),
            config.embedding.deadline(),
        ));
        let llm: Arc<dyn LanguageModel> = Arc::new(TimedLlm::new(
            Arc::new(GeminiLlm::new(api_key, &config.llm)?),
            config.llm.deadline(),
        ));

        Self::new(config, embedder, llm, Arc::new(PdfExtractLoader))
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    /// 새 세션 (디렉토리 생성 포함)
    pub fn create_session(&self) -> Result<SessionId> {
        self.registry.store().create_session()
    }

    /// 로컬 파일 수집
    pub async fn ingest(&self, paths: &[PathBuf], ns: Namespace) -> Result<IngestReport> {
        if let Namespace::Session(id) = ns {
            self.registry.store().ensure_session_dirs(&id)?;
        }
        self.pipeline.ingest(paths, ns).await
    }

    /// 업로드 파일 저장 후 세션에 수집
    ///
    /// 세션이 없으면 새로 만듭니다. PDF가 아닌 파일이 있으면 아무것도 쓰지 않고 거부합니다.
    pub async fn upload(
        &self,
        session: Option<SessionId>,
        files: Vec<UploadedFile>,
    ) -> Result<UploadResponse> {
        if files.is_empty() {
            return Err(RagError::NoFiles);
        }

        let mut named = Vec::with_capacity(files.len());
        for file in files {
            let name = sanitize_file_name(&file.file_name)?;
            if !extractor::is_pdf(Path::new(&name)) {
                return Err(RagError::UnsupportedFileType(name));
            }
            named.push((name, file.bytes));
        }

        let (session_id, minted) = match session {
            Some(id) => {
                self.registry.store().ensure_session_dirs(&id)?;
                (id, false)
            }
            None => (self.create_session()?, true),
        };

        match self.save_and_ingest(session_id, named).await {
            Ok(report) => Ok(UploadResponse {
                session_id,
                files_ingested: report.documents,
                chunks_added: report.chunks_added,
                failed: report.failures,
            }),
            Err(e) => {
                // 응답에 세션 id가 실리지 않으므로 이번 호출이 만든 세션은 정리
                if minted {
                    if let Err(cleanup) = self.registry.delete_session(&session_id).await {
                        tracing::warn!("Failed to remove session {}: {}", session_id, cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    async fn save_and_ingest(
        &self,
        session_id: SessionId,
        named: Vec<(String, Vec<u8>)>,
    ) -> Result<IngestReport> {
        let upload_dir = self.registry.store().upload_dir(&session_id);
        let mut taken = HashSet::new();
        let mut paths = Vec::with_capacity(named.len());
        for (name, bytes) in named {
            let name = unique_file_name(&name, &upload_dir, &taken);
            let path = upload_dir.join(&name);
            tokio::fs::write(&path, &bytes).await?;
            tracing::debug!("Saved upload {} ({} bytes)", name, bytes.len());
            taken.insert(name);
            paths.push(path);
        }

        self.pipeline
            .ingest(&paths, Namespace::Session(session_id))
            .await
    }

    /// 질문 응답
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".into()));
        }
        let top_k = request.top_k.unwrap_or(self.config.retrieval.default_top_k);
        if top_k == 0 {
            return Err(RagError::InvalidInput("top_k must be at least 1".into()));
        }

        let blended = self
            .blender
            .retrieve(&BlendQuery {
                query,
                session: request.session_id,
                use_global: request.use_global,
                top_k,
            })
            .await?;

        let raw = answer::answer(self.llm.as_ref(), &blended.passages, query).await?;
        let mut text = format_answer(&raw);
        if text.is_empty() {
            tracing::warn!("Model returned an empty answer");
            text = EMPTY_ANSWER.to_string();
        }

        tracing::info!(
            "Answered query (mode={}, sources={})",
            blended.mode,
            blended.passages.len()
        );

        Ok(ChatResponse {
            answer: text,
            sources: format_sources(&blended.passages, self.config.retrieval.preview_chars),
            mode: blended.mode,
        })
    }

    /// 세션 삭제 (멱등)
    pub async fn delete_session(&self, id: &SessionId) -> Result<()> {
        self.registry.delete_session(id).await
    }

    /// 글로벌 인덱스가 없고 기본 코퍼스가 설정되어 있으면 수집
    pub async fn bootstrap_global_corpus(&self) -> Result<Option<IngestReport>> {
        let Some(corpus) = self.config.default_corpus.as_deref() else {
            return Ok(None);
        };

        if self.registry.exists(Namespace::Global).await? {
            tracing::info!("Global index already present, skipping default corpus");
            return Ok(None);
        }

        let paths = collect_pdfs(corpus)?;
        if paths.is_empty() {
            tracing::warn!("No PDF files found in default corpus {:?}", corpus);
            return Ok(None);
        }

        tracing::info!(
            "Building global index from {} file(s) in {:?}",
            paths.len(),
            corpus
        );
        let report = self.pipeline.ingest(&paths, Namespace::Global).await?;
        Ok(Some(report))
    }

    /// 데이터 디렉토리와 네임스페이스별 청크 수
    pub async fn status(&self) -> Result<ServiceStatus> {
        Ok(ServiceStatus {
            data_dir: self.config.data_dir.clone(),
            namespaces: self.registry.stats().await?,
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 업로드 파일명에서 경로 성분 제거
fn sanitize_file_name(raw: &str) -> Result<String> {
    let normalized = raw.replace('\\', "/");
    let name = normalized.rsplit('/').next().unwrap_or("").trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(RagError::InvalidInput(format!("invalid file name: {:?}", raw)));
    }
    Ok(name.to_string())
}

/// 같은 요청이나 이전 업로드와 겹치지 않는 이름 (`report.pdf` → `report-1.pdf`)
fn unique_file_name(name: &str, dir: &Path, taken: &HashSet<String>) -> String {
    let free = |candidate: &str| !taken.contains(candidate) && !dir.join(candidate).exists();
    if free(name) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    (1..)
        .map(|n| format!("{}-{}{}", stem, n, ext))
        .find(|candidate| free(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// 파일이면 그 파일, 디렉토리면 안의 PDF들 (이름순)
fn collect_pdfs(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(if extractor::is_pdf(path) {
            vec![path.to_path_buf()]
        } else {
            vec![]
        });
    }
    if !path.is_dir() {
        return Ok(vec![]);
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let p = entry?.path();
        if p.is_file() && extractor::is_pdf(&p) {
            paths.push(p);
        }
    }
    paths.sort();
    Ok(paths)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_fake_pdf, EchoLlm, FailingLlm, HashEmbedder, TextPageLoader};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> RagConfig {
        RagConfig {
            data_dir: dir.path().join("data"),
            ..Default::default()
        }
    }

    fn service_with(config: RagConfig, llm: Arc<dyn LanguageModel>) -> RagService {
        RagService::new(
            config,
            Arc::new(HashEmbedder::new(32)),
            llm,
            Arc::new(TextPageLoader),
        )
        .unwrap()
    }

    fn service(dir: &TempDir) -> (RagService, Arc<EchoLlm>) {
        let llm = Arc::new(EchoLlm::default());
        (service_with(config(dir), llm.clone()), llm)
    }

    fn pdf(name: &str, text: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            bytes: text.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_fallback_is_llm_only() {
        let dir = TempDir::new().unwrap();
        let (service, llm) = service(&dir);

        let response = service.chat(&ChatRequest::new("What is Rust?")).await.unwrap();
        assert_eq!(response.mode, AnswerMode::LlmOnly);
        assert!(response.sources.is_empty());
        assert_eq!(response.answer, "Echo What is Rust?");
        assert!(!llm.last_prompt().unwrap().contains("Context:"));
    }

    #[tokio::test]
    async fn test_upload_then_chat_uses_session() {
        let dir = TempDir::new().unwrap();
        let (service, llm) = service(&dir);

        let uploaded = service
            .upload(None, vec![pdf("notes.pdf", "rust ownership rules\x0cborrowing and lifetimes")])
            .await
            .unwrap();
        assert_eq!(uploaded.files_ingested, vec!["notes.pdf"]);
        assert_eq!(uploaded.chunks_added, 2);
        assert!(service
            .registry()
            .store()
            .upload_dir(&uploaded.session_id)
            .join("notes.pdf")
            .is_file());

        let mut request = ChatRequest::new("ownership");
        request.session_id = Some(uploaded.session_id);
        let response = service.chat(&request).await.unwrap();

        assert_eq!(response.mode, AnswerMode::SessionRag);
        assert_eq!(response.sources.len(), 2);
        assert_eq!(response.sources[0].doc_name, "notes.pdf");
        assert_eq!(response.sources[0].page, 1);
        assert!(llm.last_prompt().unwrap().contains("[notes.pdf p.1]"));
    }

    #[tokio::test]
    async fn test_upload_rejects_non_pdf_without_writing() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);
        let id = service.create_session().unwrap();

        let err = service
            .upload(Some(id), vec![pdf("a.pdf", "text"), pdf("b.docx", "text")])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFileType(_)));

        let upload_dir = service.registry().store().upload_dir(&id);
        assert_eq!(std::fs::read_dir(upload_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_strips_path_components() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);

        let uploaded = service
            .upload(None, vec![pdf("../../evil.pdf", "payload text")])
            .await
            .unwrap();
        assert_eq!(uploaded.files_ingested, vec!["evil.pdf"]);
        assert!(service
            .registry()
            .store()
            .upload_dir(&uploaded.session_id)
            .join("evil.pdf")
            .is_file());
    }

    #[tokio::test]
    async fn test_upload_without_files() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);
        assert!(matches!(
            service.upload(None, vec![]).await.unwrap_err(),
            RagError::NoFiles
        ));
    }

    #[tokio::test]
    async fn test_delete_session_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);
        let uploaded = service
            .upload(None, vec![pdf("a.pdf", "some text")])
            .await
            .unwrap();
        let id = uploaded.session_id;

        service.delete_session(&id).await.unwrap();
        service.delete_session(&id).await.unwrap();

        let store = service.registry().store();
        assert!(!store.session_namespace_path(&id).exists());
        assert!(!store.upload_dir(&id).exists());

        let mut request = ChatRequest::new("some text");
        request.session_id = Some(id);
        let response = service.chat(&request).await.unwrap();
        assert_eq!(response.mode, AnswerMode::LlmOnly);
    }

    #[tokio::test]
    async fn test_bootstrap_global_corpus() {
        let dir = TempDir::new().unwrap();
        let corpus = dir.path().join("corpus");
        std::fs::create_dir_all(&corpus).unwrap();
        write_fake_pdf(&corpus, "handbook.pdf", &["solar energy basics"]);
        std::fs::write(corpus.join("readme.txt"), "ignored").unwrap();

        let mut cfg = config(&dir);
        cfg.default_corpus = Some(corpus);
        let service = service_with(cfg, Arc::new(EchoLlm::default()));

        let report = service.bootstrap_global_corpus().await.unwrap().unwrap();
        assert_eq!(report.documents, vec!["handbook.pdf"]);

        // 두 번째 호출은 기존 인덱스를 그대로 사용
        assert!(service.bootstrap_global_corpus().await.unwrap().is_none());

        let response = service.chat(&ChatRequest::new("solar energy")).await.unwrap();
        assert_eq!(response.mode, AnswerMode::GlobalRag);

        let status = service.status().await.unwrap();
        assert_eq!(status.namespaces.len(), 1);
        assert_eq!(status.namespaces[0].namespace, "global");
        assert_eq!(status.namespaces[0].chunks, 1);
    }

    #[tokio::test]
    async fn test_chat_validation_and_transient_errors() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);
        assert!(matches!(
            service.chat(&ChatRequest::new("   ")).await.unwrap_err(),
            RagError::InvalidInput(_)
        ));

        let mut request = ChatRequest::new("hi");
        request.top_k = Some(0);
        assert!(service.chat(&request).await.is_err());

        let failing = service_with(config(&dir), Arc::new(FailingLlm));
        let err = failing.chat(&ChatRequest::new("hi")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_upload_same_name_keeps_both_files() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);

        let uploaded = service
            .upload(
                None,
                vec![pdf("a/report.pdf", "apples orchard"), pdf("b/report.pdf", "zebra giraffe")],
            )
            .await
            .unwrap();
        assert_eq!(uploaded.files_ingested, vec!["report.pdf", "report-1.pdf"]);
        assert_eq!(uploaded.chunks_added, 2);

        let upload_dir = service.registry().store().upload_dir(&uploaded.session_id);
        assert_eq!(
            std::fs::read_to_string(upload_dir.join("report.pdf")).unwrap(),
            "apples orchard"
        );

        let mut request = ChatRequest::new("apples orchard");
        request.session_id = Some(uploaded.session_id);
        request.top_k = Some(1);
        let response = service.chat(&request).await.unwrap();
        assert_eq!(response.sources[0].doc_name, "report.pdf");
        assert!(response.sources[0].preview.contains("apples"));

        // 같은 세션에 다시 올려도 이전 파일을 덮어쓰지 않음
        let again = service
            .upload(Some(uploaded.session_id), vec![pdf("report.pdf", "third copy")])
            .await
            .unwrap();
        assert_eq!(again.files_ingested, vec!["report-2.pdf"]);
    }

    #[tokio::test]
    async fn test_failed_upload_removes_new_session() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);

        let err = service
            .upload(None, vec![pdf("blank.pdf", "")])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmptyInput));

        let uploads = dir.path().join("data").join("uploads");
        let leftover = std::fs::read_dir(&uploads)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
        assert!(service.registry().store().list_namespaces().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_given_session() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);
        let id = service.create_session().unwrap();

        assert!(service.upload(Some(id), vec![pdf("blank.pdf", "")]).await.is_err());
        assert!(service.registry().store().upload_dir(&id).is_dir());
    }

    #[test]
    fn test_unique_file_name() {
        let dir = TempDir::new().unwrap();
        let mut taken = HashSet::new();
        assert_eq!(unique_file_name("a.pdf", dir.path(), &taken), "a.pdf");

        taken.insert("a.pdf".to_string());
        taken.insert("a-1.pdf".to_string());
        assert_eq!(unique_file_name("a.pdf", dir.path(), &taken), "a-2.pdf");

        std::fs::write(dir.path().join("b.pdf"), "x").unwrap();
        assert_eq!(unique_file_name("b.pdf", dir.path(), &taken), "b-1.pdf");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a.pdf").unwrap(), "a.pdf");
        assert_eq!(sanitize_file_name("C:\\docs\\b.pdf").unwrap(), "b.pdf");
        assert_eq!(sanitize_file_name("/etc/../c.pdf").unwrap(), "c.pdf");
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("dir/").is_err());
    }

    #[test]
    fn test_chat_request_defaults() {
        let request: ChatRequest = serde_json::from_str(r#"{"query":"hi"}"#).unwrap();
        assert!(request.use_global);
        assert!(request.top_k.is_none());
        assert!(request.session_id.is_none());
    }
}
