//! 설정 모듈
//!
//! 기본값 위에 환경변수를 덮어써서 `RagConfig`를 만듭니다.
//! 코어 로직은 환경변수를 직접 읽지 않고 이 구조체만 전달받습니다.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::gemini;
use crate::knowledge::ChunkConfig;

// ============================================================================
// Data Directory
// ============================================================================

/// 기본 데이터 디렉토리 (~/.pdf-chat-rag/)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pdf-chat-rag")
}

// ============================================================================
// Config Types
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// 인덱스/업로드 루트
    pub data_dir: PathBuf,
    pub chunking: ChunkConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
    /// 시작 시 글로벌 네임스페이스로 수집할 PDF 파일 또는 디렉토리
    #[serde(default)]
    pub default_corpus: Option<PathBuf>,
}

/// 임베딩 서비스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    /// 분당 요청 수 (Gemini 무료 티어 기준)
    pub requests_per_minute: u32,
    /// 429/5xx 재시도 횟수
    pub max_retries: u32,
}

/// 언어 모델 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// 검색 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    /// 출처 미리보기 길이 (문자 수)
    pub preview_chars: usize,
}

/// HTTP 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunking: ChunkConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            server: ServerConfig::default(),
            default_corpus: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "gemini-embedding-001".to_string(),
            dimension: 768,
            timeout_secs: 30,
            requests_per_minute: 60,
            max_retries: 3,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.0,
            max_output_tokens: 1024,
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 4,
            preview_chars: 200,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl EmbeddingConfig {
    /// HTTP 요청 한 번의 타임아웃
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 호출 전체 한도 (재시도와 백오프 포함)
    pub fn deadline(&self) -> Duration {
        gemini::retry_deadline(self.timeout(), self.max_retries)
    }
}

impl LlmConfig {
    /// HTTP 요청 한 번의 타임아웃
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 호출 전체 한도 (재시도와 백오프 포함)
    pub fn deadline(&self) -> Duration {
        gemini::retry_deadline(self.timeout(), self.max_retries)
    }
}

// ============================================================================
// Loading
// ============================================================================

impl RagConfig {
    /// 기본값에 환경변수를 덮어써서 생성
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_var("PDFRAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(host) = env_var("PDFRAG_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_var("PDFRAG_PORT") {
            config.server.port = parse_var("PDFRAG_PORT", &port)?;
        }
        if let Some(corpus) = env_var("PDFRAG_DEFAULT_CORPUS") {
            config.default_corpus = Some(PathBuf::from(corpus));
        }
        if let Some(model) = env_var("PDFRAG_EMBED_MODEL") {
            config.embedding.model = model;
        }
        if let Some(model) = env_var("PDFRAG_LLM_MODEL") {
            config.llm.model = model;
        }
        if let Some(size) = env_var("PDFRAG_CHUNK_SIZE") {
            config.chunking.chunk_size = parse_var("PDFRAG_CHUNK_SIZE", &size)?;
        }
        if let Some(overlap) = env_var("PDFRAG_CHUNK_OVERLAP") {
            config.chunking.chunk_overlap = parse_var("PDFRAG_CHUNK_OVERLAP", &overlap)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;

        if self.embedding.dimension == 0 {
            return Err(RagError::Config("embedding.dimension must be > 0".into()));
        }
        if self.embedding.timeout_secs == 0 || self.llm.timeout_secs == 0 {
            return Err(RagError::Config("service timeouts must be > 0".into()));
        }
        if self.retrieval.default_top_k == 0 {
            return Err(RagError::Config("retrieval.default_top_k must be > 0".into()));
        }
        Ok(())
    }

    /// 네임스페이스 인덱스 루트
    pub fn index_root(&self) -> PathBuf {
        self.data_dir.join("indexes")
    }

    /// 업로드 파일 루트
    pub fn upload_root(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RagError::Config(format!("{} has an invalid value: {:?}", name, value)))
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    for name in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Some(key) = env_var(name) {
            tracing::debug!("Using API key from {}", name);
            return Ok(key);
        }
    }

    Err(RagError::Config(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
            .to_string(),
    ))
}

/// API 키 존재 여부
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Tests
// ============================================================================
