//! 에러 타입
//!
//! 수집/검색/응답 경로에서 공통으로 쓰는 에러 분류입니다.
//! HTTP 계층에서는 `IntoResponse`로 구조화된 JSON 에러가 됩니다.

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// 크레이트 공통 Result
pub type Result<T> = std::result::Result<T, RagError>;

/// RAG 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// PDF가 아닌 업로드 (I/O 이전에 거부)
    #[error("Unsupported file type: {0} (only .pdf is accepted)")]
    UnsupportedFileType(String),

    /// 로더가 PDF를 해석하지 못함
    #[error("Failed to read PDF '{file}': {reason}")]
    UnreadablePdf { file: String, reason: String },

    /// 청크 0개로 인덱스 생성 시도
    #[error("Cannot build an index from zero chunks")]
    EmptyInput,

    /// 인덱스 없음 (내부 신호)
    #[error("No index found at {0}")]
    IndexNotFound(PathBuf),

    /// 네트워크/타임아웃 등 재시도 가능한 외부 서비스 실패
    #[error("{service} temporarily unavailable: {message}")]
    TransientService { service: String, message: String },

    /// 재시도해도 소용없는 외부 서비스 실패
    #[error("{service} error: {message}")]
    Service { service: String, message: String },

    /// 인덱스와 다른 임베딩 모델/차원
    #[error("Embedding mismatch: index uses {expected}, got {actual}")]
    EmbeddingMismatch { expected: String, actual: String },

    /// 벡터 파일과 docstore가 서로 맞지 않음
    #[error("Corrupt index at {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("Invalid session id: {0}")]
    InvalidSession(String),

    #[error("No files uploaded")]
    NoFiles,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Docstore error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// 재시도 가능한 외부 서비스 에러 생성
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// 영구적인 외부 서비스 에러 생성
    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn unreadable_pdf(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnreadablePdf {
            file: file.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// 백오프 후 재시도해도 되는 에러인지
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientService { .. })
    }

    /// 응답 JSON의 `kind` 필드
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedFileType(_) => "unsupported_file_type",
            Self::UnreadablePdf { .. } => "unreadable_pdf",
            Self::EmptyInput => "empty_input",
            Self::IndexNotFound(_) => "index_not_found",
            Self::TransientService { .. } => "transient_service",
            Self::Service { .. } => "service",
            Self::EmbeddingMismatch { .. } => "embedding_mismatch",
            Self::CorruptIndex { .. } => "corrupt_index",
            Self::InvalidSession(_) => "invalid_session",
            Self::NoFiles => "no_files",
            Self::InvalidInput(_) => "invalid_input",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Storage(_) => "storage",
            Self::Json(_) => "json",
        }
    }

    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedFileType(_)
            | Self::UnreadablePdf { .. }
            | Self::EmptyInput
            | Self::InvalidSession(_)
            | Self::NoFiles
            | Self::InvalidInput(_)
            | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::IndexNotFound(_) => StatusCode::NOT_FOUND,
            Self::TransientService { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Service { .. } => StatusCode::BAD_GATEWAY,
            Self::EmbeddingMismatch { .. }
            | Self::CorruptIndex { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(RagError::transient("gemini", "timeout").is_retryable());
        assert!(!RagError::service("gemini", "bad request").is_retryable());
        assert!(!RagError::EmptyInput.is_retryable());
        assert!(!RagError::UnsupportedFileType("a.txt".into()).is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            RagError::UnsupportedFileType("a.docx".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(RagError::NoFiles.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            RagError::transient("llm", "down").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            RagError::service("llm", "quota").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RagError::IndexNotFound(PathBuf::from("x")).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(RagError::EmptyInput.kind(), "empty_input");
        assert_eq!(
            RagError::unreadable_pdf("a.pdf", "broken xref").kind(),
            "unreadable_pdf"
        );
    }
}
