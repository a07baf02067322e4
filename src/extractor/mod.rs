//! 콘텐츠 추출 모듈
//!
//! PDF 파일을 페이지 단위 텍스트로 읽어들입니다.
//! 텍스트 추출 자체는 `pdf-extract`에 위임합니다.

pub mod pdf;

use std::path::Path;
use std::sync::Arc;

use crate::error::{RagError, Result};

// ============================================================================
// Loaded Document
// ============================================================================

/// 로더가 반환한 한 페이지
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 페이지 번호 (로더 기준, 인용 시 그대로 사용)
    pub number: u32,
    pub text: String,
}

/// 로드된 문서
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// 파일명
    pub name: String,
    /// 페이지 순서대로
    pub pages: Vec<Page>,
}

// ============================================================================
// Page Loader
// ============================================================================

/// 페이지 로더 트레이트 (동기, CPU 바운드)
pub trait PageLoader: Send + Sync {
    /// 파일을 (페이지 번호, 텍스트) 시퀀스로 로드
    fn load(&self, path: &Path) -> Result<Document>;
}

/// pdf-extract 기반 기본 로더
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractLoader;

impl PageLoader for PdfExtractLoader {
    fn load(&self, path: &Path) -> Result<Document> {
        let name = file_name(path);
        let pages = pdf::extract_pages(path)?;

        Ok(Document {
            name,
            pages: pages
                .into_iter()
                .map(|(number, text)| Page { number, text })
                .collect(),
        })
    }
}

/// PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
///
/// pdf-extract가 손상된 파일에서 panic 하는 경우도 `UnreadablePdf`로 변환합니다.
pub async fn load_blocking(loader: Arc<dyn PageLoader>, path: &Path) -> Result<Document> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || loader.load(&owned))
        .await
        .map_err(|e| RagError::unreadable_pdf(file_name(path), format!("loader crashed: {}", e)))?
}

/// 확장자가 .pdf 인지 (대소문자 무시)
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// 경로의 마지막 구성요소
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ============================================================================
// Tests
// ============================================================================
