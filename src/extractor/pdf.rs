//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 페이지별 텍스트를 추출합니다.

use std::path::Path;

use crate::error::{RagError, Result};

/// PDF에서 페이지별 텍스트 추출
///
/// (페이지 번호, 텍스트) 벡터를 반환합니다. 페이지 번호는 1부터 시작하며,
/// 빈 페이지도 번호를 유지하기 위해 제거하지 않습니다.
pub fn extract_pages(path: &Path) -> Result<Vec<(u32, String)>> {
    let name = super::file_name(path);

    let bytes = std::fs::read(path)
        .map_err(|e| RagError::unreadable_pdf(&name, format!("failed to read file: {}", e)))?;

    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .map_err(|e| RagError::unreadable_pdf(&name, e.to_string()))?;

    if pages.iter().all(|page| page.trim().is_empty()) {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
    }

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, page)| (i as u32 + 1, page.trim().to_string()))
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
