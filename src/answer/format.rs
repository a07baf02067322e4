//! 응답 정리 + 출처 패키징

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::knowledge::RetrievedPassage;

/// 응답에 표시할 출처
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub doc_name: String,
    pub page: u32,
    pub score: f32,
    /// UI 표시용 미리보기 (잘릴 수 있음)
    pub preview: String,
}

fn markup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[*_#>`~]+").expect("Invalid regex"))
}

/// 모델 원문 정리
///
/// 마크다운 기호 제거, 공백(줄바꿈 포함) 연속을 한 칸으로, 앞뒤 공백 제거.
/// 이미 정리된 텍스트에는 변화가 없습니다.
pub fn format_answer(raw: &str) -> String {
    markup_pattern()
        .replace_all(raw, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 구절 → 출처 목록 (블렌딩 순서 유지)
pub fn format_sources(passages: &[RetrievedPassage], preview_chars: usize) -> Vec<Source> {
    passages
        .iter()
        .map(|p| Source {
            doc_name: p.chunk.doc_name.clone(),
            page: p.chunk.page,
            score: p.score,
            preview: truncate_text(&p.chunk.text, preview_chars),
        })
        .collect()
}

/// 텍스트 자르기 (UTF-8 안전, 공백 평탄화)
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if cleaned.chars().count() <= max_chars {
        cleaned
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Namespace, SessionId};
    use crate::testing::chunk;

    #[test]
    fn test_format_answer_strips_markup() {
        let raw = "## Answer\n\n**Rust** is a _systems_ language.\n> quoted `code` ~~x~~";
        assert_eq!(
            format_answer(raw),
            "Answer Rust is a systems language. quoted code x"
        );
    }

    #[test]
    fn test_format_answer_is_idempotent() {
        for raw in [
            "",
            "   ",
            "plain",
            "  a \n\n b\t\tc  ",
            "**bold** * lone star * __x__",
            "# 제목\n본문 *강조*",
            "> > nested\n> quote",
        ] {
            let once = format_answer(raw);
            assert_eq!(format_answer(&once), once, "input: {:?}", raw);
        }
    }

    #[test]
    fn test_format_answer_collapses_whitespace() {
        assert_eq!(format_answer("a\n\nb   c\r\nd"), "a b c d");
        assert_eq!(format_answer("  * "), "");
    }

    #[test]
    fn test_format_sources_keeps_order_and_exact_fields() {
        let session = Namespace::Session(SessionId::new());
        let long = "word ".repeat(100);
        let passages = vec![
            RetrievedPassage {
                chunk: chunk("s.pdf", 7, 0, &long),
                score: 0.42,
                namespace: session,
            },
            RetrievedPassage {
                chunk: chunk("g.pdf", 1, 3, "short"),
                score: 0.91,
                namespace: Namespace::Global,
            },
        ];

        let sources = format_sources(&passages, 20);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].doc_name, "s.pdf");
        assert_eq!(sources[0].page, 7);
        assert_eq!(sources[0].score, 0.42);
        assert_eq!(sources[0].preview, format!("{}...", &long[..20]));
        assert_eq!(sources[1].doc_name, "g.pdf");
        assert_eq!(sources[1].preview, "short");
    }

    #[test]
    fn test_truncate_text_multibyte() {
        assert_eq!(truncate_text("안녕하세요 세계", 3), "안녕하...");
        assert_eq!(truncate_text("line\nbreak", 50), "line break");
    }
}
