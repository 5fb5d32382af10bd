//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 디지털 PDF에서 텍스트를 추출합니다.
//! 페이지 경계는 폼피드(`\x0c`)로 정규화하여 청크의 페이지 번호 계산에 사용합니다.

use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::knowledge::PAGE_SEPARATOR;

use super::TextExtractor;

/// "--- Page 3 ---" 형태의 페이지 구분 줄
const PAGE_MARKER_PATTERN: &str = r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$";

/// pdf-extract 기반 직접 추출기
#[derive(Debug, Clone, Default)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .context("Failed to extract text from PDF")?;

        // 텍스트가 비어있으면 스캔본일 가능성
        if text.trim().is_empty() {
            tracing::warn!("No text layer in PDF. It might be a scanned document.");
            return Ok(String::new());
        }

        let pages = split_pdf_pages(&text);
        tracing::debug!("Extracted {} pages from PDF", pages.len());

        Ok(pages.join(&PAGE_SEPARATOR.to_string()))
    }

    fn name(&self) -> &str {
        "pdf-extract"
    }
}

fn page_marker() -> Option<&'static Regex> {
    static PAGE_MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    PAGE_MARKER
        .get_or_init(|| Regex::new(PAGE_MARKER_PATTERN).ok())
        .as_ref()
}

/// PDF 텍스트를 페이지별로 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)로 페이지 분리 시도
    let pages: Vec<String> = text
        .split(PAGE_SEPARATOR)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    // 페이지 구분자 패턴으로 시도 (일부 PDF에서 사용)
    if let Some(marker) = page_marker() {
        if marker.is_match(text) {
            let pages: Vec<String> = marker
                .split(text)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();

            if pages.len() > 1 {
                return pages;
            }
        }
    }

    // 분리 실패 - 전체를 하나의 페이지로
    vec![text.trim().to_string()]
}

// ============================================================================
// Tests
// ============================================================================
