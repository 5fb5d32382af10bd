//! 콘텐츠 추출 모듈
//!
//! 업로드된 파일 바이트에서 텍스트를 추출합니다.
//! - 교재(book): pdf-extract로 직접 추출, 실패하거나 비어 있으면 OCR로 폴백
//! - 노트/기출(notes, pyq): 스캔본이므로 바로 OCR
//!
//! OCR 자체가 실패하면 에러를 반환하고, 호출 측이 문서를 failed로 표시합니다.

pub mod image;
pub mod ocr;
pub mod pdf;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::knowledge::DocumentKind;

pub use image::VisionOcr;
pub use ocr::{OcrEngine, TesseractOcr, UnavailableOcr};
pub use pdf::PdfTextExtractor;

// ============================================================================
// Traits & Types
// ============================================================================

/// 직접 텍스트 추출기 (동기, CPU 바운드)
pub trait TextExtractor: Send + Sync {
    /// 파일 바이트에서 텍스트 추출
    fn extract(&self, bytes: &[u8]) -> Result<String>;

    /// 추출기 이름
    fn name(&self) -> &str;
}

/// 텍스트를 얻은 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Direct,
    Ocr,
}

/// 추출된 콘텐츠
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// 추출된 텍스트 (페이지는 폼피드로 구분될 수 있음)
    pub text: String,
    pub method: ExtractionMethod,
}

// ============================================================================
// OCR Configuration
// ============================================================================

/// OCR 엔진 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineKind {
    /// 로컬 tesseract 실행 파일
    #[default]
    Tesseract,
    /// Gemini Vision API
    Gemini,
}

/// OCR 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub engine: OcrEngineKind,
    /// tesseract 실행 파일
    pub command: String,
    /// tesseract 언어 코드
    pub language: String,
    /// PDF 페이지 래스터화 실행 파일 (pdftoppm 호환)
    pub pdf_rasterizer: String,
    pub timeout_secs: u64,
    /// Gemini API 키 (환경변수에서 주입)
    #[serde(skip_serializing)]
    pub gemini_api_key: Option<String>,
    pub vision_model: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: OcrEngineKind::Tesseract,
            command: "tesseract".to_string(),
            language: "eng".to_string(),
            pdf_rasterizer: "pdftoppm".to_string(),
            timeout_secs: 120,
            gemini_api_key: None,
            vision_model: image::DEFAULT_VISION_MODEL.to_string(),
        }
    }
}

impl OcrConfig {
    /// 비어 있지 않은 Gemini API 키
    fn gemini_key(&self) -> Option<String> {
        self.gemini_api_key.clone().filter(|k| !k.trim().is_empty())
    }

    /// 설정된 엔진이 인식을 수행할 수 있는지 확인
    ///
    /// 질의만 하는 경로는 OCR을 쓰지 않으므로 업로드 전에만 호출합니다.
    pub fn ensure_ready(&self) -> Result<()> {
        match self.engine {
            OcrEngineKind::Tesseract => Ok(()),
            OcrEngineKind::Gemini => self
                .gemini_key()
                .map(|_| ())
                .ok_or_else(|| anyhow::anyhow!(MISSING_GEMINI_KEY)),
        }
    }
}

const MISSING_GEMINI_KEY: &str =
    "GEMINI_API_KEY or GOOGLE_AI_API_KEY is required for the gemini OCR engine";

// ============================================================================
// Content Extractor
// ============================================================================

/// 콘텐츠 추출기
pub struct ContentExtractor {
    direct: Arc<dyn TextExtractor>,
    ocr: Arc<dyn OcrEngine>,
}

impl ContentExtractor {
    /// 추출기와 OCR 엔진을 지정하여 생성
    pub fn new(direct: Arc<dyn TextExtractor>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self { direct, ocr }
    }

    /// 설정에서 생성 (PDF 직접 추출 + 설정된 OCR 엔진)
    ///
    /// Gemini 키가 없으면 인식 시점에 실패하는 엔진으로 대체합니다.
    pub fn from_config(config: &OcrConfig) -> Result<Self> {
        let ocr: Arc<dyn OcrEngine> = match (config.engine, config.gemini_key()) {
            (OcrEngineKind::Tesseract, _) => Arc::new(TesseractOcr::from_config(config)),
            (OcrEngineKind::Gemini, Some(api_key)) => {
                Arc::new(VisionOcr::new(api_key, config.vision_model.clone())?)
            }
            (OcrEngineKind::Gemini, None) => {
                tracing::warn!("Gemini OCR selected without an API key; OCR uploads will fail");
                Arc::new(UnavailableOcr::new("gemini", MISSING_GEMINI_KEY))
            }
        };

        tracing::debug!("Content extractor using OCR engine: {}", ocr.name());
        Ok(Self::new(Arc::new(PdfTextExtractor::new()), ocr))
    }

    /// 문서 종류에 따라 텍스트 추출
    pub async fn extract(&self, bytes: &[u8], kind: DocumentKind) -> Result<ExtractedContent> {
        if kind.prefers_direct_extraction() {
            // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용 (패닉도 여기서 격리)
            let direct = Arc::clone(&self.direct);
            let owned = bytes.to_vec();
            let outcome = tokio::task::spawn_blocking(move || direct.extract(&owned)).await;

            match outcome {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    return Ok(ExtractedContent {
                        text,
                        method: ExtractionMethod::Direct,
                    });
                }
                Ok(Ok(_)) => {
                    tracing::info!("Direct extraction found no text, falling back to OCR");
                }
                Ok(Err(e)) => {
                    tracing::warn!("Direct PDF extraction failed, falling back to OCR: {:#}", e);
                }
                Err(e) => {
                    tracing::warn!("Direct PDF extraction aborted, falling back to OCR: {}", e);
                }
            }
        }

        let text = self
            .ocr
            .recognize(bytes)
            .await
            .with_context(|| format!("OCR failed ({})", self.ocr.name()))?;

        Ok(ExtractedContent {
            text,
            method: ExtractionMethod::Ocr,
        })
    }
}

// ============================================================================
// Format Detection
// ============================================================================

/// 매직 바이트로 MIME 타입 추정
pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        Some("application/pdf")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.starts_with(b"BM") {
        Some("image/bmp")
    } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        Some("image/tiff")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// MIME 타입에 대응하는 파일 확장자
pub fn extension_for(mime: Option<&str>) -> &'static str {
    match mime {
        Some("application/pdf") => "pdf",
        Some("image/png") => "png",
        Some("image/jpeg") => "jpg",
        Some("image/gif") => "gif",
        Some("image/bmp") => "bmp",
        Some("image/tiff") => "tif",
        Some("image/webp") => "webp",
        _ => "bin",
    }
}

// ============================================================================
// Tests
// ============================================================================
