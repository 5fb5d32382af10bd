//! Gemini Vision OCR 모듈
//!
//! 스캔된 PDF나 사진을 Gemini Vision API에 인라인으로 보내 텍스트를 추출합니다.
//! tesseract가 없는 환경에서 대체 OCR 엔진으로 사용합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use super::ocr::OcrEngine;
use super::sniff_mime_type;

/// 기본 Vision 모델
pub const DEFAULT_VISION_MODEL: &str = "gemini-2.0-flash";

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// 인라인 데이터 최대 크기 (Gemini 요청 한도 20MB)
const MAX_INLINE_BYTES: usize = 20 * 1024 * 1024;

/// 텍스트 추출 프롬프트
const EXTRACTION_PROMPT: &str = r#"Extract all text content from this document.

Instructions:
1. Transcribe every piece of visible text, including handwriting
2. Include text from diagrams, tables, formulas and code
3. Preserve the original reading order and line structure
4. Output plain text only, without commentary
5. If there is no text, respond with an empty message"#;

/// Gemini Vision 기반 OCR 엔진
#[derive(Debug)]
pub struct VisionOcr {
    api_key: String,
    url: String,
    client: reqwest::Client,
}

impl VisionOcr {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            url: format!("{}/{}:generateContent", GEMINI_API_BASE, model),
            client,
        })
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    async fn recognize(&self, bytes: &[u8]) -> Result<String> {
        let mime_type = sniff_mime_type(bytes)
            .ok_or_else(|| anyhow::anyhow!("Unsupported file format for Vision OCR"))?;

        if bytes.len() > MAX_INLINE_BYTES {
            anyhow::bail!(
                "File too large for Vision OCR: {} bytes (max {})",
                bytes.len(),
                MAX_INLINE_BYTES
            );
        }

        let request = build_request(mime_type, bytes);

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send Vision API request")?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            anyhow::bail!("Vision API error ({}): {}", status, body);
        }

        let vision_response: VisionResponse =
            serde_json::from_str(&body).context("Failed to parse Vision API response")?;

        let text = vision_response.into_text();
        if text.is_empty() {
            tracing::warn!("No text recognized by Vision OCR ({})", mime_type);
        }

        Ok(text)
    }

    fn name(&self) -> &str {
        "gemini-vision"
    }
}

fn build_request(mime_type: &str, bytes: &[u8]) -> VisionRequest {
    VisionRequest {
        contents: vec![VisionContent {
            parts: vec![
                VisionPart::Text {
                    text: EXTRACTION_PROMPT.to_string(),
                },
                VisionPart::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.to_string(),
                        data: STANDARD.encode(bytes),
                    },
                },
            ],
        }],
        generation_config: VisionGenerationConfig {
            temperature: 0.1,
            max_output_tokens: 8192,
        },
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct VisionRequest {
    contents: Vec<VisionContent>,
    #[serde(rename = "generationConfig")]
    generation_config: VisionGenerationConfig,
}

#[derive(Debug, Serialize)]
struct VisionContent {
    parts: Vec<VisionPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum VisionPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct VisionGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct VisionResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl VisionResponse {
    /// 첫 후보의 텍스트 파트를 이어 붙임
    fn into_text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    text: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
