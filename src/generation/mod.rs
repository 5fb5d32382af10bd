//! 답변 생성 모듈
//!
//! 검색된 강의자료 청크를 문맥으로 텍스트 생성 모델을 호출합니다.
//! - `HuggingFaceGenerator`: API 키가 설정된 경우 Hugging Face Inference API 사용
//! - `FallbackGenerator`: 키가 없을 때 문맥 요약으로 결정적 답변 생성
//!
//! 어떤 구현을 쓸지는 생성 시점(`create_generator`)에 한 번만 결정하며,
//! 호출 측은 자격 증명 유무로 분기하지 않습니다.

pub mod huggingface;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use huggingface::HuggingFaceGenerator;

/// 기본 생성 모델
pub const DEFAULT_MODEL: &str = "microsoft/Phi-3-mini-4k-instruct";

/// Hugging Face Inference API 기본 엔드포인트
pub const DEFAULT_ENDPOINT: &str = "https://api-inference.huggingface.co/models";

/// 문맥 토큰 예산 (약 1500 단어)
pub const MAX_CONTEXT_TOKENS: usize = 2000;

/// 단어 당 토큰 추정치
const TOKENS_PER_WORD: f64 = 1.3;

/// 폴백 답변에 포함할 스니펫 수
const FALLBACK_SNIPPETS: usize = 2;

/// 폴백 스니펫 최대 길이 (UTF-16 코드 단위)
const FALLBACK_SNIPPET_UNITS: usize = 200;

const NO_CONTEXT_RESPONSE: &str = "I don't have enough information in the uploaded course materials to answer this question. Please upload relevant documents first.";

// ============================================================================
// Configuration
// ============================================================================

/// 생성 파라미터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 500,
            temperature: 0.7,
            top_p: 0.95,
        }
    }
}

/// 생성 서비스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// API 키 (환경변수 HF_API_KEY에서 주입, 파일에는 저장하지 않음)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub max_context_tokens: usize,
    pub timeout_secs: u64,
    pub params: GenerationParams,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_context_tokens: MAX_CONTEXT_TOKENS,
            timeout_secs: 60,
            params: GenerationParams::default(),
        }
    }
}

impl GenerationConfig {
    /// 유효한 API 키가 있는지
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}

// ============================================================================
// GenerationService Trait
// ============================================================================

/// 텍스트 생성 서비스
///
/// 실패는 에러로 전파하지 않고 항상 비어 있지 않은 답변으로 해소합니다.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// 질문과 문맥 스니펫으로 답변 생성
    async fn generate(&self, query: &str, context: &[String], params: &GenerationParams)
        -> String;

    /// 서비스 이름
    fn name(&self) -> &str;

    /// 실제 모델을 호출하는지 여부
    fn is_live(&self) -> bool;
}

// ============================================================================
// Fallback Generator
// ============================================================================

/// 모델 없이 문맥을 요약하는 폴백 생성기
#[derive(Debug, Clone, Default)]
pub struct FallbackGenerator;

#[async_trait]
impl GenerationService for FallbackGenerator {
    async fn generate(
        &self,
        _query: &str,
        context: &[String],
        _params: &GenerationParams,
    ) -> String {
        fallback_response(context)
    }

    fn name(&self) -> &str {
        "fallback"
    }

    fn is_live(&self) -> bool {
        false
    }
}

/// 결정적 폴백 답변
///
/// 문맥이 없으면 자료 부족 안내를, 있으면 앞의 두 스니펫을
/// UTF-16 코드 단위 200개로 잘라 보여줍니다.
pub fn fallback_response(context: &[String]) -> String {
    if context.is_empty() {
        return NO_CONTEXT_RESPONSE.to_string();
    }

    let snippets = context
        .iter()
        .take(FALLBACK_SNIPPETS)
        .enumerate()
        .map(|(i, c)| {
            format!("{}. {}...", i + 1, truncate_utf16(c, FALLBACK_SNIPPET_UNITS))
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Based on your course materials, here are the most relevant sections I found:\n\n\
         {}\n\n\
         Note: For more accurate AI-generated responses, please configure the Hugging Face API key in your environment variables (HF_API_KEY).",
        snippets
    )
}

/// UTF-16 코드 단위 기준으로 자르기
///
/// 서로게이트 쌍이 경계에 걸치면 그 문자는 통째로 제외합니다.
fn truncate_utf16(text: &str, max_units: usize) -> &str {
    let mut units = 0;
    for (idx, ch) in text.char_indices() {
        units += ch.len_utf16();
        if units > max_units {
            return &text[..idx];
        }
    }
    text
}

// ============================================================================
// Prompt Helpers
// ============================================================================

/// 문맥을 토큰 예산에 맞게 결합
///
/// 토큰 수는 `단어 수 × 1.3`으로 추정합니다.
/// 예산을 넘으면 앞에서부터 `floor(예산 / 1.3)` 단어만 남기고 `...`을 붙입니다.
pub fn budget_context(context: &[String], max_tokens: usize) -> String {
    let text = context.join("\n\n");
    let words: Vec<&str> = text.split_whitespace().collect();
    let approx_tokens = words.len() as f64 * TOKENS_PER_WORD;

    if approx_tokens <= max_tokens as f64 {
        return text;
    }

    let target = ((max_tokens as f64 / TOKENS_PER_WORD).floor() as usize).min(words.len());
    tracing::debug!(
        "Context over budget (~{} tokens), keeping {} words",
        approx_tokens as usize,
        target
    );
    format!("{}...", words[..target].join(" "))
}

/// Phi-3 채팅 템플릿 프롬프트
pub fn build_prompt(query: &str, context_text: &str) -> String {
    format!(
        "<|system|>\n\
         You are a helpful AI tutor assistant for BTech students. Answer questions based on the provided course materials.<|end|>\n\
         <|user|>\n\
         Context from course materials:\n\
         {}\n\
         \n\
         Question: {}<|end|>\n\
         <|assistant|>",
        context_text, query
    )
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 따라 생성 서비스 선택
///
/// API 키가 있으면 Hugging Face, 없으면 폴백 생성기를 사용합니다.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerationService>> {
    if config.has_api_key() {
        let generator = HuggingFaceGenerator::new(config)?;
        tracing::info!("Using Hugging Face generation (model: {})", config.model);
        Ok(Arc::new(generator))
    } else {
        tracing::info!("HF_API_KEY not set, using fallback responses");
        Ok(Arc::new(FallbackGenerator))
    }
}

// ============================================================================
// Tests
// ============================================================================
