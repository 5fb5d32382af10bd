//! Hugging Face Inference API 생성기
//!
//! ref: https://huggingface.co/docs/api-inference/tasks/text-generation

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    budget_context, build_prompt, fallback_response, GenerationConfig, GenerationParams,
    GenerationService,
};

/// Hugging Face 텍스트 생성 구현체
///
/// 전송 실패, 2xx 이외 응답, 빈 출력은 모두 폴백 답변으로 해소합니다.
#[derive(Debug)]
pub struct HuggingFaceGenerator {
    api_key: String,
    model: String,
    url: String,
    max_context_tokens: usize,
    client: reqwest::Client,
}

impl HuggingFaceGenerator {
    /// 설정으로 생성
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Hugging Face API key is not configured"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model: config.model.clone(),
            url: format!("{}/{}", config.endpoint.trim_end_matches('/'), config.model),
            max_context_tokens: config.max_context_tokens,
            client,
        })
    }

    /// API 호출 (실패 시 에러 반환)
    async fn try_generate(
        &self,
        query: &str,
        context: &[String],
        params: &GenerationParams,
    ) -> Result<String> {
        let context_text = budget_context(context, self.max_context_tokens);
        let prompt = build_prompt(query, &context_text);

        let request = GenerateRequest {
            inputs: &prompt,
            parameters: RequestParameters {
                max_new_tokens: params.max_new_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
                return_full_text: false,
            },
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.trim())
            .json(&request)
            .send()
            .await
            .context("Failed to send generation request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<InferenceError>(&body) {
                anyhow::bail!("Hugging Face API error ({}): {}", status, error.error);
            }
            anyhow::bail!("Hugging Face API error ({}): {}", status, body);
        }

        let outputs: Vec<GeneratedText> =
            serde_json::from_str(&body).context("Failed to parse generation response")?;

        Ok(outputs
            .into_iter()
            .next()
            .map(|o| o.generated_text.trim().to_string())
            .unwrap_or_default())
    }
}

#[async_trait]
impl GenerationService for HuggingFaceGenerator {
    async fn generate(
        &self,
        query: &str,
        context: &[String],
        params: &GenerationParams,
    ) -> String {
        match self.try_generate(query, context, params).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => {
                tracing::warn!("Empty generation from {}, using fallback", self.model);
                fallback_response(context)
            }
            Err(e) => {
                tracing::warn!("Generation failed, using fallback: {:#}", e);
                fallback_response(context)
            }
        }
    }

    fn name(&self) -> &str {
        &self.model
    }

    fn is_live(&self) -> bool {
        true
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: RequestParameters,
}

#[derive(Debug, Serialize)]
struct RequestParameters {
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

#[derive(Debug, Deserialize)]
struct InferenceError {
    error: String,
}

// ============================================================================
// Tests
// ============================================================================
