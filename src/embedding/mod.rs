//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 텍스트를 고정 길이 벡터로 변환하는 프로바이더입니다.
//! 기본 구현인 `HashEmbedding`은 문자 코드와 위치를 해싱하는 결정적 플레이스홀더이며,
//! 의미적 유사도를 반영하지 않습니다. 실제 임베딩 모델은 같은 트레이트 뒤에서 교체합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = HashEmbedding::new();
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::knowledge::{l2_normalize, EMBEDDING_DIMENSION};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
/// 구현을 바꾸면 저장된 모든 청크를 다시 임베딩해야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f64>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Hash Embedding
// ============================================================================

/// 해시 기반 결정적 임베딩
///
/// 1. 입력을 소문자로 변환합니다
/// 2. 위치 i의 UTF-16 코드 유닛 c마다 슬롯 `(c * (i + 1)) mod D`에 1을 더합니다
/// 3. 유클리드 노름으로 정규화합니다 (노름이 0이면 0 벡터 유지)
///
/// 같은 문자열은 항상 비트 단위로 동일한 벡터를 만듭니다.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    /// 기본 차원(384)으로 생성
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIMENSION,
        }
    }

    /// 차원을 지정하여 생성
    pub fn with_dimension(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0. Embedding dimension must be positive");
        }
        Ok(Self { dimension })
    }

    /// 동기 임베딩 계산
    pub fn embed_sync(&self, text: &str) -> Vec<f64> {
        hash_embedding(text, self.dimension)
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash-embedding-v1"
    }
}

/// 해시 임베딩 계산
///
/// 코드 유닛과 위치는 UTF-16 기준이므로 기존에 저장된 벡터와 호환됩니다.
pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f64> {
    let mut embedding = vec![0.0; dimension];
    if dimension == 0 {
        return embedding;
    }

    let lowered = text.to_lowercase();
    for (i, code) in lowered.encode_utf16().enumerate() {
        let slot = (u64::from(code) * (i as u64 + 1)) % dimension as u64;
        embedding[slot as usize] += 1.0;
    }

    l2_normalize(&mut embedding);
    embedding
}

// ============================================================================
// Factory Function
// ============================================================================

/// 기본 임베딩 프로바이더 생성
pub fn create_embedder() -> HashEmbedding {
    let embedder = HashEmbedding::new();
    tracing::info!(
        "Using {} (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    embedder
}

// ============================================================================
// Tests
// ============================================================================
