//! Vector Search - 청크 타입, 코사인 유사도, 정확한 Top-K 검색
//!
//! 근사 인덱스(ANN) 없이 후보 풀 전체를 선형 스캔합니다.
//! 사용자 단위 문서 집합 규모에서는 O(풀 크기 × 차원)으로 충분합니다.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// 임베딩 벡터 차원
pub const EMBEDDING_DIMENSION: usize = 384;

/// 질의 당 기본 검색 결과 수
pub const DEFAULT_TOP_K: usize = 5;

// ============================================================================
// Types
// ============================================================================

/// 문서 청크 (검색 단위)
///
/// 수집 시 한 번 생성되고 이후 변경되지 않습니다.
/// 소유 문서가 삭제되면 함께 삭제됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    /// 소유 문서 ID
    pub document_id: String,
    pub text: String,
    /// 0 벡터 또는 L2 정규화된 벡터
    pub embedding: Vec<f64>,
    /// 청크 첫 단어가 위치한 페이지 (1부터 시작)
    pub page: Option<u32>,
}

/// 저장 전 청크
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub text: String,
    pub embedding: Vec<f64>,
    pub page: Option<u32>,
}

/// 후보 풀 엔트리 (청크 + 소유 문서의 과목)
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk: DocumentChunk,
    pub course: String,
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk: DocumentChunk,
    pub course: String,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub similarity: f64,
}

// ============================================================================
// Similarity
// ============================================================================

/// 코사인 유사도 계산
///
/// 길이가 다르거나 비어 있거나 한쪽 노름이 0이면 0.0을 반환합니다.
/// 검색 전체를 실패시키지 않기 위해 에러 대신 0을 사용합니다.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// 유클리드 노름
pub fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// 제자리 L2 정규화 (노름이 0이면 그대로 둠)
pub fn l2_normalize(v: &mut [f64]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ============================================================================
// Top-K Search
// ============================================================================

/// 정확한 Top-K 유사도 검색
///
/// 1. `scope`가 있으면 해당 과목 문서의 청크만 남깁니다
/// 2. 각 후보를 코사인 유사도로 점수화합니다
/// 3. 점수 내림차순으로 정렬합니다 (안정 정렬: 동점은 풀 순서 유지)
/// 4. 앞에서 `k`개만 반환합니다
pub fn search(
    query: &[f64],
    pool: &[IndexedChunk],
    k: usize,
    scope: Option<&str>,
) -> Vec<SearchResult> {
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(f64, &IndexedChunk)> = pool
        .iter()
        .filter(|entry| scope.map_or(true, |course| entry.course == course))
        .map(|entry| (cosine_similarity(query, &entry.chunk.embedding), entry))
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(similarity, entry)| SearchResult {
            chunk: entry.chunk.clone(),
            course: entry.course.clone(),
            similarity,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
