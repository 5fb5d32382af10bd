//! Text Chunking Module
//!
//! 추출된 문서 텍스트를 단어 단위 슬라이딩 윈도우로 분할합니다.
//! 연속된 청크는 `overlap` 개의 단어를 공유하여 문맥이 끊기지 않도록 합니다.

use serde::{Deserialize, Serialize};

use crate::error::RagError;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (단어 수 기준)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// 청크 당 최대 단어 수
    pub chunk_size: usize,
    /// 연속 청크 간 중첩 단어 수
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

impl ChunkConfig {
    /// 설정 생성 (검증 포함)
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, RagError> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정 검증
    ///
    /// `overlap >= chunk_size` 이면 윈도우 시작점이 전진하지 않으므로 거부합니다.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.chunk_size == 0 {
            return Err(RagError::ZeroChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(RagError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    /// 윈도우 전진 폭 (항상 1 이상)
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 원본 텍스트 내 청크 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// 청크 텍스트 (단일 공백으로 재조립됨)
    pub text: String,
    /// 첫 단어의 인덱스 (0-based)
    pub start_word: usize,
    /// 청크에 포함된 단어 수
    pub word_count: usize,
}

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할하고 위치 정보를 함께 반환
    fn chunk_spans(&self, text: &str) -> Vec<ChunkSpan>;

    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String> {
        self.chunk_spans(text).into_iter().map(|s| s.text).collect()
    }

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// WordWindowChunker
// ============================================================================

/// 고정 크기 단어 윈도우 청커
///
/// - 공백 기준으로 단어를 나눕니다
/// - `chunk_size` 단어씩 자르고 시작점을 `chunk_size - overlap` 만큼 전진합니다
/// - 마지막 단어를 포함한 윈도우를 만들면 종료합니다
#[derive(Debug, Clone)]
pub struct WordWindowChunker {
    config: ChunkConfig,
}

impl WordWindowChunker {
    /// 설정으로 생성 (잘못된 설정은 거부)
    pub fn new(config: ChunkConfig) -> Result<Self, RagError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 기본 설정(500 단어, 50 단어 중첩)으로 생성
    pub fn with_defaults() -> Self {
        Self {
            config: ChunkConfig::default(),
        }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }
}

impl Chunker for WordWindowChunker {
    fn chunk_spans(&self, text: &str) -> Vec<ChunkSpan> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut spans = Vec::new();

        let mut start = 0;
        while start < words.len() {
            let end = (start + self.config.chunk_size).min(words.len());
            let joined = words[start..end].join(" ");
            let trimmed = joined.trim();

            if !trimmed.is_empty() {
                spans.push(ChunkSpan {
                    text: trimmed.to_string(),
                    start_word: start,
                    word_count: end - start,
                });
            }

            if end >= words.len() {
                break;
            }
            start += self.config.step();
        }

        spans
    }

    fn name(&self) -> &'static str {
        "WordWindowChunker"
    }
}

// ============================================================================
// Page Mapping
// ============================================================================

/// 페이지 구분자 (폼피드)
pub const PAGE_SEPARATOR: char = '\x0c';

/// 단어 인덱스 -> 페이지 번호 매핑
///
/// 추출 텍스트가 폼피드로 페이지를 구분할 때만 만들어집니다.
#[derive(Debug, Clone)]
pub struct PageMap {
    /// 각 페이지의 누적 끝 단어 인덱스 (exclusive)
    page_ends: Vec<usize>,
}

impl PageMap {
    /// 텍스트에서 페이지 매핑 생성 (페이지 구분자가 없으면 None)
    pub fn from_text(text: &str) -> Option<Self> {
        if !text.contains(PAGE_SEPARATOR) {
            return None;
        }

        let mut total = 0;
        let page_ends = text
            .split(PAGE_SEPARATOR)
            .map(|page| {
                total += page.split_whitespace().count();
                total
            })
            .collect();

        Some(Self { page_ends })
    }

    /// 단어가 속한 페이지 (1부터 시작)
    pub fn page_of_word(&self, word_index: usize) -> Option<u32> {
        self.page_ends
            .iter()
            .position(|&end| word_index < end)
            .map(|i| (i + 1) as u32)
    }

    pub fn page_count(&self) -> usize {
        self.page_ends.len()
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(WordWindowChunker::with_defaults())
}

/// 설정을 지정하여 청커 생성
pub fn word_chunker(config: ChunkConfig) -> Result<Box<dyn Chunker>, RagError> {
    Ok(Box::new(WordWindowChunker::new(config)?))
}

// ============================================================================
// Tests
// ============================================================================
