//! 도메인 에러 타입
//!
//! I/O, HTTP 계층은 `anyhow::Result`로 전파하고,
//! 검증 가능한 도메인 규칙 위반만 여기서 타입으로 구분합니다.

use thiserror::Error;

use crate::knowledge::ProcessingStatus;

/// 도메인 규칙 위반 에러
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RagError {
    /// 청크 크기가 0
    #[error("Invalid chunk configuration: chunk_size must be greater than 0")]
    ZeroChunkSize,

    /// overlap >= chunk_size 이면 윈도우가 전진하지 못함
    #[error("Invalid chunk configuration: overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },

    /// 검색 결과 개수가 0
    #[error("Invalid retrieval configuration: top_k must be greater than 0")]
    ZeroTopK,

    /// 허용되지 않는 처리 상태 전이
    #[error("Invalid status transition for document {document_id}: {from} -> {to}")]
    InvalidTransition {
        document_id: String,
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Question must not be empty")]
    EmptyQuestion,
}

/// 문자열 열거값 파싱 실패 (DB 컬럼, CLI 인자)
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct ParseValueError {
    kind: &'static str,
    value: String,
}

impl ParseValueError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
