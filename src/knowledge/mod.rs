//! Knowledge 모듈 - 강의자료 검색 코어
//!
//! - Chunker: 단어 윈도우 분할 (중첩 포함)
//! - Vector: 코사인 유사도 기반 정확한 Top-K 검색
//! - Store: SQLite 문서/청크/대화 저장소
//! - Retriever: 수집과 질의 응답 오케스트레이션
//! - Queue: 백그라운드 수집 워커

mod chunker;
mod queue;
mod retriever;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    default_chunker, word_chunker, ChunkConfig, ChunkSpan, Chunker, PageMap, WordWindowChunker,
    PAGE_SEPARATOR,
};
pub use queue::{IngestJob, IngestQueue};
pub use retriever::{Answer, CourseRetriever, Exchange, RetrievalConfig};
pub use store::{
    get_data_dir, Conversation, Document, DocumentKind, KnowledgeStore, Message, MessageRole,
    NewDocument, NewMessage, ProcessingStatus, StoreStats,
};
pub use vector::{
    cosine_similarity, l2_norm, l2_normalize, search, DocumentChunk, IndexedChunk, NewChunk,
    SearchResult, DEFAULT_TOP_K, EMBEDDING_DIMENSION,
};
