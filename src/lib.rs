//! tutor-rag - 강의자료 기반 질의응답 RAG 시스템
//!
//! 업로드된 노트, 기출문제, 교재에서 텍스트를 추출(직접 추출 또는 OCR)하고
//! 단어 윈도우로 분할해 임베딩한 뒤, 질문과 가장 유사한 청크를 문맥으로
//! 답변을 생성합니다. 생성 모델이 없으면 결정적 폴백 답변을 사용합니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod knowledge;

// Re-exports
pub use config::AppConfig;
pub use embedding::{create_embedder, hash_embedding, EmbeddingProvider, HashEmbedding};
pub use error::RagError;
pub use extractor::{ContentExtractor, OcrConfig, OcrEngine, TextExtractor};
pub use generation::{create_generator, GenerationConfig, GenerationParams, GenerationService};
pub use knowledge::{
    cosine_similarity, default_chunker, get_data_dir, search, Answer, ChunkConfig, Chunker,
    Conversation, CourseRetriever, Document, DocumentChunk, DocumentKind, Exchange, IngestJob,
    IngestQueue, KnowledgeStore, Message, MessageRole, NewDocument, ProcessingStatus,
    SearchResult, StoreStats, WordWindowChunker,
};
