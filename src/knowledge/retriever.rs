//! Course Retriever - 수집과 질의를 조율하는 오케스트레이터
//!
//! 수집: 추출 -> 청킹 -> 임베딩 -> 저장 (하나의 트랜잭션으로 completed 전이)
//! 질의: 질문 임베딩 -> 과목 범위 Top-K 검색 -> 문맥 생성 -> 출처 기록
//!
//! 모든 협력자(저장소, 임베더, 추출기, 생성기)는 생성 시 주입됩니다.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::RagError;
use crate::extractor::ContentExtractor;
use crate::generation::{create_generator, GenerationParams, GenerationService};

use super::chunker::{word_chunker, Chunker, PageMap};
use super::store::{
    Conversation, Document, KnowledgeStore, Message, MessageRole, NewDocument, NewMessage,
    ProcessingStatus, StoreStats,
};
use super::vector::{NewChunk, SearchResult, DEFAULT_TOP_K};

// ============================================================================
// Types
// ============================================================================

/// 검색 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 질의 당 검색할 청크 수
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// 질의 응답 결과
#[derive(Debug, Clone)]
pub struct Answer {
    /// 생성된 답변 (항상 비어 있지 않음)
    pub text: String,
    /// 인용된 문서 이름 (첫 등장 순서, 중복 없음)
    pub sources: Vec<String>,
    /// 문맥으로 사용된 검색 결과
    pub chunks: Vec<SearchResult>,
}

/// 대화 한 턴 (질문 + 답변 메시지)
#[derive(Debug, Clone)]
pub struct Exchange {
    pub user_message: Message,
    pub assistant_message: Message,
}

// ============================================================================
// CourseRetriever
// ============================================================================

/// 강의자료 검색기
pub struct CourseRetriever {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Arc<ContentExtractor>,
    generator: Arc<dyn GenerationService>,
    chunker: Box<dyn Chunker>,
    top_k: usize,
    params: GenerationParams,
}

impl CourseRetriever {
    /// 협력자를 주입하여 생성
    pub fn new(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: Arc<ContentExtractor>,
        generator: Arc<dyn GenerationService>,
        chunker: Box<dyn Chunker>,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            generator,
            chunker,
            top_k: DEFAULT_TOP_K,
            params: GenerationParams::default(),
        }
    }

    /// 설정으로 생성
    ///
    /// 잘못된 설정은 여기서 거부되며 요청 처리 중에는 발생하지 않습니다.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let store =
            KnowledgeStore::open(&config.db_path()).context("Failed to open knowledge store")?;

        let chunker = word_chunker(config.chunking)?;
        let embedder = create_embedder();
        let extractor = ContentExtractor::from_config(&config.ocr)
            .context("Failed to create content extractor")?;
        let generator = create_generator(&config.generation)?;

        let retriever = Self::new(
            Arc::new(store),
            Arc::new(embedder),
            Arc::new(extractor),
            generator,
            chunker,
        )
        .with_top_k(config.retrieval.top_k)?
        .with_params(config.generation.params.clone());

        Ok(retriever)
    }

    /// 검색 결과 수 변경
    pub fn with_top_k(mut self, top_k: usize) -> Result<Self, RagError> {
        if top_k == 0 {
            return Err(RagError::ZeroTopK);
        }
        self.top_k = top_k;
        Ok(self)
    }

    /// 생성 파라미터 변경
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    // ------------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------------

    /// 업로드 등록 (pending 상태로 생성)
    pub fn register(&self, doc: NewDocument) -> Result<Document> {
        let document = self.store.create_document(doc)?;
        tracing::info!(
            "Registered document: {} ({}, course={}, id={})",
            document.name,
            document.kind,
            document.course,
            document.id
        );
        Ok(document)
    }

    /// 파일 바이트로 문서 처리
    ///
    /// processing으로 전이한 뒤 추출과 색인을 수행합니다.
    /// 실패하면 문서를 failed로 표시하고 에러를 반환합니다.
    ///
    /// # Returns
    /// 저장된 청크 수
    pub async fn process_document(&self, document_id: &str, bytes: &[u8]) -> Result<usize> {
        let document = self.require_document(document_id)?;
        self.store
            .set_status(document_id, ProcessingStatus::Processing)?;

        let result: Result<usize> = async {
            let content = self
                .extractor
                .extract(bytes, document.kind)
                .await
                .with_context(|| format!("Failed to extract text from {}", document.name))?;

            tracing::debug!(
                "Extracted {} chars from {} via {:?}",
                content.text.len(),
                document.name,
                content.method
            );
            self.index_text(document_id, &content.text).await
        }
        .await;

        self.settle(document_id, result)
    }

    /// 이미 추출된 텍스트로 문서 처리
    pub async fn ingest_text(&self, document_id: &str, text: &str) -> Result<usize> {
        self.require_document(document_id)?;
        self.store
            .set_status(document_id, ProcessingStatus::Processing)?;

        let result = self.index_text(document_id, text).await;
        self.settle(document_id, result)
    }

    /// 청킹 + 임베딩 후 한 번에 저장
    ///
    /// 빈 텍스트는 청크 없이 completed로 전이합니다.
    async fn index_text(&self, document_id: &str, text: &str) -> Result<usize> {
        let spans = self.chunker.chunk_spans(text);
        let pages = PageMap::from_text(text);

        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("Failed to embed chunks")?;

        let chunks: Vec<NewChunk> = spans
            .into_iter()
            .zip(embeddings)
            .map(|(span, embedding)| NewChunk {
                page: pages.as_ref().and_then(|p| p.page_of_word(span.start_word)),
                text: span.text,
                embedding,
            })
            .collect();

        self.store.complete_ingestion(document_id, text, &chunks)
    }

    fn settle(&self, document_id: &str, result: Result<usize>) -> Result<usize> {
        match &result {
            Ok(count) => {
                tracing::info!("Document {} completed ({} chunks)", document_id, count);
            }
            Err(e) => {
                tracing::error!("Ingestion failed for document {}: {:#}", document_id, e);
                if let Err(mark_err) = self.store.mark_failed(document_id) {
                    tracing::warn!(
                        "Could not mark document {} as failed: {:#}",
                        document_id,
                        mark_err
                    );
                }
            }
        }
        result
    }

    fn require_document(&self, document_id: &str) -> Result<Document> {
        self.store
            .get_document(document_id)?
            .ok_or_else(|| RagError::DocumentNotFound(document_id.to_string()).into())
    }

    /// 문서 삭제 (청크 포함)
    pub fn delete_document(&self, document_id: &str) -> Result<bool> {
        self.store.delete_document(document_id)
    }

    pub fn list_documents(&self, course: Option<&str>) -> Result<Vec<Document>> {
        self.store.list_documents(course)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 질문에 답변
    ///
    /// # Arguments
    /// * `query` - 질문 텍스트
    /// * `course` - 검색 범위 (None이면 전체)
    pub async fn answer(&self, query: &str, course: Option<&str>) -> Result<Answer> {
        if query.trim().is_empty() {
            return Err(RagError::EmptyQuestion.into());
        }

        let query_embedding = self.embedder.embed(query).await?;
        let chunks = self
            .store
            .search_similar_chunks(&query_embedding, self.top_k, course)?;

        let context: Vec<String> = chunks.iter().map(|r| r.chunk.text.clone()).collect();
        let sources = self.source_names(&chunks)?;

        let text = self.generator.generate(query, &context, &self.params).await;

        tracing::info!(
            "Answered query (scope={:?}, chunks={}, sources={}, generator={})",
            course,
            chunks.len(),
            sources.len(),
            self.generator.name()
        );

        Ok(Answer {
            text,
            sources,
            chunks,
        })
    }

    /// 검색 결과의 문서 이름 (첫 등장 순서로 중복 제거)
    fn source_names(&self, chunks: &[SearchResult]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();

        for result in chunks {
            let document_id = &result.chunk.document_id;
            if !seen.insert(document_id.clone()) {
                continue;
            }
            // 검색과 조회 사이에 삭제된 문서는 건너뜀
            if let Some(document) = self.store.get_document(document_id)? {
                names.push(document.name);
            }
        }

        Ok(names)
    }

    // ------------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------------

    /// 새 대화 시작
    pub fn start_conversation(&self, course: Option<String>) -> Result<Conversation> {
        self.store.create_conversation(course)
    }

    /// 대화에서 질문
    ///
    /// 사용자 메시지를 저장하고, 대화의 과목을 검색 범위로 답변한 뒤
    /// 답변 메시지를 저장합니다. 인용할 문서가 없으면 sources는 None입니다.
    pub async fn ask(&self, conversation_id: &str, content: &str) -> Result<Exchange> {
        if content.trim().is_empty() {
            return Err(RagError::EmptyQuestion.into());
        }

        let conversation = self
            .store
            .get_conversation(conversation_id)?
            .ok_or_else(|| RagError::ConversationNotFound(conversation_id.to_string()))?;

        let user_message = self.store.create_message(NewMessage {
            conversation_id: conversation.id.clone(),
            role: MessageRole::User,
            content: content.to_string(),
            sources: None,
        })?;

        let answer = self.answer(content, conversation.course.as_deref()).await?;

        let sources = if answer.sources.is_empty() {
            None
        } else {
            Some(answer.sources)
        };

        let assistant_message = self.store.create_message(NewMessage {
            conversation_id: conversation.id,
            role: MessageRole::Assistant,
            content: answer.text,
            sources,
        })?;

        Ok(Exchange {
            user_message,
            assistant_message,
        })
    }

    /// 대화 기록
    pub fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        if self.store.get_conversation(conversation_id)?.is_none() {
            return Err(RagError::ConversationNotFound(conversation_id.to_string()).into());
        }
        self.store.messages_by_conversation(conversation_id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::extractor::{OcrEngine, TextExtractor};
    use crate::generation::{fallback_response, FallbackGenerator};
    use crate::knowledge::{ChunkConfig, DocumentKind, WordWindowChunker};
    use async_trait::async_trait;

    struct FixedText(&'static str);

    impl TextExtractor for FixedText {
        fn extract(&self, _bytes: &[u8]) -> Result<String> {
            Ok(self.0.to_string())
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct Malformed;

    impl TextExtractor for Malformed {
        fn extract(&self, _bytes: &[u8]) -> Result<String> {
            anyhow::bail!("malformed PDF")
        }
        fn name(&self) -> &str {
            "malformed"
        }
    }

    struct FixedOcr(&'static str);

    #[async_trait]
    impl OcrEngine for FixedOcr {
        async fn recognize(&self, _bytes: &[u8]) -> Result<String> {
            Ok(self.0.to_string())
        }
        fn name(&self) -> &str {
            "fixed-ocr"
        }
    }

    struct BrokenOcr;

    #[async_trait]
    impl OcrEngine for BrokenOcr {
        async fn recognize(&self, _bytes: &[u8]) -> Result<String> {
            anyhow::bail!("tesseract crashed")
        }
        fn name(&self) -> &str {
            "broken-ocr"
        }
    }

    /// 받은 문맥을 그대로 돌려주는 생성기
    struct EchoGenerator;

    #[async_trait]
    impl GenerationService for EchoGenerator {
        async fn generate(
            &self,
            _query: &str,
            context: &[String],
            _params: &GenerationParams,
        ) -> String {
            context.join("|")
        }
        fn name(&self) -> &str {
            "echo"
        }
        fn is_live(&self) -> bool {
            false
        }
    }

    fn retriever(
        extractor: ContentExtractor,
        generator: Arc<dyn GenerationService>,
    ) -> CourseRetriever {
        let chunker = WordWindowChunker::new(ChunkConfig::new(3, 1).unwrap()).unwrap();
        CourseRetriever::new(
            Arc::new(KnowledgeStore::open_in_memory().unwrap()),
            Arc::new(HashEmbedding::new()),
            Arc::new(extractor),
            generator,
            Box::new(chunker),
        )
    }

    fn text_retriever(generator: Arc<dyn GenerationService>) -> CourseRetriever {
        retriever(
            ContentExtractor::new(Arc::new(FixedText("unused")), Arc::new(FixedOcr("unused"))),
            generator,
        )
    }

    fn upload(retriever: &CourseRetriever, name: &str, course: &str) -> Document {
        retriever
            .register(NewDocument {
                name: name.to_string(),
                kind: DocumentKind::Notes,
                course: course.to_string(),
                file_size: 1024,
            })
            .unwrap()
    }

    fn status_of(retriever: &CourseRetriever, id: &str) -> ProcessingStatus {
        retriever.store().get_document(id).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_ingest_text_chunks_and_completes() {
        let retriever = text_retriever(Arc::new(FallbackGenerator));
        let doc = upload(&retriever, "os.pdf", "OS");
        assert_eq!(doc.status, ProcessingStatus::Pending);

        let count = retriever.ingest_text(&doc.id, "a b c d e").await.unwrap();
        assert_eq!(count, 2);

        let stored = retriever.store().get_document(&doc.id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert_eq!(stored.extracted_text.as_deref(), Some("a b c d e"));

        let chunks = retriever.store().chunks_by_document(&doc.id).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c", "c d e"]);
        assert!(chunks.iter().all(|c| c.embedding.len() == 384));
    }

    #[tokio::test]
    async fn test_empty_text_completes_without_chunks() {
        let retriever = text_retriever(Arc::new(FallbackGenerator));
        let doc = upload(&retriever, "blank.pdf", "OS");

        let count = retriever.ingest_text(&doc.id, "   \n ").await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(status_of(&retriever, &doc.id), ProcessingStatus::Completed);
        assert!(retriever.store().chunks_by_document(&doc.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunks_carry_page_numbers() {
        let retriever = text_retriever(Arc::new(FallbackGenerator));
        let doc = upload(&retriever, "paged.pdf", "OS");

        retriever
            .ingest_text(&doc.id, "one two three\x0cfour five six")
            .await
            .unwrap();

        let chunks = retriever.store().chunks_by_document(&doc.id).unwrap();
        let pages: Vec<Option<u32>> = chunks.iter().map(|c| c.page).collect();
        // 윈도우 시작 단어: 0(one), 2(three), 4(five)
        assert_eq!(pages, vec![Some(1), Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn test_answer_on_empty_pool_uses_fallback() {
        let retriever = text_retriever(Arc::new(FallbackGenerator));

        let answer = retriever.answer("What is paging?", None).await.unwrap();
        assert_eq!(answer.text, fallback_response(&[]));
        assert!(!answer.text.is_empty());
        assert!(answer.sources.is_empty());
        assert!(answer.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_answer_rejects_empty_question() {
        let retriever = text_retriever(Arc::new(FallbackGenerator));
        let err = retriever.answer("  ", None).await.unwrap_err();
        assert_eq!(err.downcast_ref::<RagError>(), Some(&RagError::EmptyQuestion));
    }

    #[tokio::test]
    async fn test_answer_respects_course_scope() {
        let retriever = text_retriever(Arc::new(EchoGenerator));
        let os = upload(&retriever, "os.pdf", "OS");
        let db = upload(&retriever, "db.pdf", "DBMS");
        retriever.ingest_text(&os.id, "process scheduling").await.unwrap();
        retriever.ingest_text(&db.id, "process scheduling").await.unwrap();

        let answer = retriever
            .answer("process scheduling", Some("DBMS"))
            .await
            .unwrap();
        assert_eq!(answer.sources, vec!["db.pdf"]);
        assert!(answer.chunks.iter().all(|r| r.course == "DBMS"));

        let all = retriever.answer("process scheduling", None).await.unwrap();
        assert_eq!(all.sources, vec!["os.pdf", "db.pdf"]);
    }

    #[tokio::test]
    async fn test_sources_are_distinct_in_first_appearance_order() {
        let retriever = text_retriever(Arc::new(EchoGenerator));
        let a = upload(&retriever, "a.pdf", "OS");
        let b = upload(&retriever, "b.pdf", "OS");
        retriever.ingest_text(&a.id, "v w x y z").await.unwrap();
        retriever
            .ingest_text(&b.id, "banker algorithm safe")
            .await
            .unwrap();

        let answer = retriever
            .answer("banker algorithm safe", None)
            .await
            .unwrap();

        assert_eq!(answer.chunks.len(), 3);
        assert_eq!(answer.chunks[0].chunk.text, "banker algorithm safe");
        assert_eq!(answer.sources, vec!["b.pdf", "a.pdf"]);
        // 모든 청크 텍스트가 문맥으로 전달됨
        assert!(answer.text.starts_with("banker algorithm safe|"));
        assert_eq!(answer.text.split('|').count(), 3);
    }

    #[tokio::test]
    async fn test_top_k_limits_context() {
        let retriever = text_retriever(Arc::new(EchoGenerator))
            .with_top_k(1)
            .unwrap();
        let doc = upload(&retriever, "a.pdf", "OS");
        retriever.ingest_text(&doc.id, "a b c d e f g").await.unwrap();

        let answer = retriever.answer("a b c", None).await.unwrap();
        assert_eq!(answer.chunks.len(), 1);

        assert!(matches!(
            text_retriever(Arc::new(EchoGenerator)).with_top_k(0),
            Err(RagError::ZeroTopK)
        ));
    }

    #[tokio::test]
    async fn test_process_book_with_direct_text() {
        let retriever = retriever(
            ContentExtractor::new(
                Arc::new(FixedText("virtual memory uses paging")),
                Arc::new(BrokenOcr),
            ),
            Arc::new(FallbackGenerator),
        );
        let doc = retriever
            .register(NewDocument {
                name: "galvin.pdf".to_string(),
                kind: DocumentKind::Book,
                course: "OS".to_string(),
                file_size: 4096,
            })
            .unwrap();

        let count = retriever.process_document(&doc.id, b"%PDF").await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(status_of(&retriever, &doc.id), ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn test_book_falls_back_to_ocr() {
        let retriever = retriever(
            ContentExtractor::new(Arc::new(Malformed), Arc::new(FixedOcr("scanned page text"))),
            Arc::new(FallbackGenerator),
        );
        let doc = retriever
            .register(NewDocument {
                name: "scan.pdf".to_string(),
                kind: DocumentKind::Book,
                course: "OS".to_string(),
                file_size: 4096,
            })
            .unwrap();

        retriever.process_document(&doc.id, b"%PDF").await.unwrap();
        let stored = retriever.store().get_document(&doc.id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert_eq!(stored.extracted_text.as_deref(), Some("scanned page text"));
    }

    #[tokio::test]
    async fn test_ocr_failure_marks_failed_and_allows_retry() {
        let retriever = retriever(
            ContentExtractor::new(Arc::new(FixedText("unused")), Arc::new(BrokenOcr)),
            Arc::new(FallbackGenerator),
        );
        let doc = upload(&retriever, "notes.pdf", "OS");

        let err = retriever.process_document(&doc.id, b"%PDF").await.unwrap_err();
        assert!(format!("{:#}", err).contains("tesseract crashed"));
        assert_eq!(status_of(&retriever, &doc.id), ProcessingStatus::Failed);
        assert!(retriever.store().chunks_by_document(&doc.id).unwrap().is_empty());

        // failed -> processing 재처리 허용
        retriever.ingest_text(&doc.id, "typed notes").await.unwrap();
        assert_eq!(status_of(&retriever, &doc.id), ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn test_completed_document_cannot_be_reprocessed() {
        let retriever = text_retriever(Arc::new(FallbackGenerator));
        let doc = upload(&retriever, "a.pdf", "OS");
        retriever.ingest_text(&doc.id, "a b c").await.unwrap();

        let err = retriever.ingest_text(&doc.id, "x y z").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::InvalidTransition { .. })
        ));
        assert_eq!(status_of(&retriever, &doc.id), ProcessingStatus::Completed);
        assert_eq!(retriever.store().chunks_by_document(&doc.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_process_unknown_document() {
        let retriever = text_retriever(Arc::new(FallbackGenerator));
        let err = retriever.process_document("missing", b"%PDF").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<RagError>(),
            Some(&RagError::DocumentNotFound("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_delete_removes_chunks_from_search() {
        let retriever = text_retriever(Arc::new(EchoGenerator));
        let doc = upload(&retriever, "a.pdf", "OS");
        retriever.ingest_text(&doc.id, "a b c d e").await.unwrap();

        assert!(retriever.delete_document(&doc.id).unwrap());
        let answer = retriever.answer("a b c", None).await.unwrap();
        assert!(answer.chunks.is_empty());
        assert!(answer.sources.is_empty());
        assert_eq!(retriever.stats().unwrap().chunk_count, 0);
    }

    #[tokio::test]
    async fn test_ask_stores_both_messages() {
        let retriever = text_retriever(Arc::new(FallbackGenerator));
        let doc = upload(&retriever, "sched.pdf", "OS");
        retriever
            .ingest_text(&doc.id, "round robin scheduling")
            .await
            .unwrap();

        let conversation = retriever.start_conversation(Some("OS".to_string())).unwrap();
        let exchange = retriever
            .ask(&conversation.id, "round robin scheduling")
            .await
            .unwrap();

        assert_eq!(exchange.user_message.role, MessageRole::User);
        assert_eq!(exchange.user_message.sources, None);
        assert_eq!(exchange.assistant_message.role, MessageRole::Assistant);
        assert_eq!(
            exchange.assistant_message.sources,
            Some(vec!["sched.pdf".to_string()])
        );

        let history = retriever.history(&conversation.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "round robin scheduling");
        assert_eq!(history[1].content, exchange.assistant_message.content);
    }

    #[tokio::test]
    async fn test_ask_scopes_by_conversation_course() {
        let retriever = text_retriever(Arc::new(FallbackGenerator));
        let doc = upload(&retriever, "os.pdf", "OS");
        retriever.ingest_text(&doc.id, "deadlock").await.unwrap();

        let conversation = retriever
            .start_conversation(Some("DBMS".to_string()))
            .unwrap();
        let exchange = retriever.ask(&conversation.id, "deadlock").await.unwrap();

        assert_eq!(exchange.assistant_message.sources, None);
        assert_eq!(exchange.assistant_message.content, fallback_response(&[]));
    }

    #[tokio::test]
    async fn test_ask_errors() {
        let retriever = text_retriever(Arc::new(FallbackGenerator));

        let err = retriever.ask("missing", "hello").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<RagError>(),
            Some(&RagError::ConversationNotFound("missing".to_string()))
        );

        let conversation = retriever.start_conversation(None).unwrap();
        let err = retriever.ask(&conversation.id, "").await.unwrap_err();
        assert_eq!(err.downcast_ref::<RagError>(), Some(&RagError::EmptyQuestion));
        assert!(retriever.history(&conversation.id).unwrap().is_empty());

        assert!(retriever.history("missing").is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_ingestion_keeps_chunk_sets_apart() {
        let retriever = Arc::new(text_retriever(Arc::new(FallbackGenerator)));
        let docs: Vec<Document> = (0..8)
            .map(|i| upload(&retriever, &format!("unit{}.pdf", i), "OS"))
            .collect();

        let handles: Vec<_> = docs
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let retriever = Arc::clone(&retriever);
                let id = doc.id.clone();
                // 41단어, (3, 1) 창 → 청크 20개
                let text = (0..41)
                    .map(|j| format!("d{}w{}", i, j))
                    .collect::<Vec<_>>()
                    .join(" ");
                tokio::spawn(async move { retriever.ingest_text(&id, &text).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 20);
        }

        for (i, doc) in docs.iter().enumerate() {
            assert_eq!(status_of(&retriever, &doc.id), ProcessingStatus::Completed);

            let chunks = retriever.store().chunks_by_document(&doc.id).unwrap();
            assert_eq!(chunks.len(), 20);
            assert!(chunks.iter().all(|c| c.document_id == doc.id));

            let prefix = format!("d{}w", i);
            assert!(chunks
                .iter()
                .flat_map(|c| c.text.split_whitespace())
                .all(|word| word.starts_with(&prefix)));
            assert_eq!(chunks[0].text, format!("d{0}w0 d{0}w1 d{0}w2", i));
            assert_eq!(chunks[19].text, format!("d{0}w38 d{0}w39 d{0}w40", i));
        }

        assert_eq!(retriever.stats().unwrap().chunk_count, 160);
    }

    #[tokio::test]
    async fn test_from_config_without_gemini_key_still_answers() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        config.ocr.engine = crate::extractor::OcrEngineKind::Gemini;

        let retriever = CourseRetriever::from_config(&config).unwrap();
        let answer = retriever.answer("what is paging?", None).await.unwrap();
        assert_eq!(answer.text, fallback_response(&[]));
        assert!(answer.sources.is_empty());
    }
}
