//! Knowledge Store - rusqlite 기반 동기 저장소
//!
//! 업로드된 강의자료 문서, 검색용 청크, 대화와 메시지를 저장합니다.
//! 저장 위치: ~/.local/share/.tutor-rag/knowledge.db (테스트는 인메모리)
//!
//! 청크는 소유 문서에 종속되며 문서 삭제 시 함께 삭제됩니다 (ON DELETE CASCADE).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParseValueError, RagError};

use super::vector::{self, DocumentChunk, IndexedChunk, NewChunk, SearchResult};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.local/share/.tutor-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tutor-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 문서 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// 필기 노트 (스캔본)
    Notes,
    /// 기출문제 (previous year questions)
    Pyq,
    /// 교재 (디지털 PDF)
    Book,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Notes => "notes",
            DocumentKind::Pyq => "pyq",
            DocumentKind::Book => "book",
        }
    }

    /// 직접 텍스트 추출을 먼저 시도하는 종류인지
    pub fn prefers_direct_extraction(&self) -> bool {
        matches!(self, DocumentKind::Book)
    }
}

/// 문서 처리 상태
///
/// pending -> processing -> completed | failed
/// 실패한 문서는 다시 processing으로 재처리할 수 있습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// 상태 전이 허용 여부
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }

    /// 종료 상태 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

/// 메시지 작성자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

macro_rules! impl_text_enum {
    ($ty:ty, $name:literal, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseValueError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let lowered = s.trim().to_lowercase();
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == lowered)
                    .ok_or_else(|| ParseValueError::new($name, s))
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

impl_text_enum!(
    DocumentKind,
    "document kind",
    [DocumentKind::Notes, DocumentKind::Pyq, DocumentKind::Book]
);
impl_text_enum!(
    ProcessingStatus,
    "processing status",
    [
        ProcessingStatus::Pending,
        ProcessingStatus::Processing,
        ProcessingStatus::Completed,
        ProcessingStatus::Failed,
    ]
);
impl_text_enum!(
    MessageRole,
    "message role",
    [MessageRole::User, MessageRole::Assistant]
);

/// 저장된 문서 엔트리
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// 원본 파일 이름
    pub name: String,
    pub kind: DocumentKind,
    /// 과목 코드 (검색 범위 필터)
    pub course: String,
    pub file_size: u64,
    pub status: ProcessingStatus,
    pub extracted_text: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// 새 문서 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub name: String,
    pub kind: DocumentKind,
    pub course: String,
    pub file_size: u64,
}

/// 대화
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// 대화의 과목 (질문마다 검색 범위로 사용)
    pub course: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 대화 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    /// 답변에 인용된 문서 이름
    pub sources: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

/// 새 메시지 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub sources: Option<Vec<String>>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub conversation_count: usize,
    pub message_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

const DOCUMENT_COLUMNS: &str =
    "id, name, kind, course, file_size, status, extracted_text, uploaded_at";

/// Knowledge Store - 동기 저장소
///
/// 명시적으로 생성하여 오케스트레이터에 주입합니다.
/// 연결은 `Mutex`로 보호되므로 청크 단위 쓰기가 원자적입니다.
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        Self::with_connection(conn, path.to_path_buf())
    }

    /// 인메모리 저장소 (테스트 및 일회성 실행용)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn, PathBuf::from(":memory:"))
    }

    /// 기본 위치에서 열기 (~/.local/share/.tutor-rag/knowledge.db)
    pub fn open_default() -> Result<Self> {
        Self::open(&get_data_dir().join("knowledge.db"))
    }

    fn with_connection(conn: Connection, db_path: PathBuf) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        };
        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                course TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                status TEXT NOT NULL,
                extracted_text TEXT,
                uploaded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_course ON documents(course);

            CREATE TABLE IF NOT EXISTS chunks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                page INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                course TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                sources TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
            "#,
        )
        .context("Failed to initialize schema")?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// 문서 생성 (pending 상태)
    pub fn create_document(&self, doc: NewDocument) -> Result<Document> {
        let conn = self.lock()?;
        let document = Document {
            id: Uuid::new_v4().to_string(),
            name: doc.name,
            kind: doc.kind,
            course: doc.course,
            file_size: doc.file_size,
            status: ProcessingStatus::Pending,
            extracted_text: None,
            uploaded_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO documents (id, name, kind, course, file_size, status, extracted_text, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)",
            params![
                document.id,
                document.name,
                document.kind,
                document.course,
                document.file_size as i64,
                document.status,
                document.uploaded_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert document")?;

        tracing::info!(
            "Created document: {} (id={}, course={}, kind={})",
            document.name,
            document.id,
            document.course,
            document.kind
        );
        Ok(document)
    }

    /// ID로 문서 조회
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS);

        let doc = conn
            .query_row(&sql, params![id], row_to_document)
            .optional()
            .context("Failed to query document")?;

        Ok(doc)
    }

    /// 문서 목록 조회 (업로드 순서)
    pub fn list_documents(&self, course: Option<&str>) -> Result<Vec<Document>> {
        let conn = self.lock()?;

        let docs = if let Some(course) = course {
            let sql = format!(
                "SELECT {} FROM documents WHERE course = ?1 ORDER BY rowid",
                DOCUMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![course], row_to_document)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let sql = format!("SELECT {} FROM documents ORDER BY rowid", DOCUMENT_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_document)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(docs)
    }

    /// 처리 상태 변경 (허용된 전이만)
    pub fn set_status(&self, id: &str, next: ProcessingStatus) -> Result<()> {
        let conn = self.lock()?;
        transition(&conn, id, next)?;
        tracing::debug!("Document {} -> {}", id, next);
        Ok(())
    }

    /// 실패 처리
    pub fn mark_failed(&self, id: &str) -> Result<()> {
        self.set_status(id, ProcessingStatus::Failed)
    }

    /// 수집 완료 처리
    ///
    /// 청크 저장, 추출 텍스트 기록, completed 전이를 하나의 트랜잭션으로 수행합니다.
    /// 중간 상태는 외부에서 관찰되지 않습니다.
    pub fn complete_ingestion(
        &self,
        id: &str,
        extracted_text: &str,
        chunks: &[NewChunk],
    ) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        transition(&tx, id, ProcessingStatus::Completed)?;
        tx.execute(
            "UPDATE documents SET extracted_text = ?1 WHERE id = ?2",
            params![extracted_text, id],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (id, document_id, text, embedding, page)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    id,
                    chunk.text,
                    encode_embedding(&chunk.embedding),
                    chunk.page,
                ])
                .context("Failed to insert chunk")?;
            }
        }

        tx.commit().context("Failed to commit ingestion")?;
        tracing::info!("Stored {} chunks for document {}", chunks.len(), id);
        Ok(chunks.len())
    }

    /// 문서 삭제 (청크도 함께 삭제)
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        if rows > 0 {
            tracing::info!("Deleted document {}", id);
        }
        Ok(rows > 0)
    }

    // ------------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------------

    /// 청크 단건 저장
    pub fn store_chunk(&self, document_id: &str, chunk: NewChunk) -> Result<DocumentChunk> {
        let conn = self.lock()?;
        let stored = DocumentChunk {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            text: chunk.text,
            embedding: chunk.embedding,
            page: chunk.page,
        };

        conn.execute(
            "INSERT INTO chunks (id, document_id, text, embedding, page)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                stored.id,
                stored.document_id,
                stored.text,
                encode_embedding(&stored.embedding),
                stored.page,
            ],
        )
        .with_context(|| format!("Failed to insert chunk for document {}", document_id))?;

        Ok(stored)
    }

    /// 문서의 청크 목록 (저장 순서)
    pub fn chunks_by_document(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, text, embedding, page FROM chunks
             WHERE document_id = ?1 ORDER BY seq",
        )?;

        let chunks = stmt
            .query_map(params![document_id], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(chunks)
    }

    /// 검색 후보 풀 (모든 청크 + 소유 문서 과목, 저장 순서)
    pub fn candidate_pool(&self) -> Result<Vec<IndexedChunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.document_id, c.text, c.embedding, c.page, d.course
             FROM chunks c
             JOIN documents d ON d.id = c.document_id
             ORDER BY c.seq",
        )?;

        let pool = stmt
            .query_map([], |row| {
                Ok(IndexedChunk {
                    chunk: row_to_chunk(row)?,
                    course: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(pool)
    }

    /// 유사 청크 검색
    ///
    /// 후보 풀을 읽은 뒤 잠금을 해제하고 선형 스캔합니다.
    pub fn search_similar_chunks(
        &self,
        embedding: &[f64],
        limit: usize,
        course: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let pool = self.candidate_pool()?;
        let results = vector::search(embedding, &pool, limit, course);
        tracing::debug!(
            "Similarity search: pool={}, scope={:?}, hits={}",
            pool.len(),
            course,
            results.len()
        );
        Ok(results)
    }

    // ------------------------------------------------------------------------
    // Conversations & Messages
    // ------------------------------------------------------------------------

    /// 대화 생성
    pub fn create_conversation(&self, course: Option<String>) -> Result<Conversation> {
        let conn = self.lock()?;
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            course,
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO conversations (id, course, created_at) VALUES (?1, ?2, ?3)",
            params![
                conversation.id,
                conversation.course,
                conversation.created_at.to_rfc3339()
            ],
        )
        .context("Failed to insert conversation")?;

        Ok(conversation)
    }

    /// ID로 대화 조회
    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.lock()?;
        let conversation = conn
            .query_row(
                "SELECT id, course, created_at FROM conversations WHERE id = ?1",
                params![id],
                row_to_conversation,
            )
            .optional()
            .context("Failed to query conversation")?;

        Ok(conversation)
    }

    /// 대화 목록 (생성 순서)
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, course, created_at FROM conversations ORDER BY rowid")?;
        let conversations = stmt
            .query_map([], row_to_conversation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conversations)
    }

    /// 메시지 저장
    pub fn create_message(&self, msg: NewMessage) -> Result<Message> {
        let conn = self.lock()?;
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: msg.conversation_id,
            role: msg.role,
            content: msg.content,
            sources: msg.sources,
            created_at: Utc::now(),
        };

        let sources_json = message
            .sources
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize message sources")?;

        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, sources, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.conversation_id,
                message.role,
                message.content,
                sources_json,
                message.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert message")?;

        Ok(message)
    }

    /// 대화의 메시지 목록 (작성 순서)
    pub fn messages_by_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, sources, created_at FROM messages
             WHERE conversation_id = ?1 ORDER BY seq",
        )?;

        let rows = stmt
            .query_map(params![conversation_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, MessageRole>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, conversation_id, role, content, sources, created_at)| {
                let sources = sources
                    .map(|s| serde_json::from_str::<Vec<String>>(&s))
                    .transpose()
                    .context("Failed to parse message sources")?;
                Ok(Message {
                    id,
                    conversation_id,
                    role,
                    content,
                    sources,
                    created_at: parse_datetime(created_at),
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------------

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            document_count: count("documents")?,
            chunk_count: count("chunks")?,
            conversation_count: count("conversations")?,
            message_count: count("messages")?,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 현재 상태를 확인하고 허용된 경우에만 전이
fn transition(conn: &Connection, id: &str, next: ProcessingStatus) -> Result<()> {
    let current: Option<ProcessingStatus> = conn
        .query_row(
            "SELECT status FROM documents WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    let current = current.ok_or_else(|| RagError::DocumentNotFound(id.to_string()))?;
    if !current.can_transition_to(next) {
        return Err(RagError::InvalidTransition {
            document_id: id.to_string(),
            from: current,
            to: next,
        }
        .into());
    }

    conn.execute(
        "UPDATE documents SET status = ?1 WHERE id = ?2",
        params![next, id],
    )?;
    Ok(())
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        course: row.get(3)?,
        file_size: row.get::<_, i64>(4)? as u64,
        status: row.get(5)?,
        extracted_text: row.get(6)?,
        uploaded_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentChunk> {
    Ok(DocumentChunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        text: row.get(2)?,
        embedding: decode_embedding(&row.get::<_, Vec<u8>>(3)?),
        page: row.get(4)?,
    })
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        course: row.get(1)?,
        created_at: parse_datetime(row.get::<_, String>(2)?),
    })
}

/// 임베딩을 little-endian f64 바이트로 직렬화
fn encode_embedding(embedding: &[f64]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// little-endian f64 바이트에서 임베딩 복원
fn decode_embedding(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|b| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            f64::from_le_bytes(buf)
        })
        .collect()
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hash_embedding;
    use crate::knowledge::EMBEDDING_DIMENSION;
    use tempfile::TempDir;

    fn new_doc(name: &str, course: &str) -> NewDocument {
        NewDocument {
            name: name.to_string(),
            kind: DocumentKind::Book,
            course: course.to_string(),
            file_size: 1024,
        }
    }

    fn new_chunk(text: &str) -> NewChunk {
        NewChunk {
            text: text.to_string(),
            embedding: hash_embedding(text, EMBEDDING_DIMENSION),
            page: None,
        }
    }

    /// pending -> processing -> completed 까지 진행한 문서
    fn ingested(store: &KnowledgeStore, name: &str, course: &str, texts: &[&str]) -> Document {
        let doc = store.create_document(new_doc(name, course)).unwrap();
        store.set_status(&doc.id, ProcessingStatus::Processing).unwrap();
        let chunks: Vec<NewChunk> = texts.iter().map(|t| new_chunk(t)).collect();
        store
            .complete_ingestion(&doc.id, &texts.join(" "), &chunks)
            .unwrap();
        doc
    }

    #[test]
    fn test_create_and_get_document() {
        let store = KnowledgeStore::open_in_memory().unwrap();

        let doc = store.create_document(new_doc("os-notes.pdf", "CS201")).unwrap();
        assert_eq!(doc.status, ProcessingStatus::Pending);

        let retrieved = store.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(retrieved.name, "os-notes.pdf");
        assert_eq!(retrieved.kind, DocumentKind::Book);
        assert_eq!(retrieved.course, "CS201");
        assert_eq!(retrieved.file_size, 1024);
        assert!(retrieved.extracted_text.is_none());

        assert!(store.get_document("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_documents_by_course() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        for i in 0..5 {
            let course = if i % 2 == 0 { "CS201" } else { "CS301" };
            store
                .create_document(new_doc(&format!("doc{}.pdf", i), course))
                .unwrap();
        }

        let all = store.list_documents(None).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].name, "doc0.pdf");

        let cs201 = store.list_documents(Some("CS201")).unwrap();
        assert_eq!(cs201.len(), 3); // 0, 2, 4
    }

    #[test]
    fn test_status_transitions() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let doc = store.create_document(new_doc("a.pdf", "CS201")).unwrap();

        // pending -> completed 는 불가
        let err = store
            .set_status(&doc.id, ProcessingStatus::Completed)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::InvalidTransition { .. })
        ));

        store.set_status(&doc.id, ProcessingStatus::Processing).unwrap();
        store.mark_failed(&doc.id).unwrap();
        assert_eq!(
            store.get_document(&doc.id).unwrap().unwrap().status,
            ProcessingStatus::Failed
        );

        // 실패한 문서는 재처리 가능
        store.set_status(&doc.id, ProcessingStatus::Processing).unwrap();

        let err = store
            .set_status("missing", ProcessingStatus::Processing)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<RagError>(),
            Some(&RagError::DocumentNotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_complete_ingestion_requires_processing() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let doc = store.create_document(new_doc("a.pdf", "CS201")).unwrap();

        let result = store.complete_ingestion(&doc.id, "text", &[new_chunk("text")]);
        assert!(result.is_err());

        // 트랜잭션이 롤백되어 청크가 남지 않음
        assert!(store.chunks_by_document(&doc.id).unwrap().is_empty());
        assert_eq!(
            store.get_document(&doc.id).unwrap().unwrap().status,
            ProcessingStatus::Pending
        );
    }

    #[test]
    fn test_complete_ingestion_with_no_chunks() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let doc = ingested(&store, "blank.pdf", "CS201", &[]);

        let stored = store.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert_eq!(stored.extracted_text.as_deref(), Some(""));
        assert!(store.chunks_by_document(&doc.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_document_cascades_chunks() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let a = ingested(&store, "a.pdf", "CS201", &["alpha one", "alpha two"]);
        let b = ingested(&store, "b.pdf", "CS201", &["beta one"]);

        assert_eq!(store.stats().unwrap().chunk_count, 3);
        assert!(store.delete_document(&a.id).unwrap());
        assert!(!store.delete_document(&a.id).unwrap());

        assert!(store.chunks_by_document(&a.id).unwrap().is_empty());
        assert_eq!(store.chunks_by_document(&b.id).unwrap().len(), 1);
        assert_eq!(store.candidate_pool().unwrap().len(), 1);
    }

    #[test]
    fn test_store_chunk_requires_document() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        assert!(store.store_chunk("missing", new_chunk("orphan")).is_err());

        let doc = store.create_document(new_doc("a.pdf", "CS201")).unwrap();
        let chunk = store.store_chunk(&doc.id, new_chunk("kept")).unwrap();
        assert_eq!(store.chunks_by_document(&doc.id).unwrap(), vec![chunk]);
    }

    #[test]
    fn test_candidate_pool_preserves_insertion_order() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        ingested(&store, "a.pdf", "CS201", &["first", "second"]);
        ingested(&store, "b.pdf", "CS301", &["third"]);

        let pool = store.candidate_pool().unwrap();
        let texts: Vec<&str> = pool.iter().map(|e| e.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(pool[2].course, "CS301");
    }

    #[test]
    fn test_search_scoped_to_course() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let a = ingested(
            &store,
            "a.pdf",
            "CS201",
            &["process scheduling", "page replacement", "deadlock detection"],
        );
        ingested(&store, "b.pdf", "CS301", &["compiler parsing", "lexical analysis"]);

        let query = hash_embedding("scheduling", EMBEDDING_DIMENSION);
        let results = store.search_similar_chunks(&query, 5, Some("CS201")).unwrap();

        assert!(results.len() <= 3);
        assert!(results.iter().all(|r| r.chunk.document_id == a.id));

        let all = store.search_similar_chunks(&query, 5, None).unwrap();
        assert_eq!(all.len(), 5);
        for pair in all.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn test_embeddings_roundtrip_bit_identical() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let original = hash_embedding("Dijkstra's shortest path", EMBEDDING_DIMENSION);

        let doc_id = {
            let store = KnowledgeStore::open(&db_path).unwrap();
            let doc = store.create_document(new_doc("graphs.pdf", "CS201")).unwrap();
            store
                .store_chunk(
                    &doc.id,
                    NewChunk {
                        text: "Dijkstra's shortest path".to_string(),
                        embedding: original.clone(),
                        page: Some(3),
                    },
                )
                .unwrap();
            doc.id
        };

        let store = KnowledgeStore::open(&db_path).unwrap();
        let chunks = store.chunks_by_document(&doc_id).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page, Some(3));

        let stored: Vec<u64> = chunks[0].embedding.iter().map(|x| x.to_bits()).collect();
        let expected: Vec<u64> = original.iter().map(|x| x.to_bits()).collect();
        assert_eq!(stored, expected);
    }

    #[test]
    fn test_conversation_messages() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let conv = store.create_conversation(Some("CS201".to_string())).unwrap();

        store
            .create_message(NewMessage {
                conversation_id: conv.id.clone(),
                role: MessageRole::User,
                content: "What is paging?".to_string(),
                sources: None,
            })
            .unwrap();
        store
            .create_message(NewMessage {
                conversation_id: conv.id.clone(),
                role: MessageRole::Assistant,
                content: "Paging is ...".to_string(),
                sources: Some(vec!["os-notes.pdf".to_string()]),
            })
            .unwrap();

        let messages = store.messages_by_conversation(&conv.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert!(messages[0].sources.is_none());
        assert_eq!(
            messages[1].sources,
            Some(vec!["os-notes.pdf".to_string()])
        );

        let fetched = store.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(fetched.course.as_deref(), Some("CS201"));
        assert_eq!(store.list_conversations().unwrap().len(), 1);
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("PYQ".parse::<DocumentKind>().unwrap(), DocumentKind::Pyq);
        assert_eq!(
            "completed".parse::<ProcessingStatus>().unwrap(),
            ProcessingStatus::Completed
        );
        assert!("slides".parse::<DocumentKind>().is_err());
        assert!(DocumentKind::Book.prefers_direct_extraction());
        assert!(!DocumentKind::Notes.prefers_direct_extraction());
        assert!(ProcessingStatus::Failed.is_terminal());
    }

    #[test]
    fn test_stats() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        ingested(&store, "a.pdf", "CS201", &["one", "two"]);
        store.create_conversation(None).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.conversation_count, 1);
        assert_eq!(stats.message_count, 0);
        assert_eq!(stats.db_path, PathBuf::from(":memory:"));
    }
}
