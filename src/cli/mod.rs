//! CLI 모듈
//!
//! tutor-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::collector::{CollectionStats, CollectorConfig, FileType, UploadCollector, UploadFile};
use crate::config::{AppConfig, CONFIG_FILE_NAME};
use crate::knowledge::{
    CourseRetriever, Document, DocumentKind, IngestQueue, KnowledgeStore, MessageRole,
    ProcessingStatus,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "tutor-rag")]
#[command(version, about = "강의자료 기반 질의응답 RAG 도구", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: <데이터 디렉토리>/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// PDF 또는 스캔 이미지를 지식베이스에 추가
    Ingest {
        /// 업로드할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 업로드할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 과목 코드
        #[arg(long)]
        course: String,

        /// 문서 종류 (notes, pyq, book)
        #[arg(short, long)]
        kind: DocumentKind,

        /// 이미지 파일 건너뛰기
        #[arg(long)]
        skip_images: bool,
    },

    /// 강의자료에 질문 (대화 기록 없음)
    Ask {
        /// 질문
        question: String,

        /// 과목 필터
        #[arg(long)]
        course: Option<String>,

        /// 검색된 청크 표시
        #[arg(long)]
        show_chunks: bool,
    },

    /// 대화형 질의응답
    Chat {
        #[command(subcommand)]
        action: ChatCommand,
    },

    /// 저장된 문서 목록
    List {
        /// 과목 필터
        #[arg(long)]
        course: Option<String>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서 삭제 (청크 포함)
    Delete {
        /// 삭제할 문서 ID
        #[arg(short, long)]
        id: String,
    },

    /// 상태 확인
    Status,
}

#[derive(Subcommand)]
pub enum ChatCommand {
    /// 새 대화 시작
    New {
        /// 대화의 과목 (질문마다 검색 범위로 사용)
        #[arg(long)]
        course: Option<String>,
    },

    /// 대화에서 질문
    Ask {
        /// 대화 ID
        conversation: String,

        /// 질문
        question: String,
    },

    /// 대화 기록 보기
    History {
        /// 대화 ID
        conversation: String,
    },

    /// 대화 목록
    List,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = match cli.config {
        Some(ref path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    config.validate().context("설정 검증 실패")?;

    match cli.command {
        Commands::Ingest {
            file,
            dir,
            course,
            kind,
            skip_images,
        } => cmd_ingest(&config, file, dir, &course, kind, skip_images).await,
        Commands::Ask {
            question,
            course,
            show_chunks,
        } => cmd_ask(&config, &question, course.as_deref(), show_chunks).await,
        Commands::Chat { action } => cmd_chat(&config, action).await,
        Commands::List { course, limit } => cmd_list(&config, course.as_deref(), limit),
        Commands::Delete { id } => cmd_delete(&config, &id),
        Commands::Status => cmd_status(&config),
    }
}

fn open_retriever(config: &AppConfig) -> Result<Arc<CourseRetriever>> {
    let retriever = CourseRetriever::from_config(config).context("CourseRetriever 초기화 실패")?;
    Ok(Arc::new(retriever))
}

fn open_store(config: &AppConfig) -> Result<KnowledgeStore> {
    KnowledgeStore::open(&config.db_path()).context("KnowledgeStore 열기 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
///
/// 파일을 pending으로 등록하고 백그라운드 큐에서 추출과 색인을 수행합니다.
async fn cmd_ingest(
    config: &AppConfig,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    course: &str,
    kind: DocumentKind,
    skip_images: bool,
) -> Result<()> {
    if course.trim().is_empty() {
        bail!("--course 값이 비어 있습니다");
    }

    let collector = UploadCollector::new(CollectorConfig {
        skip_images,
        ..Default::default()
    });

    let files = if let Some(ref file_path) = file {
        match collector.collect_file(file_path)? {
            Some(f) => vec![f],
            None => {
                println!("[!] 지원하지 않는 파일 형식이거나 너무 큰 파일: {:?}", file_path);
                return Ok(());
            }
        }
    } else if let Some(ref dir_path) = dir {
        collector.collect_directory(dir_path)?
    } else {
        bail!("--file 또는 --dir를 지정해야 합니다");
    };

    if files.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: {} 파일", stats.total_files);
    println!("    PDF: {}, 이미지: {}", stats.pdf_files, stats.image_files);
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    config.ocr.ensure_ready()?;
    let retriever = open_retriever(config)?;
    let queue = IngestQueue::spawn(Arc::clone(&retriever));

    let mut queued: Vec<(Document, &UploadFile)> = Vec::with_capacity(files.len());
    for upload in &files {
        let bytes = match upload.read().await {
            Ok(b) => b,
            Err(e) => {
                println!("[!] {} 읽기 실패: {:#}", upload.name(), e);
                continue;
            }
        };

        let doc = queue.enqueue(upload.to_new_document(course, kind), bytes)?;
        println!(
            "[{}/{}] [{}] {} 등록 ({})",
            queued.len() + 1,
            files.len(),
            type_label(upload.file_type),
            doc.name,
            doc.kind
        );
        queued.push((doc, upload));
    }

    println!();
    println!("[*] 텍스트 추출 및 임베딩 중...");
    queue.shutdown().await?;

    let mut success_count = 0;
    let mut error_count = 0;

    for (doc, upload) in &queued {
        let stored = retriever.store().get_document(&doc.id)?;
        let status = stored.map(|d| d.status).unwrap_or(ProcessingStatus::Failed);

        if status == ProcessingStatus::Completed {
            let chunks = retriever.store().chunks_by_document(&doc.id)?.len();
            println!("  [OK] {} - {} 청크", upload.name(), chunks);
            success_count += 1;
        } else {
            println!("  [!] {} - {}", upload.name(), status);
            error_count += 1;
        }
    }

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", success_count, error_count);

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    config: &AppConfig,
    question: &str,
    course: Option<&str>,
    show_chunks: bool,
) -> Result<()> {
    let retriever = open_retriever(config)?;
    tracing::debug!("Generator: {}", retriever.generator_name());

    match course {
        Some(c) => println!("[*] 질문 중 ({}): \"{}\"", c, question),
        None => println!("[*] 질문 중: \"{}\"", question),
    }

    let answer = retriever.answer(question, course).await.context("답변 생성 실패")?;

    println!();
    println!("{}", answer.text);
    println!();

    if answer.sources.is_empty() {
        println!("[!] 인용된 자료 없음");
    } else {
        println!("[OK] 출처: {}", answer.sources.join(", "));
    }

    if show_chunks {
        println!();
        for (i, result) in answer.chunks.iter().enumerate() {
            let page = result
                .chunk
                .page
                .map(|p| format!(" p.{}", p))
                .unwrap_or_default();
            println!(
                "{}. [유사도: {:.4}] [{}{}]",
                i + 1,
                result.similarity,
                result.course,
                page
            );
            println!("   {}", truncate_text(&result.chunk.text, 200));
        }
    }

    Ok(())
}

/// 대화 명령어 (chat)
async fn cmd_chat(config: &AppConfig, action: ChatCommand) -> Result<()> {
    match action {
        ChatCommand::New { course } => {
            let store = open_store(config)?;
            let conversation = store.create_conversation(course)?;
            println!("[OK] 새 대화: {}", conversation.id);
            if let Some(ref c) = conversation.course {
                println!("     과목: {}", c);
            }
        }
        ChatCommand::Ask {
            conversation,
            question,
        } => {
            let retriever = open_retriever(config)?;
            let exchange = retriever
                .ask(&conversation, &question)
                .await
                .context("질문 처리 실패")?;

            println!("{}", exchange.assistant_message.content);
            if let Some(sources) = exchange.assistant_message.sources {
                println!();
                println!("[OK] 출처: {}", sources.join(", "));
            }
        }
        ChatCommand::History { conversation } => {
            let store = open_store(config)?;
            if store.get_conversation(&conversation)?.is_none() {
                bail!("대화 {}를 찾을 수 없습니다", conversation);
            }

            let messages = store.messages_by_conversation(&conversation)?;
            if messages.is_empty() {
                println!("[!] 메시지가 없습니다.");
                return Ok(());
            }

            for msg in messages {
                let who = match msg.role {
                    MessageRole::User => "학생",
                    MessageRole::Assistant => "튜터",
                };
                println!("[{}] {}", msg.created_at.format("%Y-%m-%d %H:%M"), who);
                println!("{}", msg.content);
                if let Some(sources) = msg.sources {
                    println!("  출처: {}", sources.join(", "));
                }
                println!();
            }
        }
        ChatCommand::List => {
            let store = open_store(config)?;
            let conversations = store.list_conversations()?;
            if conversations.is_empty() {
                println!("[!] 대화가 없습니다.");
                return Ok(());
            }

            println!("[OK] 대화 ({} 건):\n", conversations.len());
            for c in conversations {
                println!(
                    "  {} [{}] {}",
                    c.id,
                    c.course.as_deref().unwrap_or("-"),
                    c.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }

    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(config: &AppConfig, course: Option<&str>, limit: usize) -> Result<()> {
    let store = open_store(config)?;
    let docs = store.list_documents(course).context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());

    for doc in docs.iter().take(limit) {
        println!(
            "  {} [{}] [{}] {}",
            doc.id,
            doc.course,
            doc.kind,
            truncate_text(&doc.name, 40)
        );
        println!(
            "        {} | {} | {}",
            doc.uploaded_at.format("%Y-%m-%d %H:%M"),
            format_bytes(doc.file_size as usize),
            doc.status
        );
        println!();
    }

    if docs.len() > limit {
        println!("  ... 외 {} 건", docs.len() - limit);
    }

    Ok(())
}

/// 삭제 명령어 (delete)
fn cmd_delete(config: &AppConfig, id: &str) -> Result<()> {
    let store = open_store(config)?;

    let doc = store
        .get_document(id)
        .context("문서 조회 실패")?
        .ok_or_else(|| anyhow::anyhow!("ID {}인 문서를 찾을 수 없습니다", id))?;

    let chunks = store.chunks_by_document(id)?.len();
    if store.delete_document(id).context("문서 삭제 실패")? {
        println!("[OK] 문서 삭제됨: {} ({} 청크)", doc.name, chunks);
    } else {
        println!("[!] 삭제할 문서를 찾을 수 없습니다");
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(config: &AppConfig) -> Result<()> {
    println!("tutor-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = config.data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());
    println!("[*] 설정 파일: {}", data_dir.join(CONFIG_FILE_NAME).display());
    println!(
        "[*] 청킹: {} 단어 (중첩 {}), top-k {}",
        config.chunking.chunk_size, config.chunking.overlap, config.retrieval.top_k
    );

    if config.generation.has_api_key() {
        println!("[OK] 답변 생성: {}", config.generation.model);
    } else {
        println!("[!] 답변 생성: 폴백 모드 (HF_API_KEY 미설정)");
        println!("    설정: export HF_API_KEY=your-key");
    }
    println!("[*] OCR 엔진: {:?}", config.ocr.engine);

    match open_store(config).and_then(|store| {
        let stats = store.stats()?;
        let docs = store.list_documents(None)?;
        Ok((stats, docs))
    }) {
        Ok((stats, docs)) => {
            let count = |s: ProcessingStatus| docs.iter().filter(|d| d.status == s).count();
            println!("[OK] 저장된 문서: {} 건", stats.document_count);
            println!(
                "     완료 {}, 처리 중 {}, 대기 {}, 실패 {}",
                count(ProcessingStatus::Completed),
                count(ProcessingStatus::Processing),
                count(ProcessingStatus::Pending),
                count(ProcessingStatus::Failed)
            );
            println!("[OK] 검색 인덱스: {} 청크", stats.chunk_count);
            println!(
                "[OK] 대화: {} 건, 메시지 {} 건",
                stats.conversation_count, stats.message_count
            );
        }
        Err(e) => {
            println!("[!] KnowledgeStore 열기 실패: {:#}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn type_label(file_type: FileType) -> &'static str {
    match file_type {
        FileType::Pdf => "PDF",
        FileType::Image => "IMG",
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
