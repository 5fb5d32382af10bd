//! Ingest Queue - 백그라운드 문서 수집
//!
//! 업로드 요청은 문서를 pending으로 등록하고 작업을 큐에 넣은 뒤 바로 반환합니다.
//! 단일 워커가 작업을 순서대로 꺼내 pending -> processing -> completed | failed로 진행합니다.
//! 작업 실패는 로그로만 남기며 제출자에게 전파하지 않습니다.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::retriever::CourseRetriever;
use super::store::{Document, NewDocument};

/// 수집 작업
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub document_id: String,
    pub bytes: Vec<u8>,
}

/// 백그라운드 수집 큐
pub struct IngestQueue {
    retriever: Arc<CourseRetriever>,
    sender: mpsc::UnboundedSender<IngestJob>,
    worker: JoinHandle<()>,
}

impl IngestQueue {
    /// 워커를 시작하고 큐 생성 (tokio 런타임 안에서 호출)
    pub fn spawn(retriever: Arc<CourseRetriever>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<IngestJob>();
        let worker_retriever = Arc::clone(&retriever);

        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                tracing::debug!(
                    "Processing ingest job: {} ({} bytes)",
                    job.document_id,
                    job.bytes.len()
                );
                // 실패 시 문서 상태는 retriever가 failed로 기록함
                if let Err(e) = worker_retriever
                    .process_document(&job.document_id, &job.bytes)
                    .await
                {
                    tracing::warn!("Ingest job {} failed: {:#}", job.document_id, e);
                }
            }
            tracing::debug!("Ingest worker stopped");
        });

        Self {
            retriever,
            sender,
            worker,
        }
    }

    /// 작업 제출 (즉시 반환)
    pub fn submit(&self, job: IngestJob) -> Result<()> {
        self.sender
            .send(job)
            .map_err(|e| anyhow::anyhow!("Ingest queue is closed: {}", e.0.document_id))
    }

    /// 문서 등록 + 작업 제출
    ///
    /// 반환된 문서는 pending 상태입니다.
    pub fn enqueue(&self, doc: NewDocument, bytes: Vec<u8>) -> Result<Document> {
        let document = self.retriever.register(doc)?;
        self.submit(IngestJob {
            document_id: document.id.clone(),
            bytes,
        })?;
        Ok(document)
    }

    /// 큐를 닫고 남은 작업이 모두 끝날 때까지 대기
    pub async fn shutdown(self) -> Result<()> {
        let Self { sender, worker, .. } = self;
        drop(sender);
        worker.await.context("Ingest worker panicked")?;
        tracing::info!("Ingest queue drained");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
