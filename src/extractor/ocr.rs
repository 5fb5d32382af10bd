//! OCR 엔진 모듈
//!
//! 스캔된 노트와 기출문제는 텍스트 레이어가 없으므로 OCR로 인식합니다.
//! 기본 구현은 로컬 `tesseract` 실행 파일을 호출합니다.
//! tesseract는 PDF를 읽지 못하므로, PDF 입력은 먼저 `pdftoppm`으로
//! 페이지별 PNG로 변환한 뒤 페이지마다 인식하고 폼피드로 이어 붙입니다.
//!
//! 각 인식 작업은 `OcrWorker`가 임시 디렉토리와 자식 프로세스를 소유하며,
//! 성공, 실패, 타임아웃 어느 경로로 끝나든 drop 시점에 모두 정리됩니다.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use super::{extension_for, sniff_mime_type, OcrConfig};
use crate::knowledge::PAGE_SEPARATOR;

/// 래스터화된 페이지 파일 접두사
const PAGE_PREFIX: &str = "page";

/// 래스터화 해상도
const RASTER_DPI: u32 = 300;

/// OCR 엔진
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// 파일 바이트에서 텍스트 인식
    async fn recognize(&self, bytes: &[u8]) -> Result<String>;

    /// 엔진 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Tesseract
// ============================================================================

/// tesseract CLI 기반 OCR
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    command: String,
    language: String,
    rasterizer: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(command: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
            rasterizer: "pdftoppm".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(config.command.clone(), config.language.clone())
            .with_rasterizer(config.pdf_rasterizer.clone())
            .with_timeout(Duration::from_secs(config.timeout_secs))
    }

    /// PDF를 페이지 이미지로 바꿀 실행 파일 (pdftoppm 호환 인자)
    pub fn with_rasterizer(mut self, rasterizer: impl Into<String>) -> Self {
        self.rasterizer = rasterizer.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, bytes: &[u8]) -> Result<String> {
        let worker = OcrWorker::acquire(bytes).await?;

        let pages = if worker.is_pdf {
            worker.rasterize(&self.rasterizer, self.timeout).await?
        } else {
            vec![worker.input.clone()]
        };

        let mut texts = Vec::with_capacity(pages.len());
        for page in &pages {
            let text = worker
                .recognize_page(page, &self.command, &self.language, self.timeout)
                .await?;
            texts.push(text.trim().to_string());
        }

        tracing::debug!("OCR recognized {} page(s)", texts.len());
        Ok(texts.join(&PAGE_SEPARATOR.to_string()))
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

// ============================================================================
// Unavailable
// ============================================================================

/// 설정이 부족해 사용할 수 없는 OCR 엔진
///
/// 생성은 항상 성공하고, 인식을 시도할 때 이유와 함께 실패합니다.
#[derive(Debug, Clone)]
pub struct UnavailableOcr {
    engine: String,
    reason: String,
}

impl UnavailableOcr {
    pub fn new(engine: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for UnavailableOcr {
    async fn recognize(&self, _bytes: &[u8]) -> Result<String> {
        anyhow::bail!("{} OCR is unavailable: {}", self.engine, self.reason)
    }

    fn name(&self) -> &str {
        &self.engine
    }
}

// ============================================================================
// Worker
// ============================================================================

/// 단일 OCR 작업의 스크래치 리소스
struct OcrWorker {
    scratch: TempDir,
    input: PathBuf,
    is_pdf: bool,
}

impl OcrWorker {
    /// 임시 디렉토리를 만들고 입력 파일 기록
    async fn acquire(bytes: &[u8]) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("tutor-rag-ocr-")
            .tempdir()
            .context("Failed to create OCR scratch directory")?;

        let mime = sniff_mime_type(bytes);
        let ext = extension_for(mime);
        let input = scratch.path().join(format!("input.{}", ext));
        tokio::fs::write(&input, bytes)
            .await
            .with_context(|| format!("Failed to write OCR input: {:?}", input))?;

        tracing::debug!("OCR worker acquired: {:?}", scratch.path());
        Ok(Self {
            scratch,
            input,
            is_pdf: mime == Some("application/pdf"),
        })
    }

    fn dir(&self) -> &Path {
        self.scratch.path()
    }

    /// `<rasterizer> -r 300 -png <input> <dir>/page` 실행 후 페이지 순서대로 반환
    async fn rasterize(&self, rasterizer: &str, timeout: Duration) -> Result<Vec<PathBuf>> {
        let prefix = self.dir().join(PAGE_PREFIX);
        let mut cmd = tokio::process::Command::new(rasterizer);
        cmd.arg("-r")
            .arg(RASTER_DPI.to_string())
            .arg("-png")
            .arg(&self.input)
            .arg(&prefix);
        run_command(cmd, self.dir(), timeout)
            .await
            .with_context(|| format!("Failed to rasterize PDF with {}", rasterizer))?;

        let pages = collect_pages(self.dir())?;
        if pages.is_empty() {
            anyhow::bail!("PDF rasterizer produced no pages");
        }
        Ok(pages)
    }

    /// `<command> <image> stdout -l <language>` 실행
    async fn recognize_page(
        &self,
        image: &Path,
        command: &str,
        language: &str,
        timeout: Duration,
    ) -> Result<String> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.arg(image).arg("stdout").arg("-l").arg(language);
        run_command(cmd, self.dir(), timeout).await
    }
}

/// 자식 프로세스 실행 (타임아웃 시 kill)
async fn run_command(
    mut cmd: tokio::process::Command,
    dir: &Path,
    timeout: Duration,
) -> Result<String> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let child = cmd
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start OCR command: {}", program))?;

    // 타임아웃 시 future가 drop되면서 자식 프로세스도 종료됨
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| anyhow::anyhow!("OCR timed out after {:?}", timeout))?
        .context("Failed to wait for OCR command")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("OCR command exited with {}: {}", output.status, stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `page-1.png`, `page-02.png` 형태의 파일을 페이지 번호 순으로 수집
fn collect_pages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pages = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list OCR scratch directory: {:?}", dir))?;

    for entry in entries {
        let path = entry?.path();
        let number = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.strip_prefix(PAGE_PREFIX))
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|n| n.parse::<u32>().ok());
        let is_png = path.extension().map(|e| e == "png").unwrap_or(false);

        if let (Some(number), true) = (number, is_png) {
            pages.push((number, path));
        }
    }

    pages.sort_by_key(|(number, _)| *number);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

impl Drop for OcrWorker {
    fn drop(&mut self) {
        tracing::debug!("OCR worker released: {:?}", self.scratch.path());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_removes_scratch_dir() {
        let worker = OcrWorker::acquire(b"%PDF-1.4 fake").await.unwrap();
        let dir = worker.dir().to_path_buf();

        assert!(worker.input.ends_with("input.pdf"));
        assert!(worker.input.exists());

        drop(worker);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_missing_command_is_error() {
        let ocr = TesseractOcr::new("tutor-rag-no-such-ocr-binary", "eng");
        let err = ocr.recognize(b"\x89PNG\r\n\x1a\n").await.unwrap_err();
        assert!(err.to_string().contains("Failed to start OCR command"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_arguments() {
        // echo는 받은 인자를 그대로 출력
        let ocr = TesseractOcr::new("echo", "kor");
        let text = ocr.recognize(b"\x89PNG\r\n\x1a\nrest").await.unwrap();

        assert!(text.contains("input.png"));
        assert!(text.ends_with("stdout -l kor"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_error() {
        let ocr = TesseractOcr::new("false", "eng");
        let err = ocr.recognize(b"\x89PNG\r\n\x1a\n").await.unwrap_err();
        assert!(err.to_string().contains("OCR command exited"));
    }

    /// pdftoppm처럼 `<prefix>-N.png` 페이지를 만드는 스크립트
    #[cfg(unix)]
    fn fake_rasterizer(dir: &Path, pages: &[&str]) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let touches: String = pages
            .iter()
            .map(|suffix| format!("printf x > \"$5-{}.png\"\n", suffix))
            .collect();
        let script = dir.join("fake-pdftoppm");
        std::fs::write(&script, format!("#!/bin/sh\n{}", touches)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pdf_is_rasterized_per_page() {
        let tools = TempDir::new().unwrap();
        // 페이지 번호 순서가 사전 순서와 다르도록 10페이지 포함
        let rasterizer = fake_rasterizer(tools.path(), &["10", "2", "1"]);

        let ocr = TesseractOcr::new("echo", "eng").with_rasterizer(rasterizer.to_string_lossy());
        let text = ocr.recognize(b"%PDF-1.4 scanned").await.unwrap();

        let pages: Vec<&str> = text.split(PAGE_SEPARATOR).collect();
        assert_eq!(pages.len(), 3);
        assert!(pages[0].ends_with("page-1.png stdout -l eng"));
        assert!(pages[1].ends_with("page-2.png stdout -l eng"));
        assert!(pages[2].ends_with("page-10.png stdout -l eng"));
        assert!(!text.contains("input.pdf"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pdf_without_pages_is_error() {
        let tools = TempDir::new().unwrap();
        let rasterizer = fake_rasterizer(tools.path(), &[]);

        let ocr = TesseractOcr::new("echo", "eng").with_rasterizer(rasterizer.to_string_lossy());
        let err = ocr.recognize(b"%PDF-1.4").await.unwrap_err();
        assert!(err.to_string().contains("produced no pages"));
    }

    #[tokio::test]
    async fn test_missing_rasterizer_is_error() {
        let ocr = TesseractOcr::new("echo", "eng").with_rasterizer("tutor-rag-no-such-rasterizer");
        let err = ocr.recognize(b"%PDF-1.4").await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to rasterize PDF"));
    }

    #[test]
    fn test_collect_pages_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        for name in ["page-03.png", "page-01.png", "input.pdf", "page-02.txt", "pages.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let pages = collect_pages(dir.path()).unwrap();
        let names: Vec<String> = pages
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["page-01.png", "page-03.png"]);
    }
}
