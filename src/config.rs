//! 설정 모듈
//!
//! `<데이터 디렉토리>/config.toml`에서 설정을 읽고 환경변수로 덮어씁니다.
//! API 키는 환경변수에서만 읽으며 파일에 기록하지 않습니다.
//!
//! ```toml
//! [chunking]
//! chunk_size = 500
//! overlap = 50
//!
//! [retrieval]
//! top_k = 5
//!
//! [generation]
//! model = "microsoft/Phi-3-mini-4k-instruct"
//!
//! [ocr]
//! engine = "tesseract"
//! language = "eng"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::extractor::OcrConfig;
use crate::generation::GenerationConfig;
use crate::knowledge::{get_data_dir, ChunkConfig, RetrievalConfig};

/// 설정 파일 이름
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// DB 파일 이름
pub const DB_FILE_NAME: &str = "knowledge.db";

/// Hugging Face API 키 환경변수 (우선순위 순)
const HF_KEY_VARS: [&str; 2] = ["HF_API_KEY", "HUGGINGFACE_API_KEY"];

/// Gemini API 키 환경변수 (우선순위 순)
const GEMINI_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"];

/// 데이터 디렉토리 환경변수
const DATA_DIR_VAR: &str = "TUTOR_RAG_DATA_DIR";

/// 애플리케이션 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 데이터 디렉토리 (없으면 기본 위치)
    pub data_dir: Option<PathBuf>,
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub ocr: OcrConfig,
}

impl AppConfig {
    /// 기본 위치에서 설정 로드 + 환경변수 적용
    ///
    /// 설정 파일이 없으면 기본값을 사용합니다.
    pub fn load() -> Result<Self> {
        let env_dir = std::env::var(DATA_DIR_VAR).ok().map(PathBuf::from);
        let path = env_dir
            .unwrap_or_else(get_data_dir)
            .join(CONFIG_FILE_NAME);

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!("No config file at {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// 지정한 파일에서 설정 로드 + 환경변수 적용
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// 환경변수 적용
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first_set = |names: &[&str]| {
            names
                .iter()
                .filter_map(|&name| lookup(name))
                .find(|value| !value.trim().is_empty())
        };

        if let Some(key) = first_set(&HF_KEY_VARS) {
            self.generation.api_key = Some(key);
        }
        if let Some(key) = first_set(&GEMINI_KEY_VARS) {
            self.ocr.gemini_api_key = Some(key);
        }
        if let Some(dir) = first_set(&[DATA_DIR_VAR]) {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// 설정 검증 (시작 시 한 번)
    pub fn validate(&self) -> Result<(), RagError> {
        self.chunking.validate()?;
        if self.retrieval.top_k == 0 {
            return Err(RagError::ZeroTopK);
        }
        Ok(())
    }

    /// 실제 사용할 데이터 디렉토리
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(get_data_dir)
    }

    /// 지식 저장소 DB 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(DB_FILE_NAME)
    }

    /// TOML 문자열로 직렬화 (API 키 제외)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

// ============================================================================
// Tests
// ============================================================================
