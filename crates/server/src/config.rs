use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use spendlens_core::{CategoryTable, CategoryTableError};
use spendlens_ocr::{MockRecognizer, OcrBackend, PipelineOptions, PreprocessOptions, TesseractCommand};
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "SPENDLENS_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "spendlens.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("Invalid config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Failed to load category table {path}: {source}")]
    Categories { path: PathBuf, source: CategoryTableError },
    #[error("OCR backend '{0}' is not compiled into this build")]
    BackendUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackendKind {
    /// The `tesseract` executable.
    Tesseract,
    /// In-process libtesseract (`tesseract` cargo feature).
    Leptess,
    /// Returns `ocr.mock_text` for every image.
    Mock,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    pub backend: OcrBackendKind,
    pub tesseract_bin: String,
    pub lang: String,
    pub psm: u8,
    pub mock_text: String,
    /// tessdata directory for the in-process backend.
    pub tessdata: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: OcrBackendKind::Tesseract,
            tesseract_bin: "tesseract".to_string(),
            lang: "eng".to_string(),
            psm: 6,
            mock_text: String::new(),
            tessdata: None,
        }
    }
}

impl OcrConfig {
    /// Construct the engine handle shared by every request.
    pub fn build_backend(&self) -> Result<Arc<dyn OcrBackend>, ConfigError> {
        match self.backend {
            OcrBackendKind::Tesseract => Ok(Arc::new(TesseractCommand::new(
                self.tesseract_bin.clone(),
                self.lang.clone(),
                self.psm,
            ))),
            OcrBackendKind::Mock => Ok(Arc::new(MockRecognizer::new(self.mock_text.clone()))),
            #[cfg(feature = "tesseract")]
            OcrBackendKind::Leptess => Ok(Arc::new(spendlens_ocr::TesseractRecognizer::new(
                self.tessdata.clone(),
                &self.lang,
            ))),
            #[cfg(not(feature = "tesseract"))]
            OcrBackendKind::Leptess => Err(ConfigError::BackendUnavailable("leptess".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
    pub max_dimension: u32,
    pub denoise_radius: u32,
    /// Decoded-area cap, checked from the image header.
    pub max_pixels: u64,
    pub preprocess_timeout_secs: u64,
    pub ocr_timeout_secs: u64,
    pub ocr: OcrConfig,
    pub categories_file: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_upload_bytes: 20 * 1024 * 1024,
            max_dimension: 2800,
            denoise_radius: 1,
            max_pixels: 50_000_000,
            preprocess_timeout_secs: 30,
            ocr_timeout_secs: 30,
            ocr: OcrConfig::default(),
            categories_file: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl ServerConfig {
    /// Load from the process environment: the file named by
    /// `SPENDLENS_CONFIG` (or `spendlens.toml` when present), then `SPENDLENS_*`
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let path = explicit.or_else(|| {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        });
        Self::from_sources(path.as_deref(), |key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::load`] with the file and environment supplied
    /// by the caller.
    pub fn from_sources(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = env("SPENDLENS_BIND_ADDR") {
            self.bind_addr = parse_value("SPENDLENS_BIND_ADDR", &v)?;
        }
        if let Some(v) = env("SPENDLENS_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_value("SPENDLENS_MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = env("SPENDLENS_MAX_PIXELS") {
            self.max_pixels = parse_value("SPENDLENS_MAX_PIXELS", &v)?;
        }
        if let Some(v) = env("SPENDLENS_OCR_TIMEOUT_SECS") {
            self.ocr_timeout_secs = parse_value("SPENDLENS_OCR_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = env("SPENDLENS_OCR_BACKEND") {
            self.ocr.backend = match v.trim().to_ascii_lowercase().as_str() {
                "tesseract" => OcrBackendKind::Tesseract,
                "leptess" => OcrBackendKind::Leptess,
                "mock" => OcrBackendKind::Mock,
                _ => return Err(ConfigError::InvalidValue { key: "SPENDLENS_OCR_BACKEND", value: v.clone() }),
            };
        }
        if let Some(v) = env("SPENDLENS_TESSERACT_BIN") {
            self.ocr.tesseract_bin = v;
        }
        if let Some(v) = env("SPENDLENS_OCR_LANG") {
            self.ocr.lang = v;
        }
        if let Some(v) = env("SPENDLENS_CATEGORIES") {
            self.categories_file = Some(PathBuf::from(v));
        }
        if let Some(v) = env("SPENDLENS_LOG_FORMAT") {
            self.log_format = match v.trim().to_ascii_lowercase().as_str() {
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => return Err(ConfigError::InvalidValue { key: "SPENDLENS_LOG_FORMAT", value: v.clone() }),
            };
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue { key: "max_upload_bytes", value: "0".into() });
        }
        if self.ocr_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue { key: "ocr_timeout_secs", value: "0".into() });
        }
        if self.preprocess_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue { key: "preprocess_timeout_secs", value: "0".into() });
        }
        if self.max_pixels == 0 {
            return Err(ConfigError::InvalidValue { key: "max_pixels", value: "0".into() });
        }
        if self.max_dimension == 0 {
            return Err(ConfigError::InvalidValue { key: "max_dimension", value: "0".into() });
        }
        if self.ocr.lang.trim().is_empty() {
            return Err(ConfigError::InvalidValue { key: "ocr.lang", value: self.ocr.lang.clone() });
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            preprocess: PreprocessOptions {
                max_dimension: self.max_dimension,
                denoise_radius: self.denoise_radius,
                max_pixels: self.max_pixels,
            },
            preprocess_timeout: Duration::from_secs(self.preprocess_timeout_secs),
            ocr_timeout: Duration::from_secs(self.ocr_timeout_secs),
            max_image_bytes: self.max_upload_bytes,
        }
    }

    /// The configured category table, or the built-in one.
    pub fn category_table(&self) -> Result<CategoryTable, ConfigError> {
        let Some(path) = &self.categories_file else {
            return Ok(CategoryTable::default());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        CategoryTable::from_toml(&content)
            .map_err(|source| ConfigError::Categories { path: path.clone(), source })
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value: value.to_string() })
}
