use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("OCR engine not available: {0}")]
    Unavailable(String),
}

/// Abstraction over an OCR backend.
/// Implementations accept PNG image bytes and return the recognized text,
/// which may be empty. Calls are blocking; callers bound them with a timeout.
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;
    fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError>;
}

impl OcrBackend for Box<dyn OcrBackend> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
        (**self).recognize(image_bytes)
    }
}

impl OcrBackend for Arc<dyn OcrBackend> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
        (**self).recognize(image_bytes)
    }
}

/// Line endings unified and trailing whitespace dropped; backends differ here.
pub fn normalize_text(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set string — useful for exercising the extraction pipeline
/// without an OCR engine installed.
pub struct MockRecognizer {
    pub text: String,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrBackend for MockRecognizer {
    fn name(&self) -> &str {
        "mock"
    }

    fn recognize(&self, _image_bytes: &[u8]) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

// ── Tesseract executable backend ──────────────────────────────────────────────

/// Runs the `tesseract` command-line program, piping the image through
/// stdin and reading text from stdout.
#[derive(Debug, Clone)]
pub struct TesseractCommand {
    binary: String,
    lang: String,
    psm: u8,
}

impl TesseractCommand {
    pub fn new(binary: impl Into<String>, lang: impl Into<String>, psm: u8) -> Self {
        Self { binary: binary.into(), lang: lang.into(), psm }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.lang.clone(),
            "--psm".to_string(),
            self.psm.to_string(),
        ]
    }
}

impl Default for TesseractCommand {
    fn default() -> Self {
        Self::new("tesseract", "eng", 6)
    }
}

impl OcrBackend for TesseractCommand {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
        let mut child = Command::new(&self.binary)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => OcrError::Unavailable(format!("'{}' not found on PATH", self.binary)),
                _ => OcrError::Engine(format!("failed to start '{}': {e}", self.binary)),
            })?;

        // Tesseract reads all of stdin before writing anything, so a plain
        // write-then-wait cannot deadlock. Dropping the handle closes the pipe.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(image_bytes)
                .map_err(|e| OcrError::Engine(format!("failed to send image: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| OcrError::Engine(format!("tesseract did not finish: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ── In-process Tesseract backend (optional, gated behind `tesseract` feature) ─

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError};
    use leptess::LepTess;

    /// libtesseract via `leptess`. A fresh engine per call keeps the type
    /// `Sync` without a lock around the handle.
    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn name(&self) -> &str {
            "leptess"
        }

        fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Unavailable(e.to_string()))?;
            lt.set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))
        }
    }
}
