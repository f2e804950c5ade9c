use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::extract::Extractor;
use crate::preprocess::{self, PreprocessError, PreprocessOptions};
use crate::recognizer::{normalize_text, OcrBackend, OcrError};
use crate::types::{ExtractedFields, ExtractionResult, FailureKind};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to read receipt file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Image is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },
    #[error("OCR timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("Image preprocessing timed out after {}s", .0.as_secs_f32())]
    PreprocessTimeout(Duration),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
    #[error("OCR worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PipelineError::Io(_) => FailureKind::InvalidImage,
            PipelineError::Preprocess(PreprocessError::InvalidImage(_))
            | PipelineError::Preprocess(PreprocessError::Io(_)) => FailureKind::InvalidImage,
            PipelineError::Preprocess(PreprocessError::Encode(_)) => FailureKind::OcrFailure,
            PipelineError::Preprocess(PreprocessError::TooLarge { .. }) | PipelineError::TooLarge { .. } => {
                FailureKind::ImageTooLarge
            }
            PipelineError::Timeout(_) | PipelineError::PreprocessTimeout(_) => FailureKind::OcrTimeout,
            PipelineError::Ocr(_) | PipelineError::Join(_) => FailureKind::OcrFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub preprocess: PreprocessOptions,
    /// Upper bound on decoding and cleanup of one image.
    pub preprocess_timeout: Duration,
    /// Upper bound on a single OCR engine call.
    pub ocr_timeout: Duration,
    /// Uploads larger than this are rejected before decoding.
    pub max_image_bytes: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            preprocess: PreprocessOptions::default(),
            preprocess_timeout: Duration::from_secs(30),
            ocr_timeout: Duration::from_secs(30),
            max_image_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Text and fields recovered from one receipt.
#[derive(Debug, Clone)]
pub struct ProcessedReceipt {
    pub raw_text: String,
    pub fields: ExtractedFields,
}

/// Orchestrates: size guard → preprocess (bounded) → OCR (bounded) → extract.
///
/// The backend handle is shared, not owned per request: build one pipeline at
/// startup and call it from any number of tasks.
pub struct ReceiptPipeline<R: OcrBackend> {
    recognizer: Arc<R>,
    extractor: Extractor,
    options: PipelineOptions,
}

impl<R: OcrBackend + 'static> ReceiptPipeline<R> {
    pub fn new(recognizer: R, extractor: Extractor, options: PipelineOptions) -> Self {
        Self::with_shared(Arc::new(recognizer), extractor, options)
    }

    pub fn with_shared(recognizer: Arc<R>, extractor: Extractor, options: PipelineOptions) -> Self {
        Self { recognizer, extractor, options }
    }

    pub fn backend_name(&self) -> &str {
        self.recognizer.name()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Process a file on disk. An unreadable file is reported like an
    /// undecodable upload.
    pub async fn process_file(&self, path: &Path) -> ExtractionResult {
        match tokio::fs::read(path).await {
            Ok(bytes) => self.process_bytes(&bytes).await,
            Err(e) => {
                let err = PipelineError::Io(e);
                tracing::warn!(path = %path.display(), error = %err, "receipt file unreadable");
                ExtractionResult::failed(err.failure_kind(), err.to_string())
            }
        }
    }

    /// Process raw upload bytes. Never fails as a Rust error: decode and OCR
    /// faults come back as a result with `success == false`.
    pub async fn process_bytes(&self, data: &[u8]) -> ExtractionResult {
        match self.try_process_bytes(data).await {
            Ok(receipt) => ExtractionResult::extracted(receipt.fields, receipt.raw_text),
            Err(e) => {
                tracing::warn!(
                    backend = self.backend_name(),
                    kind = %e.failure_kind(),
                    error = %e,
                    "receipt extraction failed"
                );
                ExtractionResult::failed(e.failure_kind(), e.to_string())
            }
        }
    }

    pub async fn try_process_bytes(&self, data: &[u8]) -> Result<ProcessedReceipt, PipelineError> {
        // 1. Size guard.
        if data.len() > self.options.max_image_bytes {
            return Err(PipelineError::TooLarge {
                size: data.len(),
                limit: self.options.max_image_bytes,
            });
        }

        // 2. Decode + preprocess on the blocking pool (CPU bound). The decoder
        //    rejects oversized canvases from the header alone.
        let started = Instant::now();
        let preprocess_options = self.options.preprocess;
        let owned = data.to_vec();
        let prepared = tokio::task::spawn_blocking(move || {
            preprocess::prepare_for_ocr_from_bytes(&owned, &preprocess_options)
        });
        let png = match tokio::time::timeout(self.options.preprocess_timeout, prepared).await {
            Ok(joined) => joined??,
            Err(_) => return Err(PipelineError::PreprocessTimeout(self.options.preprocess_timeout)),
        };
        let preprocess_ms = started.elapsed().as_millis() as u64;

        // 3. OCR, bounded. On timeout the blocking call is abandoned and its
        //    result dropped when it eventually returns.
        let started = Instant::now();
        let recognizer = Arc::clone(&self.recognizer);
        let ocr = tokio::task::spawn_blocking(move || recognizer.recognize(&png));
        let raw = match tokio::time::timeout(self.options.ocr_timeout, ocr).await {
            Ok(joined) => joined??,
            Err(_) => return Err(PipelineError::Timeout(self.options.ocr_timeout)),
        };
        let ocr_ms = started.elapsed().as_millis() as u64;

        // 4. Extract. Empty text simply yields no fields.
        let raw_text = normalize_text(&raw);
        let fields = self.extractor.extract(&raw_text);

        tracing::info!(
            backend = self.backend_name(),
            preprocess_ms,
            ocr_ms,
            chars = raw_text.chars().count(),
            amount = fields.amount.is_some(),
            date_parsed = !fields.date.value.is_fallback(),
            merchant = !fields.merchant.value.is_unknown(),
            category = %fields.category.value,
            "receipt extracted"
        );

        Ok(ProcessedReceipt { raw_text, fields })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::MockRecognizer;
    use crate::types::{Merchant, ReceiptDate};
    use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
    use spendlens_core::Amount;
    use std::io::Cursor;

    struct FailingRecognizer;

    impl OcrBackend for FailingRecognizer {
        fn name(&self) -> &str {
            "failing"
        }

        fn recognize(&self, _image_bytes: &[u8]) -> Result<String, OcrError> {
            Err(OcrError::Engine("engine crashed".into()))
        }
    }

    struct SlowRecognizer(Duration);

    impl OcrBackend for SlowRecognizer {
        fn name(&self) -> &str {
            "slow"
        }

        fn recognize(&self, _image_bytes: &[u8]) -> Result<String, OcrError> {
            std::thread::sleep(self.0);
            Ok("too late".into())
        }
    }

    /// A clean synthetic receipt: dark text-like bars on white paper.
    fn receipt_png() -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_fn(120, 160, |x, y| {
            if y % 16 < 6 && (10..110).contains(&x) { Rgb([20, 20, 20]) } else { Rgb([250, 250, 250]) }
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn pipeline<R: OcrBackend + 'static>(recognizer: R) -> ReceiptPipeline<R> {
        ReceiptPipeline::new(recognizer, Extractor::default(), PipelineOptions::default())
    }

    #[tokio::test]
    async fn end_to_end_extracts_fields() {
        let p = pipeline(MockRecognizer::new(
            "Acme Supermarket\r\n123 Main St\r\nDate: 03/14/2024\r\nTotal: $42.50\r\n",
        ));
        let result = p.process_bytes(&receipt_png()).await;

        assert!(result.success);
        assert!(result.requires_confirmation());
        assert!(result.error.is_none());
        assert!(result.confidence > 0.0 && result.confidence < 1.0);
        assert_eq!(result.raw_text, "Acme Supermarket\n123 Main St\nDate: 03/14/2024\nTotal: $42.50");

        let fields = result.fields.unwrap();
        assert_eq!(fields.amount.unwrap().value, Amount::from_cents(4250));
        assert_eq!(
            fields.date.value,
            ReceiptDate::Parsed(chrono::NaiveDate::from_ymd_opt(2024, 3, 14).unwrap())
        );
        assert_eq!(fields.merchant.value, Merchant::Named("Acme Supermarket".into()));
        assert_eq!(fields.category.value, "Groceries");
    }

    #[tokio::test]
    async fn empty_ocr_text_is_still_success() {
        let result = pipeline(MockRecognizer::new("")).process_bytes(&receipt_png()).await;
        assert!(result.success);
        assert!(result.requires_confirmation());
        let fields = result.fields.unwrap();
        assert!(fields.is_empty());
        assert!(fields.date.value.is_fallback());
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn undecodable_upload_is_invalid_image() {
        let result = pipeline(MockRecognizer::new("irrelevant")).process_bytes(b"GIF89a-not-really").await;
        assert!(!result.success);
        assert!(result.requires_confirmation());
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidImage));
        assert!(result.fields.is_none());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_decoding() {
        let p = ReceiptPipeline::new(
            MockRecognizer::new("x"),
            Extractor::default(),
            PipelineOptions { max_image_bytes: 16, ..PipelineOptions::default() },
        );
        let err = p.try_process_bytes(&[0u8; 17]).await.unwrap_err();
        assert!(matches!(err, PipelineError::TooLarge { size: 17, limit: 16 }));
        assert_eq!(err.failure_kind(), FailureKind::ImageTooLarge);
    }

    #[tokio::test]
    async fn huge_canvas_in_small_upload_is_too_large() {
        let img: image::GrayImage = ImageBuffer::from_fn(2000, 1000, |_, _| image::Luma([255u8]));
        let mut data = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
            .unwrap();

        let options = PipelineOptions {
            preprocess: PreprocessOptions { max_pixels: 1_000_000, ..PreprocessOptions::default() },
            ..PipelineOptions::default()
        };
        assert!(data.len() < options.max_image_bytes);

        let p = ReceiptPipeline::new(MockRecognizer::new("x"), Extractor::default(), options);
        let err = p.try_process_bytes(&data).await.unwrap_err();
        assert!(matches!(err, PipelineError::Preprocess(PreprocessError::TooLarge { .. })), "got {err:?}");
        assert_eq!(err.failure_kind(), FailureKind::ImageTooLarge);

        let result = p.process_bytes(&data).await;
        assert!(!result.success);
        assert!(result.requires_confirmation());
        assert_eq!(result.failure_kind(), Some(FailureKind::ImageTooLarge));
    }

    #[test]
    fn preprocess_deadline_maps_to_timeout() {
        let err = PipelineError::PreprocessTimeout(Duration::from_secs(1));
        assert_eq!(err.failure_kind(), FailureKind::OcrTimeout);
    }

    #[tokio::test]
    async fn engine_fault_is_ocr_failure() {
        let result = pipeline(FailingRecognizer).process_bytes(&receipt_png()).await;
        assert!(!result.success);
        assert_eq!(result.failure_kind(), Some(FailureKind::OcrFailure));
        assert!(result.error.unwrap().message.contains("engine crashed"));
    }

    #[tokio::test]
    async fn slow_engine_times_out() {
        let p = ReceiptPipeline::new(
            SlowRecognizer(Duration::from_millis(500)),
            Extractor::default(),
            PipelineOptions { ocr_timeout: Duration::from_millis(20), ..PipelineOptions::default() },
        );
        let started = Instant::now();
        let result = p.process_bytes(&receipt_png()).await;
        assert!(started.elapsed() < Duration::from_millis(450));
        assert!(!result.success);
        assert_eq!(result.failure_kind(), Some(FailureKind::OcrTimeout));
        assert!(result.requires_confirmation());
    }

    #[tokio::test]
    async fn process_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipt.png");
        std::fs::write(&path, receipt_png()).unwrap();

        let result = pipeline(MockRecognizer::new("Gas Station\nFuel 30.00")).process_file(&path).await;
        assert!(result.success);
        assert_eq!(result.fields.unwrap().category.value, "Transportation");
    }

    #[tokio::test]
    async fn missing_file_is_invalid_image() {
        let result = pipeline(MockRecognizer::new(""))
            .process_file(Path::new("/nonexistent/receipt.jpg"))
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidImage));
    }

    #[tokio::test]
    async fn shared_backend_serves_concurrent_requests() {
        let p = Arc::new(pipeline(MockRecognizer::new("Blue Door Cafe\nTotal 9.00")));
        let png = receipt_png();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = Arc::clone(&p);
                let png = png.clone();
                tokio::spawn(async move { p.process_bytes(&png).await })
            })
            .collect();
        for h in handles {
            let result = h.await.unwrap();
            assert!(result.success);
            assert_eq!(result.fields.unwrap().category.value, "Dining Out");
        }
    }
}
