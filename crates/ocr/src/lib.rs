pub mod extract;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod types;

pub use extract::Extractor;
pub use pipeline::{PipelineError, PipelineOptions, ProcessedReceipt, ReceiptPipeline};
pub use preprocess::{prepare_for_ocr, prepare_for_ocr_from_bytes, PreprocessError, PreprocessOptions};
pub use recognizer::{normalize_text, MockRecognizer, OcrBackend, OcrError, TesseractCommand};
pub use types::{
    ExtractedField, ExtractedFields, ExtractionFailure, ExtractionResult, FailureKind, Merchant,
    ReceiptDate, UNKNOWN_MERCHANT,
};

#[cfg(feature = "tesseract")]
pub use recognizer::tesseract_backend::TesseractRecognizer;
