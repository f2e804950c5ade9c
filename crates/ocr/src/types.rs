use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use spendlens_core::Amount;

/// Label used when no merchant line can be found.
pub const UNKNOWN_MERCHANT: &str = "Unknown";

/// A single extracted value with an associated confidence score (0.0–1.0).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedField<T> {
    pub value: T,
    /// Confidence in this extraction (0.0 = guessed, 1.0 = certain).
    pub confidence: f32,
}

impl<T> ExtractedField<T> {
    pub fn new(value: T, confidence: f32) -> Self {
        Self { value, confidence: confidence.clamp(0.0, 1.0) }
    }
}

/// A receipt date, tagged with where it came from.
///
/// `Fallback` carries the extraction-time date used when the text held no
/// recognizable date; it must not be read as "the receipt is from today".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", content = "date", rename_all = "snake_case")]
pub enum ReceiptDate {
    Parsed(NaiveDate),
    Fallback(NaiveDate),
}

impl ReceiptDate {
    pub fn date(&self) -> NaiveDate {
        match self {
            ReceiptDate::Parsed(d) | ReceiptDate::Fallback(d) => *d,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ReceiptDate::Fallback(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Merchant {
    Named(String),
    Unknown,
}

impl Merchant {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Merchant::Unknown)
    }
}

impl std::fmt::Display for Merchant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Merchant::Named(name) => write!(f, "{name}"),
            Merchant::Unknown => write!(f, "{UNKNOWN_MERCHANT}"),
        }
    }
}

/// Structured fields pulled out of one receipt's OCR text.
/// Any subset may be missing; that is the normal case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedFields {
    pub amount: Option<ExtractedField<Amount>>,
    pub date: ExtractedField<ReceiptDate>,
    pub merchant: ExtractedField<Merchant>,
    /// A label from the category table, or the table's fallback label.
    pub category: ExtractedField<String>,
}

impl ExtractedFields {
    /// Weighted mean of the per-field confidences.
    pub fn confidence(&self) -> f32 {
        let weighted = [
            (self.amount.as_ref().map(|f| f.confidence), 0.40f32),
            (Some(self.date.confidence), 0.25),
            (Some(self.merchant.confidence), 0.15),
            (Some(self.category.confidence), 0.20),
        ];
        let (score, weight) = weighted.iter().fold((0.0f32, 0.0f32), |(s, w), (conf, fw)| {
            (s + conf.unwrap_or(0.0) * fw, w + fw)
        });
        if weight > 0.0 { (score / weight).clamp(0.0, 1.0) } else { 0.0 }
    }

    /// True when nothing at all was recovered from the text.
    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.date.value.is_fallback()
            && self.merchant.value.is_unknown()
            && self.category.confidence == 0.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidImage,
    ImageTooLarge,
    OcrTimeout,
    OcrFailure,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::InvalidImage => write!(f, "invalid_image"),
            FailureKind::ImageTooLarge => write!(f, "image_too_large"),
            FailureKind::OcrTimeout => write!(f, "ocr_timeout"),
            FailureKind::OcrFailure => write!(f, "ocr_failure"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one receipt-processing request.
///
/// Every result, successful or not, requires human confirmation. There is no
/// API to clear that flag here; acceptance happens in a downstream review
/// step that owns persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    pub success: bool,
    pub fields: Option<ExtractedFields>,
    pub raw_text: String,
    pub confidence: f32,
    pub error: Option<ExtractionFailure>,
    #[serde(skip_deserializing, default = "confirmation_required")]
    requires_confirmation: bool,
}

fn confirmation_required() -> bool {
    true
}

impl ExtractionResult {
    pub fn extracted(fields: ExtractedFields, raw_text: String) -> Self {
        let confidence = fields.confidence();
        Self {
            success: true,
            fields: Some(fields),
            raw_text,
            confidence,
            error: None,
            requires_confirmation: confirmation_required(),
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            fields: None,
            raw_text: String::new(),
            confidence: 0.0,
            error: Some(ExtractionFailure { kind, message: message.into() }),
            requires_confirmation: confirmation_required(),
        }
    }

    pub fn requires_confirmation(&self) -> bool {
        self.requires_confirmation
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
