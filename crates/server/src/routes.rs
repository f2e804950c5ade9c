use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use spendlens_core::{Amount, DateRange, Insight, SpendingInsights, TransactionRecord};
use spendlens_ocr::{ExtractionResult, FailureKind, OcrBackend, ReceiptPipeline};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::ApiError;

/// Room for multipart boundaries and part headers on top of the image itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub type SharedPipeline = ReceiptPipeline<Arc<dyn OcrBackend>>;

/// Shared application state for API handlers. Read-only after startup.
pub struct AppState {
    pub pipeline: SharedPipeline,
}

impl AppState {
    pub fn new(pipeline: SharedPipeline) -> Self {
        Self { pipeline }
    }
}

/// Build the Axum router with all API routes.
pub fn build_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/extract-receipt", post(extract_receipt))
        .route("/api/ocr/extract", post(extract_receipt))
        .route("/insights", post(insights))
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES)))
        .layer(TraceLayer::new_for_http())
}

// ── Receipt extraction ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ReceiptData {
    pub amount: Option<Amount>,
    pub date: NaiveDate,
    pub date_is_fallback: bool,
    pub merchant: String,
    pub category: String,
    pub raw_text: String,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub success: bool,
    pub data: ReceiptData,
    pub confidence: f32,
    pub requires_confirmation: bool,
}

impl TryFrom<ExtractionResult> for ExtractResponse {
    type Error = ApiError;

    fn try_from(result: ExtractionResult) -> Result<Self, ApiError> {
        let requires_confirmation = result.requires_confirmation();
        match (result.success, result.fields, result.error) {
            (true, Some(fields), _) => Ok(ExtractResponse {
                success: true,
                data: ReceiptData {
                    amount: fields.amount.map(|a| a.value),
                    date: fields.date.value.date(),
                    date_is_fallback: fields.date.value.is_fallback(),
                    merchant: fields.merchant.value.to_string(),
                    category: fields.category.value,
                    raw_text: result.raw_text,
                },
                confidence: result.confidence,
                requires_confirmation,
            }),
            (_, _, Some(failure)) => {
                Err(ApiError::Extraction { kind: failure.kind, message: failure.message })
            }
            _ => Err(ApiError::Extraction {
                kind: FailureKind::OcrFailure,
                message: "extraction produced no fields".to_string(),
            }),
        }
    }
}

/// Upload a receipt image; returns the extracted fields for user review.
async fn extract_receipt(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("extract_receipt", %request_id);

    async move {
        let image = read_first_file(multipart?).await?;
        tracing::debug!(bytes = image.len(), "receipt upload received");
        let result = state.pipeline.process_bytes(&image).await;
        ExtractResponse::try_from(result).map(Json)
    }
    .instrument(span)
    .await
}

/// Bytes of the first part that carries a file. Clients differ on the field
/// name (`file`, `image`), so any name is accepted.
async fn read_first_file(mut multipart: Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        let is_file = field.file_name().is_some()
            || field.content_type().is_some_and(|ct| ct.starts_with("image/"));
        if is_file {
            return Ok(field.bytes().await?.to_vec());
        }
    }
    Err(ApiError::MissingFile)
}

// ── Insights ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InsightsRequest {
    pub transactions: Vec<TransactionRecord>,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct InsightsResponse {
    pub insights: Vec<Insight>,
}

async fn insights(
    request: Result<Json<InsightsRequest>, JsonRejection>,
) -> Result<Json<InsightsResponse>, ApiError> {
    let Json(request) = request?;
    let range = DateRange::from_bounds(request.start, request.end)?;
    let insights = SpendingInsights::generate(&request.transactions, range)?;
    tracing::debug!(
        transactions = request.transactions.len(),
        insights = insights.len(),
        "insights generated"
    );
    Ok(Json(InsightsResponse { insights }))
}

// ── Health ────────────────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "spendlens",
        "version": env!("CARGO_PKG_VERSION"),
        "ocr_backend": state.pipeline.backend_name(),
    }))
}
