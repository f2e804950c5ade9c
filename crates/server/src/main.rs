use std::sync::Arc;

use anyhow::Context;
use spendlens_ocr::{Extractor, OcrBackend, ReceiptPipeline};
use spendlens_server::{build_router, telemetry, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load().context("loading configuration")?;
    telemetry::init(config.log_format);

    let backend = config.ocr.build_backend()?;
    let categories = config.category_table()?;
    tracing::info!(
        backend = backend.name(),
        categories = ?categories.labels(),
        ocr_timeout_secs = config.ocr_timeout_secs,
        max_upload_bytes = config.max_upload_bytes,
        "receipt pipeline configured"
    );

    let pipeline = ReceiptPipeline::new(backend, Extractor::new(categories), config.pipeline_options());
    let app = build_router(Arc::new(AppState::new(pipeline)), config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "SpendLens listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("SpendLens stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
