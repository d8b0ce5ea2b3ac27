//! Library entry points.
//!
//! [`extract`] wires the production collaborators together (pdfium for
//! rendering, an edgequake-llm provider for the vision model) and runs every
//! document under `input`. Embedders that bring their own renderer or model
//! use [`crate::pipeline::runner::BatchRunner`] directly.

use crate::cancel::CancelSignal;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::llm::LlmVisionModel;
use crate::pipeline::render::PdfiumOpener;
use crate::pipeline::runner::{BatchRunner, RunReport};
use std::path::Path;
use std::sync::Arc;

/// Extract the text of a PDF, or of every PDF in a directory.
///
/// Resumes from existing checkpoints under `config.output_dir` and skips
/// documents that are already complete.
///
/// # Errors
/// Fails only when nothing can run at all: no provider, unreadable input
/// directory. Per-document problems are reported in the [`RunReport`].
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2text::{extract, PipelineConfig, ProcessingMode};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::builder_for(ProcessingMode::Slow)
///     .output_dir("state")
///     .build()?;
/// let report = extract("scans/", &config).await?;
/// println!("{} documents complete", report.documents.len());
/// # Ok(())
/// # }
/// ```
pub async fn extract(
    input: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<RunReport, PipelineError> {
    extract_with_cancel(input, config, CancelSignal::never(), false).await
}

/// [`extract`] with a cancellation signal and optional state reset.
pub async fn extract_with_cancel(
    input: impl AsRef<Path>,
    config: &PipelineConfig,
    cancel: CancelSignal,
    reset: bool,
) -> Result<RunReport, PipelineError> {
    let model = LlmVisionModel::from_config(config)?;
    let opener = PdfiumOpener::new(config);
    BatchRunner::new(config.clone(), Arc::new(opener), Arc::new(model))
        .with_cancel(cancel)
        .with_reset(reset)
        .run_path(input.as_ref())
        .await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<RunReport, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input, config))
}
