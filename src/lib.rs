//! # edgequake-pdf2text
//!
//! Resumable, concurrency-bounded extraction of PDF page text with Vision
//! Language Models.
//!
//! ## Why this crate?
//!
//! Transcribing a few thousand scanned pages through a hosted VLM takes hours
//! and runs into rate limits, outages and the occasional unreadable page.
//! This crate treats the job as a durable batch process: every page batch is
//! checkpointed the moment it finishes, a rerun only sends what is still
//! missing, and a failed batch never costs the rest of the document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir / PDF
//!  │
//!  ├─ 1. Enumerate  documents in name order, skip those already complete
//!  ├─ 2. Plan       contiguous page batches, drop batches checkpointed as done
//!  ├─ 3. Extract    bounded-concurrency VLM calls with retry + backoff
//!  ├─ 4. Record     atomic checkpoint write per finished batch
//!  └─ 5. Finalise   summary.json, SUMMARY.txt (sentinel), text.txt
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2text::{extract, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::default();
//!     let report = extract("document.pdf", &config).await?;
//!     for doc in &report.documents {
//!         println!("{}: {:?}", doc.path.display(), doc.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2text` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2text = { version = "0.1", default-features = false }
//! ```
//!
//! ## Fast vs. Slow
//!
//! | Mode | Concurrency | Pages/request | Retries | Base delay |
//! |------|-------------|---------------|---------|------------|
//! | `Fast` (default) | 10 | 1 | 3 | 500 ms |
//! | `Slow` | 3 | 2 | 5 | 2 s |
//!
//! Use `Slow` against providers with tight rate limits or for long unattended
//! runs; every value can still be overridden individually.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::{CancelHandle, CancelSignal};
pub use config::{PipelineConfig, PipelineConfigBuilder, ProcessingMode, RunSettings};
pub use error::{BatchFailure, ErrorKind, PipelineError};
pub use extract::{extract, extract_sync, extract_with_cancel};
pub use pipeline::client::{BatchStatus, ExtractionResult};
pub use pipeline::llm::{VisionModel, VisionRequest};
pub use pipeline::runner::{BatchRunner, DocumentReport, DocumentStatus, RunReport};
pub use pipeline::source::{DocumentOpener, DocumentSource};
pub use pipeline::summary::ProcessingSummary;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
