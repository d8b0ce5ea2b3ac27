//! Pipeline stages for resumable page extraction.
//!
//! ## Data Flow
//!
//! ```text
//! runner ──▶ processor ──▶ pool ──▶ client ──▶ llm
//!   │            │           │        │
//!   input     checkpoint   source   render/encode, retry, postprocess
//!              summary
//! ```
//!
//! 1. [`input`]      — list the PDFs to process, validate magic bytes
//! 2. [`source`]     — split a document into ordered page batches
//! 3. [`render`] / [`encode`] — rasterise with pdfium, base64-wrap as PNG
//! 4. [`llm`]        — the vision model seam and its edgequake-llm adapter
//! 5. [`retry`]      — backoff decisions per error class
//! 6. [`client`]     — one batch through render → model → cleanup, with retries
//! 7. [`postprocess`] — deterministic cleanup and page-marker normalisation
//! 8. [`pool`]       — bounded concurrency over a document's batches
//! 9. [`checkpoint`] / [`summary`] — durable progress and completion reports
//! 10. [`processor`] / [`runner`] — per-document lifecycle, multi-document runs

pub mod checkpoint;
pub mod client;
pub mod encode;
pub mod input;
pub mod llm;
pub mod pool;
pub mod postprocess;
pub mod processor;
pub mod render;
pub mod retry;
pub mod runner;
pub mod source;
pub mod summary;
