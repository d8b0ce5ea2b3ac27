//! Per-document orchestration.
//!
//! ```text
//! Idle ──▶ Enumerating ──▶ Processing ──▶ Finalizing ──▶ Done
//!               │               │
//!               └──────┬────────┘
//!                      ▼
//!                   Aborted
//! ```
//!
//! *Enumerating* checks the completion sentinel, loads the checkpoint and
//! drops batches that already succeeded. *Processing* streams the remaining
//! batches through the [`WorkerPool`] and records every result as it arrives.
//! *Finalizing* writes `summary.json`, `SUMMARY.txt` and `text.txt` from the
//! checkpoint. A document ends *Aborted* only when it cannot be read or its
//! checkpoint cannot be trusted or written; failed batches never abort.

use crate::cancel::CancelSignal;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::checkpoint::{write_atomic, CheckpointStore, DocumentPaths};
use crate::pipeline::client::ExtractionClient;
use crate::pipeline::llm::VisionModel;
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::source::{DocumentSource, PageSource};
use crate::pipeline::summary::{ProcessingSummary, SummaryWriter};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorState {
    Idle,
    Enumerating,
    Processing,
    Finalizing,
    Done,
    Aborted,
}

/// What happened to one document.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub document: PathBuf,
    pub state: ProcessorState,
    /// True when the completion sentinel was found and nothing was sent.
    pub skipped: bool,
    /// True when cancellation kept some pending batches from being admitted.
    pub cancelled: bool,
    /// Batches handed to the model in this run.
    pub submitted_batches: usize,
    /// Model calls in this run, retries included.
    pub model_calls: u64,
    pub summary: ProcessingSummary,
    pub duration_ms: u64,
}

impl DocumentOutcome {
    pub fn is_complete(&self) -> bool {
        self.summary.is_complete()
    }
}

/// A document run that ended in `Aborted`.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct DocumentAborted {
    #[source]
    pub error: PipelineError,
    /// Model calls made before the abort, retries included.
    pub model_calls: u64,
}

/// Tracks and logs the state transitions of one document run.
struct Lifecycle<'a> {
    document: &'a Path,
    state: ProcessorState,
}

impl<'a> Lifecycle<'a> {
    fn new(document: &'a Path) -> Self {
        Self {
            document,
            state: ProcessorState::Idle,
        }
    }

    fn advance(&mut self, next: ProcessorState) {
        debug!("{}: {:?} → {:?}", self.document.display(), self.state, next);
        self.state = next;
    }
}

/// Runs one document at a time to completion (or as far as it gets).
#[derive(Clone)]
pub struct DocumentProcessor {
    config: PipelineConfig,
    pool: WorkerPool,
    cancel: CancelSignal,
}

impl DocumentProcessor {
    pub fn new(config: PipelineConfig, model: Arc<dyn VisionModel>) -> Self {
        let client = ExtractionClient::new(model, &config);
        let pool = WorkerPool::new(client, config.concurrency)
            .with_progress(config.progress_callback.clone());
        Self {
            config,
            pool,
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn paths_for(&self, document: &Path) -> DocumentPaths {
        DocumentPaths::for_document(&self.config.output_dir, document)
    }

    /// Process `source` through the full lifecycle.
    ///
    /// Returns `Err` when the document was aborted; batch failures are
    /// reported in the outcome's summary instead.
    pub async fn process(
        &self,
        source: Arc<dyn DocumentSource>,
    ) -> Result<DocumentOutcome, DocumentAborted> {
        let document = source.path().to_path_buf();
        let mut lifecycle = Lifecycle::new(&document);
        let mut model_calls = 0u64;

        match self.run(source, &mut lifecycle, &mut model_calls).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                lifecycle.advance(ProcessorState::Aborted);
                error!(
                    "Aborted {} after {} model call(s): {}",
                    document.display(),
                    model_calls,
                    error
                );
                Err(DocumentAborted { error, model_calls })
            }
        }
    }

    async fn run(
        &self,
        source: Arc<dyn DocumentSource>,
        lifecycle: &mut Lifecycle<'_>,
        model_calls: &mut u64,
    ) -> Result<DocumentOutcome, PipelineError> {
        let start = Instant::now();
        let document = source.path().to_path_buf();
        let paths = self.paths_for(&document);

        lifecycle.advance(ProcessorState::Enumerating);
        if CheckpointStore::is_complete(&paths, &document).await {
            if let Some(file) = SummaryWriter::read(&paths).await {
                info!("Skipping {}: already complete", document.display());
                lifecycle.advance(ProcessorState::Done);
                return Ok(DocumentOutcome {
                    document,
                    state: lifecycle.state,
                    skipped: true,
                    cancelled: false,
                    submitted_batches: 0,
                    model_calls: 0,
                    summary: file.summary,
                    duration_ms: start.elapsed().as_millis() as u64,
                });
            }
        }

        let pages = PageSource::new(source, self.config.batch_size)?;
        let store =
            CheckpointStore::open(paths.clone(), &document, pages.page_count(), pages.batch_size())
                .await?;

        let done = store.succeeded().await;
        let total_batches = pages.plan().batch_count();
        let pending_batches = pages.plan().filter(|(id, _)| !done.contains(id)).count();
        info!(
            "{}: {} pages, {} batches, {} pending",
            document.display(),
            pages.page_count(),
            total_batches,
            pending_batches
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_start(&document, total_batches, pending_batches);
        }

        lifecycle.advance(ProcessorState::Processing);
        let pending = pages.batches().filter(move |b| !done.contains(&b.id));
        let mut results = self.pool.run(pending, self.cancel.clone());

        let mut submitted_batches = 0usize;
        while let Some(result) = results.next().await {
            submitted_batches += 1;
            *model_calls += u64::from(result.attempts);
            store.record(&result).await?;
        }
        drop(results);

        let cancelled = submitted_batches < pending_batches;
        if cancelled {
            warn!(
                "{}: cancelled with {} batch(es) not started",
                document.display(),
                pending_batches - submitted_batches
            );
        }

        lifecycle.advance(ProcessorState::Finalizing);
        let summary = store.summarize().await;
        let text_path = paths.text_output();
        let text = store.snapshot().await.assembled_text();
        write_atomic(&text_path, text.into_bytes())
            .await
            .map_err(|source| PipelineError::SummaryWrite {
                path: text_path.clone(),
                source,
            })?;
        SummaryWriter::new(paths).write(&summary).await?;

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_complete(&document, &summary);
        }
        info!(
            "{}: {}/{} pages ({:.2}%), {} failed batch(es)",
            document.display(),
            summary.success_pages,
            summary.total_pages,
            summary.percent_complete,
            summary.failed_batches.len()
        );

        lifecycle.advance(ProcessorState::Done);
        Ok(DocumentOutcome {
            document,
            state: lifecycle.state,
            skipped: false,
            cancelled,
            submitted_batches,
            model_calls: *model_calls,
            summary,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
