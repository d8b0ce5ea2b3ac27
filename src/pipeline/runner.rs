//! Multi-document runs.
//!
//! Documents are processed one after another, never in parallel: the
//! concurrency budget belongs to the pages of the current document. Finished
//! documents are skipped without opening them, and a configurable pause
//! separates two documents that actually hit the model, giving rate-limit
//! windows time to recover.

use crate::cancel::CancelSignal;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::checkpoint::CheckpointStore;
use crate::pipeline::input::resolve_documents;
use crate::pipeline::llm::VisionModel;
use crate::pipeline::processor::DocumentProcessor;
use crate::pipeline::source::DocumentOpener;
use crate::pipeline::summary::{ProcessingSummary, SummaryWriter};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Every page extracted in this run.
    Complete,
    /// Some batches failed or were never started.
    Incomplete,
    /// Already complete before this run; nothing was sent.
    Skipped,
    /// Unreadable document or unusable checkpoint.
    Aborted,
    /// Not reached because the run was cancelled.
    NotStarted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    pub path: PathBuf,
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ProcessingSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub model_calls: u64,
}

/// Result of a whole run, one entry per input document in input order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub documents: Vec<DocumentReport>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn count(&self, status: DocumentStatus) -> usize {
        self.documents.iter().filter(|d| d.status == status).count()
    }

    /// Every document is complete, whether in this run or an earlier one.
    pub fn all_complete(&self) -> bool {
        self.documents
            .iter()
            .all(|d| matches!(d.status, DocumentStatus::Complete | DocumentStatus::Skipped))
    }

    pub fn model_calls(&self) -> u64 {
        self.documents.iter().map(|d| d.model_calls).sum()
    }
}

/// Sequences [`DocumentProcessor`] runs over a list of documents.
pub struct BatchRunner {
    config: PipelineConfig,
    opener: Arc<dyn DocumentOpener>,
    processor: DocumentProcessor,
    cancel: CancelSignal,
    reset: bool,
}

impl BatchRunner {
    pub fn new(
        config: PipelineConfig,
        opener: Arc<dyn DocumentOpener>,
        model: Arc<dyn VisionModel>,
    ) -> Self {
        let processor = DocumentProcessor::new(config.clone(), model);
        Self {
            config,
            opener,
            processor,
            cancel: CancelSignal::never(),
            reset: false,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.processor = self.processor.with_cancel(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Discard existing state before processing each document.
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Process a single PDF or every `*.pdf` directly inside a directory.
    pub async fn run_path(&self, input: &Path) -> Result<RunReport, PipelineError> {
        let documents = resolve_documents(input).await?;
        if documents.is_empty() {
            warn!("No PDF documents found in {}", input.display());
        }
        self.run_documents(&documents).await
    }

    /// Process `documents` in order.
    ///
    /// Only fails for errors that concern the whole run (the output directory
    /// cannot be reset); per-document failures land in the report.
    pub async fn run_documents(&self, documents: &[PathBuf]) -> Result<RunReport, PipelineError> {
        let start = Instant::now();
        let mut report = RunReport::default();
        let mut processed_any = false;

        for (index, path) in documents.iter().enumerate() {
            let paths = self.processor.paths_for(path);
            if self.reset {
                CheckpointStore::reset(&paths).await?;
            } else if CheckpointStore::is_complete(&paths, path).await {
                info!("Skipping {}: already complete", path.display());
                report.documents.push(DocumentReport {
                    path: path.clone(),
                    status: DocumentStatus::Skipped,
                    summary: SummaryWriter::read(&paths).await.map(|f| f.summary),
                    error: None,
                    model_calls: 0,
                });
                continue;
            }

            if processed_any && !self.config.inter_doc_pause.is_zero() {
                self.pause(self.config.inter_doc_pause).await;
            }
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.documents.extend(documents[index..].iter().map(|p| DocumentReport {
                    path: p.clone(),
                    status: DocumentStatus::NotStarted,
                    summary: None,
                    error: None,
                    model_calls: 0,
                }));
                break;
            }
            processed_any = true;

            info!("[{}/{}] {}", index + 1, documents.len(), path.display());
            report.documents.push(self.process_one(path).await);
        }

        report.cancelled |= self.cancel.is_cancelled();
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            "Run finished: {} complete, {} skipped, {} incomplete, {} aborted, {} model calls",
            report.count(DocumentStatus::Complete),
            report.count(DocumentStatus::Skipped),
            report.count(DocumentStatus::Incomplete),
            report.count(DocumentStatus::Aborted),
            report.model_calls()
        );
        Ok(report)
    }

    async fn process_one(&self, path: &Path) -> DocumentReport {
        let aborted = |e: PipelineError, model_calls: u64| {
            error!("{}: {}", path.display(), e);
            DocumentReport {
                path: path.to_path_buf(),
                status: DocumentStatus::Aborted,
                summary: None,
                error: Some(e.to_string()),
                model_calls,
            }
        };

        let source = match self.opener.open(path).await {
            Ok(source) => source,
            Err(e) => return aborted(e, 0),
        };

        match self.processor.process(source).await {
            Ok(outcome) => DocumentReport {
                path: path.to_path_buf(),
                status: if outcome.skipped {
                    DocumentStatus::Skipped
                } else if outcome.is_complete() {
                    DocumentStatus::Complete
                } else {
                    DocumentStatus::Incomplete
                },
                model_calls: outcome.model_calls,
                summary: Some(outcome.summary),
                error: None,
            },
            Err(e) => aborted(e.error, e.model_calls),
        }
    }

    /// Sleep between documents; cut short by cancellation.
    async fn pause(&self, duration: Duration) {
        info!("Pausing {:?} before next document", duration);
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}
