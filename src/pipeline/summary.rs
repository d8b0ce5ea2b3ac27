//! Per-document completion report.
//!
//! Two renderings of the same [`ProcessingSummary`]:
//!
//! * `summary.json` — machine readable; its `complete` flag is what the next
//!   run checks to skip a finished document.
//! * `SUMMARY.txt` — for humans; the last line is the completion sentinel
//!   (`STATUS: COMPLETE` / `STATUS: INCOMPLETE`) so shell scripts can
//!   `tail -n1` it.
//!
//! Both are pure functions of the checkpoint: no timestamps, no durations.

use crate::error::{ErrorKind, PipelineError};
use crate::pipeline::checkpoint::{write_atomic, DocumentPaths};
use crate::pipeline::source::{BatchId, PageRange};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::debug;

pub const SUMMARY_VERSION: u32 = 1;
pub const COMPLETE_SENTINEL: &str = "STATUS: COMPLETE";
pub const INCOMPLETE_SENTINEL: &str = "STATUS: INCOMPLETE";

/// A batch that ended the run in the failed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedBatch {
    pub batch_id: BatchId,
    pub pages: PageRange,
    pub kind: Option<ErrorKind>,
    pub detail: Option<String>,
    pub attempts: u32,
}

/// Aggregated per-document statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub document: PathBuf,
    pub total_pages: usize,
    pub success_pages: usize,
    pub failed_pages: usize,
    /// Pages never attempted, e.g. after cancellation.
    pub pending_pages: usize,
    /// `success_pages / total_pages · 100`, rounded to two decimals.
    pub percent_complete: f64,
    /// Ascending by batch id.
    pub failed_batches: Vec<FailedBatch>,
}

impl ProcessingSummary {
    pub fn new(
        document: PathBuf,
        total_pages: usize,
        success_pages: usize,
        failed_batches: Vec<FailedBatch>,
    ) -> Self {
        let failed_pages = failed_batches.iter().map(|b| b.pages.len()).sum::<usize>();
        let pending_pages = total_pages.saturating_sub(success_pages + failed_pages);
        let percent_complete = if total_pages == 0 {
            0.0
        } else {
            (success_pages as f64 * 10_000.0 / total_pages as f64).round() / 100.0
        };
        Self {
            document,
            total_pages,
            success_pages,
            failed_pages,
            pending_pages,
            percent_complete,
            failed_batches,
        }
    }

    /// Every page extracted. Decided on page counts, never on the rounded
    /// percentage.
    pub fn is_complete(&self) -> bool {
        self.total_pages > 0 && self.success_pages == self.total_pages
    }

    pub fn failed_batch_ids(&self) -> Vec<BatchId> {
        self.failed_batches.iter().map(|b| b.batch_id).collect()
    }

    pub fn sentinel(&self) -> &'static str {
        if self.is_complete() {
            COMPLETE_SENTINEL
        } else {
            INCOMPLETE_SENTINEL
        }
    }

    /// Human-readable report; the last line is the sentinel.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Extraction summary");
        let _ = writeln!(out, "==================");
        let _ = writeln!(out, "Document:          {}", self.document.display());
        let _ = writeln!(out, "Total pages:       {}", self.total_pages);
        let _ = writeln!(out, "Successful pages:  {}", self.success_pages);
        let _ = writeln!(out, "Failed pages:      {}", self.failed_pages);
        let _ = writeln!(out, "Pending pages:     {}", self.pending_pages);
        let _ = writeln!(out, "Percent complete:  {:.2}%", self.percent_complete);

        if !self.failed_batches.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failed batches:");
            for b in &self.failed_batches {
                let kind = b.kind.map(ErrorKind::as_str).unwrap_or("unknown");
                let _ = write!(
                    out,
                    "  {} pages {} {} after {} attempt(s)",
                    b.batch_id, b.pages, kind, b.attempts
                );
                if let Some(ref detail) = b.detail {
                    let _ = write!(out, ": {}", detail.lines().next().unwrap_or_default());
                }
                let _ = writeln!(out);
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "{}", self.sentinel());
        out
    }
}

/// On-disk form of `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryFile {
    pub version: u32,
    pub complete: bool,
    #[serde(flatten)]
    pub summary: ProcessingSummary,
}

/// Writes and reads the per-document summary files.
#[derive(Debug, Clone)]
pub struct SummaryWriter {
    paths: DocumentPaths,
}

impl SummaryWriter {
    pub fn new(paths: DocumentPaths) -> Self {
        Self { paths }
    }

    /// Write `SUMMARY.txt` first, then `summary.json`, so a crash in between
    /// never leaves a complete flag without its human-readable counterpart.
    pub async fn write(&self, summary: &ProcessingSummary) -> Result<(), PipelineError> {
        let text_path = self.paths.summary_text();
        write_atomic(&text_path, summary.render_text().into_bytes())
            .await
            .map_err(|source| PipelineError::SummaryWrite {
                path: text_path.clone(),
                source,
            })?;

        let file = SummaryFile {
            version: SUMMARY_VERSION,
            complete: summary.is_complete(),
            summary: summary.clone(),
        };
        let json_path = self.paths.summary_json();
        let mut bytes = serde_json::to_vec_pretty(&file)
            .map_err(|e| PipelineError::Internal(format!("serialise summary: {e}")))?;
        bytes.push(b'\n');
        write_atomic(&json_path, bytes)
            .await
            .map_err(|source| PipelineError::SummaryWrite {
                path: json_path.clone(),
                source,
            })?;

        debug!(
            "Wrote summary for {} ({})",
            summary.document.display(),
            summary.sentinel()
        );
        Ok(())
    }

    /// Read `summary.json`; `None` when absent or unreadable.
    pub async fn read(paths: &DocumentPaths) -> Option<SummaryFile> {
        let raw = tokio::fs::read(paths.summary_json()).await.ok()?;
        match serde_json::from_slice::<SummaryFile>(&raw) {
            Ok(file) => Some(file),
            Err(e) => {
                debug!("Ignoring unreadable {}: {}", paths.summary_json().display(), e);
                None
            }
        }
    }
}
