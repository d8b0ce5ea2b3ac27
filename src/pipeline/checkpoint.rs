//! Durable per-batch progress for one document.
//!
//! ## Layout
//!
//! ```text
//! <output_dir>/<document file name>/
//!   checkpoint.json   batch id → status, attempts, error kind, text
//!   summary.json      ProcessingSummary + `complete` flag
//!   SUMMARY.txt       human-readable report, sentinel on the last line
//!   text.txt          assembled text of the successful pages
//! ```
//!
//! Every write goes to a temporary file in the same directory which is then
//! renamed over the target, so a reader (or a crash) only ever sees the old
//! or the new checkpoint, never a torn one. Concurrent [`CheckpointStore::record`]
//! calls are serialised by an async mutex held across the write.
//!
//! A checkpoint is pinned to the document, page count and batch size it was
//! created with: batch ids are only meaningful for one partitioning of one
//! document.

use crate::error::{ErrorKind, PipelineError};
use crate::pipeline::client::{BatchStatus, ExtractionResult};
use crate::pipeline::source::{BatchId, PageRange};
use crate::pipeline::summary::{FailedBatch, ProcessingSummary, SummaryWriter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const CHECKPOINT_VERSION: u32 = 1;

/// File locations for one document's state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPaths {
    dir: PathBuf,
}

impl DocumentPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<output_dir>/<file name of document>`, extension included so that
    /// `report.pdf` and `report.PDF` keep separate state.
    pub fn for_document(output_dir: &Path, document: &Path) -> Self {
        let name = document
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        Self::new(output_dir.join(name))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint(&self) -> PathBuf {
        self.dir.join("checkpoint.json")
    }

    pub fn summary_json(&self) -> PathBuf {
        self.dir.join("summary.json")
    }

    pub fn summary_text(&self) -> PathBuf {
        self.dir.join("SUMMARY.txt")
    }

    pub fn text_output(&self) -> PathBuf {
        self.dir.join("text.txt")
    }
}

/// Persisted state of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub pages: PageRange,
    pub status: BatchStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl From<&ExtractionResult> for BatchRecord {
    fn from(r: &ExtractionResult) -> Self {
        Self {
            pages: r.pages,
            status: r.status,
            attempts: r.attempts,
            error: r.error_kind(),
            detail: r.error.as_ref().map(|e| e.detail.clone()),
            text: r.text.clone(),
        }
    }
}

/// Contents of `checkpoint.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub version: u32,
    pub document: PathBuf,
    pub total_pages: usize,
    pub batch_size: usize,
    pub batches: BTreeMap<BatchId, BatchRecord>,
}

impl CheckpointRecord {
    pub fn new(document: PathBuf, total_pages: usize, batch_size: usize) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            document,
            total_pages,
            batch_size,
            batches: BTreeMap::new(),
        }
    }

    pub fn succeeded(&self) -> BTreeSet<BatchId> {
        self.batches
            .iter()
            .filter(|(_, b)| b.status == BatchStatus::Success)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Upsert. A successful batch is never downgraded to failed.
    pub fn apply(&mut self, id: BatchId, record: BatchRecord) -> bool {
        if let Some(existing) = self.batches.get(&id) {
            if existing.status == BatchStatus::Success && record.status != BatchStatus::Success {
                return false;
            }
        }
        self.batches.insert(id, record);
        true
    }

    pub fn summarize(&self) -> ProcessingSummary {
        let success_pages = self
            .batches
            .values()
            .filter(|b| b.status == BatchStatus::Success)
            .map(|b| b.pages.len())
            .sum();
        let failed_batches = self
            .batches
            .iter()
            .filter(|(_, b)| b.status == BatchStatus::Failed)
            .map(|(id, b)| FailedBatch {
                batch_id: *id,
                pages: b.pages,
                kind: b.error,
                detail: b.detail.clone(),
                attempts: b.attempts,
            })
            .collect();
        ProcessingSummary::new(
            self.document.clone(),
            self.total_pages,
            success_pages,
            failed_batches,
        )
    }

    /// Text of the successful batches in page order.
    pub fn assembled_text(&self) -> String {
        self.batches
            .values()
            .filter(|b| b.status == BatchStatus::Success)
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn check_matches(
        &self,
        path: &Path,
        document: &Path,
        total_pages: usize,
        batch_size: usize,
    ) -> Result<(), PipelineError> {
        let mismatch = |detail: String| PipelineError::CheckpointMismatch {
            path: path.to_path_buf(),
            detail,
        };
        if !same_document(&self.document, document) {
            return Err(mismatch(format!(
                "state belongs to {}, not {}",
                self.document.display(),
                document.display()
            )));
        }
        if self.total_pages != total_pages {
            return Err(mismatch(format!(
                "recorded {} pages, document now has {}",
                self.total_pages, total_pages
            )));
        }
        if self.batch_size != batch_size {
            return Err(mismatch(format!(
                "recorded batch size {}, this run uses {}",
                self.batch_size, batch_size
            )));
        }
        Ok(())
    }
}

/// Checkpoint for one document, shared by all in-flight batches.
#[derive(Debug)]
pub struct CheckpointStore {
    paths: DocumentPaths,
    state: Mutex<CheckpointRecord>,
}

impl CheckpointStore {
    /// Load the existing checkpoint or start an empty one.
    ///
    /// Fails with `CheckpointCorrupt` for unparsable files or unknown
    /// versions and with `CheckpointMismatch` when the page count or batch
    /// size differs from the recorded ones.
    pub async fn open(
        paths: DocumentPaths,
        document: &Path,
        total_pages: usize,
        batch_size: usize,
    ) -> Result<Self, PipelineError> {
        let record = match Self::load(&paths).await? {
            Some(existing) => {
                existing.check_matches(&paths.checkpoint(), document, total_pages, batch_size)?;
                info!(
                    "Resuming {}: {} of {} batches already succeeded",
                    document.display(),
                    existing.succeeded().len(),
                    total_pages.div_ceil(batch_size.max(1))
                );
                existing
            }
            None => CheckpointRecord::new(document.to_path_buf(), total_pages, batch_size),
        };

        tokio::fs::create_dir_all(paths.dir())
            .await
            .map_err(|source| PipelineError::CheckpointWrite {
                path: paths.dir().to_path_buf(),
                source,
            })?;

        Ok(Self {
            paths,
            state: Mutex::new(record),
        })
    }

    /// Read `checkpoint.json`; `None` when there is none yet.
    pub async fn load(paths: &DocumentPaths) -> Result<Option<CheckpointRecord>, PipelineError> {
        let path = paths.checkpoint();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::CheckpointCorrupt {
                    path,
                    detail: e.to_string(),
                })
            }
        };

        let record: CheckpointRecord =
            serde_json::from_slice(&raw).map_err(|e| PipelineError::CheckpointCorrupt {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        if record.version != CHECKPOINT_VERSION {
            return Err(PipelineError::CheckpointCorrupt {
                path,
                detail: format!(
                    "unsupported version {} (expected {})",
                    record.version, CHECKPOINT_VERSION
                ),
            });
        }
        Ok(Some(record))
    }

    /// Whether the persisted summary marks `document` as fully extracted.
    ///
    /// A complete summary written for a different document does not count.
    pub async fn is_complete(paths: &DocumentPaths, document: &Path) -> bool {
        SummaryWriter::read(paths)
            .await
            .map(|file| file.complete && same_document(&file.summary.document, document))
            .unwrap_or(false)
    }

    /// Remove all state for the document.
    pub async fn reset(paths: &DocumentPaths) -> Result<(), PipelineError> {
        match tokio::fs::remove_dir_all(paths.dir()).await {
            Ok(()) => {
                info!("Reset state in {}", paths.dir().display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PipelineError::CheckpointWrite {
                path: paths.dir().to_path_buf(),
                source,
            }),
        }
    }

    pub fn paths(&self) -> &DocumentPaths {
        &self.paths
    }

    /// Record a batch result and persist before returning.
    pub async fn record(&self, result: &ExtractionResult) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        if !state.apply(result.batch_id, BatchRecord::from(result)) {
            warn!(
                "Batch {} already succeeded; ignoring later failure",
                result.batch_id
            );
            return Ok(());
        }

        let path = self.paths.checkpoint();
        let bytes = serde_json::to_vec_pretty(&*state)
            .map_err(|e| PipelineError::Internal(format!("serialise checkpoint: {e}")))?;
        write_atomic(&path, bytes)
            .await
            .map_err(|source| PipelineError::CheckpointWrite { path, source })?;
        debug!("Checkpointed batch {} ({:?})", result.batch_id, result.status);
        Ok(())
    }

    pub async fn succeeded(&self) -> BTreeSet<BatchId> {
        self.state.lock().await.succeeded()
    }

    pub async fn summarize(&self) -> ProcessingSummary {
        self.state.lock().await.summarize()
    }

    pub async fn snapshot(&self) -> CheckpointRecord {
        self.state.lock().await.clone()
    }
}

/// Whether two paths name the same document: canonical paths when both
/// resolve, the paths as given otherwise.
pub fn same_document(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Replace `path` with `bytes` via a synced temp file in the same directory.
pub(crate) async fn write_atomic(path: &Path, bytes: Vec<u8>) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchFailure;

    fn result(id: usize, first: usize, last: usize, ok: bool) -> ExtractionResult {
        ExtractionResult {
            batch_id: BatchId(id),
            pages: PageRange::new(first, last),
            status: if ok {
                BatchStatus::Success
            } else {
                BatchStatus::Failed
            },
            text: ok.then(|| format!("=== PAGE {first} ===\ntext\n")),
            error: (!ok).then(|| BatchFailure::new(ErrorKind::ServiceUnavailable, "503")),
            attempts: if ok { 1 } else { 3 },
            duration_ms: 5,
        }
    }

    async fn store(dir: &Path, pages: usize, size: usize) -> Result<CheckpointStore, PipelineError> {
        CheckpointStore::open(
            DocumentPaths::new(dir.join("doc")),
            Path::new("doc.pdf"),
            pages,
            size,
        )
        .await
    }

    #[tokio::test]
    async fn missing_checkpoint_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DocumentPaths::new(dir.path().join("doc"));
        assert!(CheckpointStore::load(&paths).await.unwrap().is_none());
        assert!(!CheckpointStore::is_complete(&paths, Path::new("doc.pdf")).await);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), 4, 2).await.unwrap();
        s.record(&result(1, 1, 2, true)).await.unwrap();
        s.record(&result(2, 3, 4, false)).await.unwrap();
        drop(s);

        let reopened = store(dir.path(), 4, 2).await.unwrap();
        let snapshot = reopened.snapshot().await;
        assert_eq!(snapshot.batches.len(), 2);
        assert_eq!(reopened.succeeded().await.into_iter().collect::<Vec<_>>(), vec![BatchId(1)]);
        assert_eq!(snapshot.batches[&BatchId(2)].error, Some(ErrorKind::ServiceUnavailable));
    }

    #[tokio::test]
    async fn success_is_never_downgraded() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), 2, 1).await.unwrap();
        s.record(&result(1, 1, 1, true)).await.unwrap();
        s.record(&result(1, 1, 1, false)).await.unwrap();
        assert_eq!(s.snapshot().await.batches[&BatchId(1)].status, BatchStatus::Success);
    }

    #[tokio::test]
    async fn failed_batch_can_be_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), 2, 1).await.unwrap();
        s.record(&result(2, 2, 2, false)).await.unwrap();
        s.record(&result(2, 2, 2, true)).await.unwrap();
        let summary = s.summarize().await;
        assert_eq!(summary.success_pages, 1);
        assert_eq!(summary.failed_pages, 0);
        assert_eq!(summary.pending_pages, 1);
    }

    #[tokio::test]
    async fn concurrent_records_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let s = std::sync::Arc::new(store(dir.path(), 16, 1).await.unwrap());
        let tasks: Vec<_> = (1..=16)
            .map(|i| {
                let s = s.clone();
                tokio::spawn(async move { s.record(&result(i, i, i, true)).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let on_disk = CheckpointStore::load(s.paths()).await.unwrap().unwrap();
        assert_eq!(on_disk.succeeded().len(), 16);
    }

    #[tokio::test]
    async fn batch_size_change_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), 4, 2).await.unwrap();
        s.record(&result(1, 1, 2, true)).await.unwrap();

        let err = store(dir.path(), 4, 1).await.unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointMismatch { .. }));
    }

    #[tokio::test]
    async fn state_of_another_document_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DocumentPaths::new(dir.path().join("doc"));
        let s = CheckpointStore::open(paths.clone(), Path::new("a/doc.pdf"), 2, 1)
            .await
            .unwrap();
        s.record(&result(1, 1, 1, true)).await.unwrap();

        let err = CheckpointStore::open(paths, Path::new("b/doc.pdf"), 2, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointMismatch { .. }));
        assert!(err.to_string().contains("a/doc.pdf"), "{err}");
    }

    #[tokio::test]
    async fn completion_belongs_to_one_document() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DocumentPaths::new(dir.path().join("doc"));
        tokio::fs::create_dir_all(paths.dir()).await.unwrap();
        SummaryWriter::new(paths.clone())
            .write(&ProcessingSummary::new(PathBuf::from("a/doc.pdf"), 1, 1, Vec::new()))
            .await
            .unwrap();

        assert!(CheckpointStore::is_complete(&paths, Path::new("a/doc.pdf")).await);
        assert!(!CheckpointStore::is_complete(&paths, Path::new("b/doc.pdf")).await);
    }

    #[test]
    fn extension_case_keeps_state_apart() {
        let upper = DocumentPaths::for_document(Path::new("out"), Path::new("in/report.PDF"));
        let lower = DocumentPaths::for_document(Path::new("out"), Path::new("in/report.pdf"));
        assert_ne!(upper.dir(), lower.dir());
    }

    #[test]
    fn same_document_resolves_relative_spellings() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.pdf");
        std::fs::write(&file, b"%PDF").unwrap();
        let dotted = dir.path().join(".").join("doc.pdf");
        assert!(same_document(&file, &dotted));
        assert!(!same_document(Path::new("x/doc.pdf"), Path::new("y/doc.pdf")));
    }

    #[tokio::test]
    async fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DocumentPaths::new(dir.path().join("doc"));
        tokio::fs::create_dir_all(paths.dir()).await.unwrap();
        tokio::fs::write(paths.checkpoint(), b"{ not json").await.unwrap();

        let err = CheckpointStore::load(&paths).await.unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointCorrupt { .. }));
    }

    #[tokio::test]
    async fn unknown_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DocumentPaths::new(dir.path().join("doc"));
        tokio::fs::create_dir_all(paths.dir()).await.unwrap();
        let mut record = CheckpointRecord::new(PathBuf::from("doc.pdf"), 1, 1);
        record.version = 99;
        tokio::fs::write(paths.checkpoint(), serde_json::to_vec(&record).unwrap())
            .await
            .unwrap();

        let err = CheckpointStore::load(&paths).await.unwrap_err();
        assert!(err.to_string().contains("unsupported version 99"));
    }

    #[tokio::test]
    async fn reset_removes_state() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), 1, 1).await.unwrap();
        s.record(&result(1, 1, 1, true)).await.unwrap();
        let paths = s.paths().clone();

        CheckpointStore::reset(&paths).await.unwrap();
        assert!(CheckpointStore::load(&paths).await.unwrap().is_none());
        CheckpointStore::reset(&paths).await.unwrap();
    }

    #[test]
    fn batch_ids_serialise_as_object_keys_in_order() {
        let mut record = CheckpointRecord::new(PathBuf::from("doc.pdf"), 20, 1);
        for id in [10, 2, 1] {
            record.apply(
                BatchId(id),
                BatchRecord::from(&result(id, id, id, true)),
            );
        }
        let json = serde_json::to_string(&record).unwrap();
        let one = json.find("\"1\":").unwrap();
        let two = json.find("\"2\":").unwrap();
        let ten = json.find("\"10\":").unwrap();
        assert!(one < two && two < ten);

        let back: CheckpointRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn assembled_text_follows_page_order() {
        let mut record = CheckpointRecord::new(PathBuf::from("doc.pdf"), 3, 1);
        record.apply(BatchId(3), BatchRecord::from(&result(3, 3, 3, true)));
        record.apply(BatchId(1), BatchRecord::from(&result(1, 1, 1, true)));
        record.apply(BatchId(2), BatchRecord::from(&result(2, 2, 2, false)));
        assert_eq!(
            record.assembled_text(),
            "=== PAGE 1 ===\ntext\n\n=== PAGE 3 ===\ntext\n"
        );
    }

    #[test]
    fn state_dir_is_named_after_the_document() {
        let paths = DocumentPaths::for_document(Path::new("out"), Path::new("in/report.v2.pdf"));
        assert_eq!(paths.dir(), Path::new("out/report.v2.pdf"));
        assert_eq!(paths.checkpoint(), Path::new("out/report.v2.pdf/checkpoint.json"));
    }
}
