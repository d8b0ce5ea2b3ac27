//! Page enumeration: split a document into ordered, contiguous page batches.
//!
//! The rasteriser is an external collaborator reached through
//! [`DocumentSource`]; this module only decides *which* pages travel
//! together. Batches are produced lazily and the iterator is `Clone`, so a
//! plan can be restarted or re-walked (e.g. to count pending work) without
//! touching the document again.

use crate::error::{BatchFailure, PipelineError};
use async_trait::async_trait;
use edgequake_llm::ImageData;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 1-based, per-document batch number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub usize);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inclusive, 1-based page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageRange {
    pub first: usize,
    pub last: usize,
}

impl PageRange {
    pub fn new(first: usize, last: usize) -> Self {
        debug_assert!(first >= 1 && first <= last, "invalid range {first}-{last}");
        Self { first, last }
    }

    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn contains(&self, page: usize) -> bool {
        page >= self.first && page <= self.last
    }

    pub fn pages(&self) -> impl Iterator<Item = usize> {
        self.first..=self.last
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "[{}]", self.first)
        } else {
            write!(f, "[{},{}]", self.first, self.last)
        }
    }
}

/// A page handle. The rendered image is produced on demand by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
}

/// An opened, read-only document.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Source path; identifies the document in checkpoints and reports.
    fn path(&self) -> &Path;

    /// Number of pages; always ≥ 1 for an opened document.
    fn page_count(&self) -> usize;

    /// Render the pages of `range` in ascending order.
    async fn render(&self, range: PageRange) -> Result<Vec<ImageData>, BatchFailure>;
}

/// Opens documents for the batch runner.
#[async_trait]
pub trait DocumentOpener: Send + Sync {
    /// Fails with [`PipelineError::DocumentUnreadable`] when the file cannot
    /// be opened or has zero pages.
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentSource>, PipelineError>;
}

/// One extraction unit: contiguous pages of one document.
#[derive(Clone)]
pub struct PageBatch {
    pub id: BatchId,
    pub range: PageRange,
    source: Arc<dyn DocumentSource>,
}

impl PageBatch {
    pub fn pages(&self) -> impl Iterator<Item = Page> {
        self.range.pages().map(|number| Page { number })
    }

    pub fn document(&self) -> &Path {
        self.source.path()
    }

    /// Render this batch's page images through the document source.
    pub async fn render(&self) -> Result<Vec<ImageData>, BatchFailure> {
        self.source.render(self.range).await
    }
}

impl fmt::Debug for PageBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBatch")
            .field("id", &self.id)
            .field("range", &self.range)
            .field("document", &self.source.path())
            .finish()
    }
}

/// Lazy batch enumeration over `total_pages` pages.
///
/// Yields `(BatchId, PageRange)` in ascending page order; the final batch is
/// short when `batch_size` does not divide the page count.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    total_pages: usize,
    batch_size: usize,
    next_first: usize,
}

impl BatchPlan {
    pub fn new(total_pages: usize, batch_size: usize) -> Self {
        Self {
            total_pages,
            batch_size: batch_size.max(1),
            next_first: 1,
        }
    }

    pub fn batch_count(&self) -> usize {
        self.total_pages.div_ceil(self.batch_size)
    }
}

impl Iterator for BatchPlan {
    type Item = (BatchId, PageRange);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_first > self.total_pages {
            return None;
        }
        let first = self.next_first;
        let last = (first + self.batch_size - 1).min(self.total_pages);
        self.next_first = last + 1;
        let id = BatchId((first - 1) / self.batch_size + 1);
        Some((id, PageRange::new(first, last)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.next_first > self.total_pages {
            0
        } else {
            (self.total_pages - self.next_first + 1).div_ceil(self.batch_size)
        };
        (remaining, Some(remaining))
    }
}

/// Enumerates [`PageBatch`]es of an opened document.
#[derive(Clone)]
pub struct PageSource {
    source: Arc<dyn DocumentSource>,
    batch_size: usize,
}

impl PageSource {
    /// Fails with `DocumentUnreadable` for a zero-page document.
    pub fn new(source: Arc<dyn DocumentSource>, batch_size: usize) -> Result<Self, PipelineError> {
        if source.page_count() == 0 {
            return Err(PipelineError::DocumentUnreadable {
                path: source.path().to_path_buf(),
                detail: "document has zero pages".into(),
            });
        }
        Ok(Self {
            source,
            batch_size: batch_size.max(1),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.source.path().to_path_buf()
    }

    pub fn page_count(&self) -> usize {
        self.source.page_count()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn plan(&self) -> BatchPlan {
        BatchPlan::new(self.source.page_count(), self.batch_size)
    }

    /// Every batch of the document, lazily, in page order.
    pub fn batches(&self) -> impl Iterator<Item = PageBatch> + Clone + Send + 'static {
        let source = Arc::clone(&self.source);
        self.plan().map(move |(id, range)| PageBatch {
            id,
            range,
            source: Arc::clone(&source),
        })
    }
}
