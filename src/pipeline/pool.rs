//! Bounded-concurrency execution of page batches.
//!
//! `futures::stream::iter(batches).map(extract).buffer_unordered(limit)`:
//! at most `limit` extraction futures are polled at once, a new batch is
//! pulled from the (lazy) iterator only when a slot frees up, and results
//! come back in completion order. Rendering happens inside the slot, so no
//! more than `limit` batches worth of page images are ever held in memory.
//!
//! Cancellation is checked at admission: once the signal fires no further
//! batch is pulled, while batches already in flight finish normally.

use crate::cancel::CancelSignal;
use crate::pipeline::client::{ExtractionClient, ExtractionResult};
use crate::pipeline::source::PageBatch;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::debug;

/// Stream of batch results in completion order.
pub type ResultStream = Pin<Box<dyn Stream<Item = ExtractionResult> + Send>>;

#[derive(Clone)]
pub struct WorkerPool {
    client: ExtractionClient,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl WorkerPool {
    pub fn new(client: ExtractionClient, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `batches` with at most `concurrency` in flight.
    ///
    /// The iterator is consumed lazily; batches never pulled because of
    /// cancellation are simply not part of the output.
    pub fn run<I>(&self, batches: I, cancel: CancelSignal) -> ResultStream
    where
        I: IntoIterator<Item = PageBatch>,
        I::IntoIter: Send + 'static,
    {
        let client = self.client.clone();
        let progress = self.progress.clone();

        let results = stream::iter(batches)
            .take_while(move |batch| {
                let admit = !cancel.is_cancelled();
                if !admit {
                    debug!("Cancelled: not admitting batch {}", batch.id);
                }
                futures::future::ready(admit)
            })
            .map(move |batch| {
                let client = client.clone();
                let progress = progress.clone();
                async move {
                    if let Some(ref cb) = progress {
                        cb.on_batch_start(batch.id, batch.range);
                    }
                    let result = client.extract(&batch).await;
                    if let Some(ref cb) = progress {
                        match (&result.text, &result.error) {
                            (Some(text), _) => cb.on_batch_complete(
                                result.batch_id,
                                result.pages,
                                text.len(),
                                result.attempts,
                            ),
                            (None, Some(failure)) => {
                                cb.on_batch_error(result.batch_id, result.pages, failure)
                            }
                            (None, None) => {}
                        }
                    }
                    result
                }
            })
            .buffer_unordered(self.concurrency);

        Box::pin(results)
    }
}
