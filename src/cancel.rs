//! External cancellation for a pipeline run.
//!
//! A [`CancelHandle`] is held by whoever may stop the run (Ctrl-C handler,
//! deadline timer, embedding application); every component that admits new
//! work holds a cheap [`CancelSignal`] clone. Cancelling stops admission of
//! new batches and new documents only: requests already in flight finish or
//! time out on their own and their results are still checkpointed.

use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Owner side of the cancellation channel.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observer side of the cancellation channel.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another observer for this handle.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Cancel automatically once `deadline` has elapsed.
    ///
    /// Consumes the handle; the timer task keeps the channel open until it
    /// fires.
    pub fn cancel_after(self, deadline: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            info!("Deadline of {:?} reached, cancelling run", deadline);
            self.cancel();
        })
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Dropping the sender leaves the value at `false` forever.
        drop(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested. Pends forever for [`CancelSignal::never`].
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|v| *v).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
