//! Tracking of uploads and downloads running in the background.
//!
//! A [`Transfer`] is handed to the caller as soon as the work is
//! scheduled. The spawned worker holds a clone of the same handle and is
//! the only writer; callers poll [`Transfer::snapshot`] or await
//! [`Transfer::wait`]. Every field lives behind one mutex so a reader
//! always sees a consistent snapshot.
//!
//! There is no cancellation. Once spawned, a transfer runs until it
//! completes or fails, and exactly one of the two happens.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::error;

use crate::error::{Result, StoreError};

/// Lifecycle of a transfer. `Completed` and `Failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Initiated,
    Running,
    Completed,
    Failed,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }
}

/// Point in time view of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub state: TransferState,
    pub started_at: Option<DateTime<Utc>>,
    /// 0 to 100, never decreases
    pub percent_complete: u8,
    /// Known once the size of the source is known
    pub bytes_to_transfer: Option<u64>,
    pub bytes_transferred: u64,
}

struct TransferTask<T> {
    progress: TransferProgress,
    outcome: Option<std::result::Result<T, Arc<StoreError>>>,
}

struct Shared<T> {
    task: Mutex<TransferTask<T>>,
    finished: Notify,
}

/// Handle on one background transfer
pub struct Transfer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Transfer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Transfer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("progress", &self.snapshot())
            .finish()
    }
}

impl<T> Transfer<T> {
    fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                task: Mutex::new(TransferTask {
                    progress: TransferProgress {
                        state: TransferState::Initiated,
                        started_at: None,
                        percent_complete: 0,
                        bytes_to_transfer: None,
                        bytes_transferred: 0,
                    },
                    outcome: None,
                }),
                finished: Notify::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> TransferProgress {
        self.shared.task.lock().progress.clone()
    }

    pub fn state(&self) -> TransferState {
        self.shared.task.lock().progress.state
    }

    pub fn is_complete(&self) -> bool {
        self.state().is_terminal()
    }

    pub(crate) fn start(&self) {
        let mut task = self.shared.task.lock();
        if task.progress.state != TransferState::Initiated {
            return;
        }
        task.progress.state = TransferState::Running;
        task.progress.started_at = Some(Utc::now());
        task.progress.percent_complete = 0;
    }

    pub(crate) fn set_total(&self, bytes: u64) {
        let mut task = self.shared.task.lock();
        if task.progress.state.is_terminal() {
            return;
        }
        task.progress.bytes_to_transfer = Some(bytes);
    }

    /// Record the running byte count. Counts and percentages only move forward.
    pub(crate) fn record_progress(&self, bytes_transferred: u64) {
        let mut task = self.shared.task.lock();
        let progress = &mut task.progress;
        if progress.state.is_terminal() {
            return;
        }
        progress.bytes_transferred = progress.bytes_transferred.max(bytes_transferred);
        if let Some(total) = progress.bytes_to_transfer.filter(|t| *t > 0) {
            let percent = (progress.bytes_transferred.min(total) * 100 / total) as u8;
            progress.percent_complete = progress.percent_complete.max(percent);
        }
    }

    pub(crate) fn complete(&self, value: T) {
        {
            let mut task = self.shared.task.lock();
            if task.progress.state.is_terminal() {
                return;
            }
            task.progress.state = TransferState::Completed;
            task.progress.percent_complete = 100;
            if let Some(total) = task.progress.bytes_to_transfer {
                task.progress.bytes_transferred = task.progress.bytes_transferred.max(total);
            }
            task.outcome = Some(Ok(value));
        }
        self.shared.finished.notify_waiters();
    }

    pub(crate) fn fail(&self, err: StoreError) {
        {
            let mut task = self.shared.task.lock();
            if task.progress.state.is_terminal() {
                return;
            }
            task.progress.state = TransferState::Failed;
            task.outcome = Some(Err(Arc::new(err)));
        }
        self.shared.finished.notify_waiters();
    }
}

impl<T: Clone> Transfer<T> {
    /// The outcome, if the transfer has finished. Never blocks.
    pub fn result(&self) -> Option<Result<T>> {
        let task = self.shared.task.lock();
        task.outcome.as_ref().map(|outcome| match outcome {
            Ok(value) => Ok(value.clone()),
            Err(err) => Err(StoreError::Transfer(err.clone())),
        })
    }

    /// Wait until the transfer finishes
    pub async fn wait(&self) -> Result<T> {
        loop {
            let finished = self.shared.finished.notified();
            tokio::pin!(finished);
            // register before checking so a completion in between is not missed
            finished.as_mut().enable();
            if let Some(result) = self.result() {
                return result;
            }
            finished.await;
        }
    }

    /// Wait at most `timeout`. `None` if the transfer is still running.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

impl<T: Send + 'static> Transfer<T> {
    /// Run `work` on its own task and return the handle immediately
    ///
    /// `work` receives a clone of the handle to report progress on. A
    /// panicking worker fails the transfer instead of leaving it unfinished.
    /// Fails with [`StoreError::NoRuntime`] outside a Tokio runtime.
    pub(crate) fn spawn<F, Fut>(description: String, work: F) -> Result<Self>
    where
        F: FnOnce(Transfer<T>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let runtime = Handle::try_current()?;
        let transfer = Self::new();
        let worker = transfer.clone();
        let job = work(transfer.clone());

        runtime.spawn(async move {
            worker.start();
            match AssertUnwindSafe(job).catch_unwind().await {
                Ok(Ok(value)) => worker.complete(value),
                Ok(Err(e)) => {
                    error!(transfer = %description, "transfer failed: {}", e);
                    worker.fail(e);
                }
                Err(_) => {
                    error!(transfer = %description, "transfer worker panicked");
                    worker.fail(StoreError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "transfer worker panicked",
                    )));
                }
            }
        });

        Ok(transfer)
    }
}
