//! Timer Service: deadline-aware, cancellable suspension on tokio's
//! monotonic clock. Suspended runs yield their worker thread.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// How a suspension or raced future ended.
#[derive(Debug, PartialEq)]
pub enum Raced<T> {
    Done(T),
    /// The run's overall deadline passed first.
    Deadline,
    /// Cancellation was requested first.
    Cancelled,
}

/// Per-run timer carrying the run's deadline and cancellation token.
#[derive(Debug, Clone)]
pub struct Timer {
    deadline: Instant,
    cancel: CancellationToken,
}

impl Timer {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once `now > deadline`.
    pub fn expired(&self) -> bool {
        Instant::now() > self.deadline
    }

    /// Suspend for `duration`. A wait that would end past the deadline
    /// sleeps only until the deadline and reports [`Raced::Deadline`].
    pub async fn sleep(&self, duration: Duration) -> Raced<()> {
        let wake_at = Instant::now().checked_add(duration);
        match wake_at {
            Some(at) if at <= self.deadline => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Raced::Cancelled,
                    _ = sleep_until(at) => Raced::Done(()),
                }
            }
            _ => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Raced::Cancelled,
                    _ = sleep_until(self.deadline) => Raced::Deadline,
                }
            }
        }
    }

    /// Drive `fut` until it completes, the deadline passes, or the run is
    /// cancelled. In the latter two cases `fut` is dropped (abandoned).
    pub async fn race<F: Future>(&self, fut: F) -> Raced<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Raced::Cancelled,
            _ = sleep_until(self.deadline) => Raced::Deadline,
            out = fut => Raced::Done(out),
        }
    }
}
