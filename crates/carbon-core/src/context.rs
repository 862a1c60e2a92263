//! Per-request context: correlation id plus cooperative cancellation.
//!
//! One [`RequestContext`] is created per inbound decision request and passed
//! by reference to every engine, provider, backend and dispatch call, so all
//! audit records of that request share the same `correlation_id`.

use std::future::Future;

use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// The operation was cancelled before it completed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Receiving half of a cancellation flag
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that can never fire
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sending half of a cancellation flag
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Correlation id and cancellation carried through one decision request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: Option<Uuid>,
    pub cancel: CancelSignal,
}

impl RequestContext {
    /// New context with a correlation id and no cancellation source
    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_cancel(correlation_id: Option<Uuid>, cancel: CancelSignal) -> Self {
        Self {
            correlation_id,
            cancel,
        }
    }

    /// No correlation id, never cancelled (warm-up, tooling)
    pub fn detached() -> Self {
        Self {
            correlation_id: None,
            cancel: CancelSignal::never(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Race `fut` against cancellation. Cancellation wins ties.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, Cancelled>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::detached()
    }
}
