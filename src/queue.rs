//! Bounded, multi-producer single-consumer async queue (§4.1).
//!
//! Every processor in this crate communicates only through `AsyncQueue<T>`
//! instances. The queue wraps a bounded `tokio::sync::mpsc` channel and adds
//! the close/cancel semantics the orchestrator's shutdown sequence (§5)
//! depends on: a closed queue fails future and pending pops with
//! [`QueueError::Closed`]; a cancelled queue additionally wakes any pop that
//! is currently suspended, with [`QueueError::Cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Notify};

/// Errors a consumer observes from a stopped queue.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed; no more values will ever arrive.
    #[error("queue closed")]
    Closed,
    /// The queue was cancelled, waking any suspended pop.
    #[error("queue cancelled")]
    Cancelled,
}

struct Shared {
    closed: AtomicBool,
    cancelled: AtomicBool,
    notify: Notify,
}

/// Producer handle. Cloneable; many tasks may hold one.
#[derive(Clone)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    shared: Arc<Shared>,
}

/// Consumer handle. Not cloneable: exactly one awaiting consumer per queue.
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
    shared: Arc<Shared>,
}

/// Construct a bounded queue with the given capacity, returning the
/// producer and consumer halves.
#[must_use]
pub fn channel<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let shared = Arc::new(Shared {
        closed: AtomicBool::new(false),
        cancelled: AtomicBool::new(false),
        notify: Notify::new(),
    });
    (
        QueueSender { tx, shared: shared.clone() },
        QueueReceiver { rx, shared },
    )
}

impl<T> QueueSender<T> {
    /// Push a value. Never suspends unless the bounded channel is full, in
    /// which case it suspends until space is available or the queue closes.
    /// Values pushed after `close()` are silently dropped.
    pub async fn push(&self, value: T) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        let _ = self.tx.send(value).await;
    }

    /// Non-suspending push; drops the value if the channel is momentarily
    /// full or the queue is closed.
    pub fn try_push(&self, value: T) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        let _ = self.tx.try_send(value);
    }

    /// Mark the queue closed. A pop already holding a buffered value still
    /// returns it; once drained, pending and future pops observe
    /// [`QueueError::Closed`], including one already suspended.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    /// Mark the queue cancelled, additionally waking any suspended pop
    /// immediately with [`QueueError::Cancelled`].
    pub fn cancel(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.cancelled.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }
}

impl<T> QueueReceiver<T> {
    /// Await the next value. Suspends if the queue is empty.
    pub async fn pop(&mut self) -> Result<T, QueueError> {
        loop {
            if self.shared.cancelled.load(Ordering::Acquire) {
                return Err(QueueError::Cancelled);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return match self.rx.try_recv() {
                    Ok(value) => Ok(value),
                    Err(_) => Err(QueueError::Closed),
                };
            }
            tokio::select! {
                biased;
                () = self.shared.notify.notified() => continue,
                received = self.rx.recv() => {
                    return match received {
                        Some(value) => Ok(value),
                        None => Err(QueueError::Closed),
                    };
                }
            }
        }
    }

    /// Non-suspending pop; returns `None` if empty (including when closed
    /// or cancelled with nothing buffered).
    pub fn try_pop(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Observational queue depth.
    pub fn size(&self) -> usize {
        self.rx.len()
    }
}
