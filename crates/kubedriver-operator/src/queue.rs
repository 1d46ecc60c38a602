//! Reconciliation queue
//!
//! Unbounded multi-producer/single-consumer buffer of pending work. Posting
//! never blocks and only fails once the consumer is gone. Items from one
//! producer are drained in the order they were posted; there is no ordering
//! across producers and no de-duplication, so consumers must be idempotent.
//!
//! The buffer grows without bound under a sustained event storm. Coalescing
//! by parent key would cap it at one entry per parent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, Stream};
use kubedriver_common::Error;
use tokio::sync::mpsc;

/// One unit of reconciliation work: a parent and the child it owns, if any
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileContext<P, C> {
    /// The parent object; always present
    pub parent: P,
    /// The child owned by the parent; absent until first created
    pub child: Option<C>,
}

impl<P, C> ReconcileContext<P, C> {
    /// Context for a parent with no child yet
    pub fn new(parent: P) -> Self {
        Self {
            parent,
            child: None,
        }
    }

    /// Context for a parent and its child
    pub fn with_child(parent: P, child: Option<C>) -> Self {
        Self { parent, child }
    }
}

/// Create a queue, returning its producer and consumer halves
pub fn reconciliation_queue<T>() -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        QueueSender {
            tx,
            pending: pending.clone(),
        },
        QueueReceiver { rx, pending },
    )
}

/// Producer half; cheap to clone, one clone per producer
pub struct QueueSender<T> {
    tx: mpsc::UnboundedSender<T>,
    pending: Arc<AtomicUsize>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueue an item without blocking
    ///
    /// Fails only when the consumer has shut down.
    pub fn post(&self, item: T) -> Result<(), Error> {
        self.tx
            .send(item)
            .map_err(|_| Error::internal_with_context("queue", "reconciliation queue is closed"))?;
        self.pending.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of items posted but not yet drained
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// True once the consumer has shut down
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half; exactly one per queue
pub struct QueueReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    pending: Arc<AtomicUsize>,
}

impl<T> QueueReceiver<T> {
    /// Wait for the next item; `None` once every sender is gone and the buffer is empty
    pub async fn next(&mut self) -> Option<T> {
        let item = self.rx.recv().await?;
        // Saturating: `post` increments after sending, so the consumer can
        // observe an item before its count lands.
        let _ = self
            .pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
        Some(item)
    }

    /// Number of items posted but not yet drained
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Drain the queue as a stream
    pub fn drain(self) -> impl Stream<Item = T> {
        stream::unfold(self, |mut rx| async move {
            let item = rx.next().await?;
            Some((item, rx))
        })
    }
}
