//! Ingestion Queue
//!
//! Bounded multi-producer, single-consumer channel of owned [`Batch`] buffers.
//!
//! ## Backpressure
//! - `send` never fails on a full queue: the producer waits in slices of `backoff` until the
//!   coordinator frees a slot
//! - There is no maximum wait; a queue that is never drained blocks its producers forever
//! - The only error is [`SortError::Closed`], once the consumer side is gone

use crate::order::Order;
use crate::storage::Record;
use crate::{Result, SortError};
use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// Exclusively owned, contiguous buffer of records
///
/// Created by copying a producer's slice, moved through the queue into the coordinator and
/// released when dropped, on every path.
#[derive(Debug)]
pub struct Batch<T> {
    records: Box<[T]>,
}

impl<T: Record> Batch<T> {
    /// Copy `records` into a new batch
    pub fn copy_from(records: &[T]) -> Self {
        Self {
            records: records.into(),
        }
    }

    /// Sort in place with `order` (not stable)
    pub fn sort<O: Order<T> + ?Sized>(&mut self, order: &O) {
        self.records.sort_unstable_by(|a, b| order.compare(a, b));
    }

    pub fn as_slice(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Create a bounded ingestion queue holding at most `capacity` batches
pub fn ingestion_queue<T>(
    capacity: usize,
    backoff: Duration,
) -> (BatchSender<T>, BatchReceiver<T>) {
    let (tx, rx) = channel::bounded(capacity);
    (
        BatchSender { inner: tx, backoff },
        BatchReceiver { inner: rx },
    )
}

/// Producer side, shared by every pushing thread
pub struct BatchSender<T> {
    inner: Sender<Batch<T>>,
    backoff: Duration,
}

impl<T> Clone for BatchSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            backoff: self.backoff,
        }
    }
}

impl<T> BatchSender<T> {
    /// Enqueue `batch`, blocking while the queue is full
    pub fn send(&self, batch: Batch<T>) -> Result<()> {
        let mut batch = match self.inner.try_send(batch) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Disconnected(_)) => return Err(SortError::Closed),
            Err(TrySendError::Full(batch)) => batch,
        };

        tracing::debug!(
            capacity = ?self.inner.capacity(),
            "ingestion queue full, producer waiting"
        );

        let mut waits: u64 = 0;
        loop {
            match self.inner.send_timeout(batch, self.backoff) {
                Ok(()) => {
                    if waits > 0 {
                        tracing::debug!(waits, "ingestion queue backpressure resolved");
                    }
                    return Ok(());
                }
                Err(SendTimeoutError::Timeout(returned)) => {
                    batch = returned;
                    waits += 1;
                    if waits % 1000 == 0 {
                        tracing::warn!(
                            waited_ms = waits * self.backoff.as_millis() as u64,
                            "producer still blocked on a full ingestion queue"
                        );
                    }
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(SortError::Closed),
            }
        }
    }
}

/// Consumer side, owned by the coordinator
pub struct BatchReceiver<T> {
    inner: Receiver<Batch<T>>,
}

impl<T> BatchReceiver<T> {
    /// Non-blocking poll; `None` when no batch is ready
    pub fn try_next(&self) -> Option<Batch<T>> {
        self.inner.try_recv().ok()
    }

    /// Batches currently queued
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
