//! FIFO queue of requests waiting for admission.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::cancel::CancelToken;
use crate::error::{Result, SluiceError};

/// One request waiting for permission to proceed.
///
/// The record is the sending half of a one-shot handshake with the
/// [`Admission`] future returned to the caller. It is resolved exactly once.
#[derive(Debug)]
pub struct AdmissionRecord {
    id: Uuid,
    enqueued_at: Instant,
    tx: oneshot::Sender<()>,
    cancel: Option<CancelToken>,
}

impl AdmissionRecord {
    /// Create a record and the future its caller waits on.
    pub fn new(cancel: Option<CancelToken>) -> (Self, Admission) {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();

        let record = Self {
            id,
            enqueued_at: Instant::now(),
            tx,
            cancel: cancel.clone(),
        };
        (record, Admission::new(id, rx, cancel))
    }

    /// Unique identifier of this record.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the record entered the queue.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Whether the caller has given up on this request.
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed() || self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Let the caller's request proceed.
    ///
    /// Returns `false` if the request was cancelled before this point, in
    /// which case nothing is admitted.
    pub fn resolve(self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.tx.send(()).is_ok()
    }

    fn pending(&self) -> PendingRecord {
        PendingRecord {
            id: self.id,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Read-only view of a queued record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRecord {
    /// Identifier shared with the caller's [`Admission`]
    pub id: Uuid,
    /// When the record entered the queue
    pub enqueued_at: Instant,
}

/// Ordered collection of pending admission records.
///
/// Only the tail accepts records and only the head gives them back.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    records: VecDeque<AdmissionRecord>,
}

impl AdmissionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to the tail.
    pub fn enqueue(&mut self, record: AdmissionRecord) {
        self.records.push_back(record);
    }

    /// Remove and return the head record.
    pub fn dequeue_head(&mut self) -> Option<AdmissionRecord> {
        self.records.pop_front()
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of the queue contents in admission order.
    pub fn snapshot(&self) -> Vec<PendingRecord> {
        self.records.iter().map(AdmissionRecord::pending).collect()
    }
}

/// Future resolving once the rate limiter admits the request.
///
/// Dropping the future before it resolves withdraws the request: its queue
/// record is skipped without consuming window capacity.
#[must_use = "an admission does nothing unless awaited"]
pub struct Admission {
    id: Uuid,
    inner: BoxFuture<'static, Result<()>>,
}

impl Admission {
    fn new(id: Uuid, rx: oneshot::Receiver<()>, cancel: Option<CancelToken>) -> Self {
        let inner = async move {
            let mut rx = rx;
            let Some(token) = cancel else {
                return rx.await.map_err(|_| SluiceError::Closed);
            };

            tokio::select! {
                biased;
                admitted = &mut rx => admitted.map_err(|_| SluiceError::Closed),
                _ = token.cancelled() => {
                    rx.close();
                    Err(SluiceError::Cancelled)
                }
            }
        }
        .boxed();

        Self { id, inner }
    }

    /// Identifier of the queued record backing this admission.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for Admission {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission").field("id", &self.id).finish()
    }
}
