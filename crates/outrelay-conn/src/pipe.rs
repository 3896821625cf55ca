//! Session pipe: an ordered hand-off from `send` callers to a request body.
//!
//! The write side enqueues a chunk together with a `oneshot` acceptance
//! signal and returns immediately. The read side is a [`Stream`] used as the
//! outbound request body; it fires a chunk's signal at the moment it yields
//! that chunk to the HTTP client. A caller awaiting [`PendingWrite::accepted`]
//! therefore waits exactly as long as the outbound request takes to pull its
//! bytes, which is how network backpressure reaches `send`.
//!
//! Closure propagates both ways:
//! - dropping the [`PipeWriter`] ends the body stream after the queued chunks;
//! - cancelling the session token ends the body stream at once and fails
//!   every waiting writer;
//! - dropping the [`PipeReader`] fails every queued and future write.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::errors::PipeError;

struct Chunk {
    bytes: Bytes,
    accepted: oneshot::Sender<()>,
}

/// Create a pipe whose ends both observe `closed`.
pub fn pipe(closed: CancellationToken) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        PipeWriter {
            tx,
            closed: closed.clone(),
        },
        PipeReader { rx, closed },
    )
}

/// Write end of a session pipe.
pub struct PipeWriter {
    tx: mpsc::UnboundedSender<Chunk>,
    closed: CancellationToken,
}

impl PipeWriter {
    /// Queue `bytes` behind every chunk submitted before it.
    ///
    /// Never blocks. Fails if the pipe is already closed.
    pub fn submit(&self, bytes: Bytes) -> Result<PendingWrite, PipeError> {
        if self.closed.is_cancelled() {
            return Err(PipeError::Closed);
        }
        let (accepted, rx) = oneshot::channel();
        self.tx
            .send(Chunk { bytes, accepted })
            .map_err(|_| PipeError::Closed)?;
        Ok(PendingWrite {
            rx,
            closed: self.closed.clone(),
        })
    }
}

/// A submitted chunk waiting for the body stream to take it.
#[must_use = "a write is not complete until accepted() resolves"]
pub struct PendingWrite {
    rx: oneshot::Receiver<()>,
    closed: CancellationToken,
}

impl PendingWrite {
    /// Wait until the outbound request has taken the chunk.
    pub async fn accepted(self) -> Result<(), PipeError> {
        tokio::select! {
            biased;
            res = self.rx => res.map_err(|_| PipeError::Closed),
            () = self.closed.cancelled() => Err(PipeError::Closed),
        }
    }
}

/// Read end of a session pipe, used as a streaming request body.
pub struct PipeReader {
    rx: mpsc::UnboundedReceiver<Chunk>,
    closed: CancellationToken,
}

impl Stream for PipeReader {
    type Item = Result<Bytes, PipeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed.is_cancelled() {
            self.rx.close();
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                // The writer may have given up already; the bytes still go out
                // in order.
                let _ = chunk.accepted.send(());
                Poll::Ready(Some(Ok(chunk.bytes)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
