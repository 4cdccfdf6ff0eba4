//! Token streaming between a generation task and its consumer.
//!
//! The generation runs on its own task and pushes pieces through a
//! bounded channel. The consumer side is a [`TokenStream`]; dropping it
//! or calling [`TokenStream::cancel`] stops the producer at the next
//! token boundary, which in turn releases the generation guard.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;

/// Channel capacity between producer and consumer.
pub(crate) const TOKEN_CHANNEL_CAPACITY: usize = 64;

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model emitted end-of-output.
    EndOfOutput,
    /// The max-token budget was reached.
    MaxTokens,
    /// The consumer cancelled.
    Cancelled,
}

/// Producer side handed to the backend.
#[derive(Debug)]
pub struct TokenSink {
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    emitted: usize,
}

impl TokenSink {
    pub(crate) const fn new(tx: mpsc::Sender<String>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            emitted: 0,
        }
    }

    /// Creates a connected sink and receiver pair outside of a runtime.
    ///
    /// Used by backend tests and tools that drive a context directly.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<String>, CancellationToken) {
        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        (Self::new(tx, cancel.clone()), rx, cancel)
    }

    /// Emits one piece. Returns `false` once the consumer has cancelled
    /// or gone away; the backend should stop and report
    /// [`FinishReason::Cancelled`].
    pub async fn send(&mut self, piece: impl Into<String>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let piece = piece.into();
        if piece.is_empty() {
            return true;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.tx.send(piece) => {
                if sent.is_ok() {
                    self.emitted += 1;
                }
                sent.is_ok()
            }
        }
    }

    /// Returns true once the consumer cancelled or dropped the stream.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the consumer cancels or drops the stream.
    pub async fn cancelled(&self) {
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = self.tx.closed() => {}
        }
    }

    /// Number of pieces delivered so far.
    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.emitted
    }
}

/// Consumer side of a generation: an ordered, cancellable token sequence.
///
/// Yields pieces in production order and ends at end-of-output, at the
/// token budget, on error, or right after cancellation.
pub struct TokenStream {
    inner: ReceiverStream<String>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<FinishReason, RuntimeError>>>,
}

impl TokenStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<String>,
        cancel: CancellationToken,
        task: JoinHandle<Result<FinishReason, RuntimeError>>,
    ) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            cancel,
            task: Some(task),
        }
    }

    /// Requests cooperative cancellation; the producer stops at the next token.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a handle that cancels this stream when triggered.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels and aborts the producer task. Its guards are released once
    /// the task is torn down; [`Self::finish`] waits for that.
    pub fn abort(&mut self) {
        self.cancel.cancel();
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Drains the remaining tokens and waits for the producer to finish.
    ///
    /// # Errors
    ///
    /// Returns the producer's error, or [`RuntimeError::GenerationFailed`]
    /// if the task panicked or was aborted.
    pub async fn finish(mut self) -> Result<FinishReason, RuntimeError> {
        use futures_util::StreamExt;

        while self.inner.next().await.is_some() {}
        self.join().await
    }

    /// Waits for the producer without draining; used after the consumer
    /// has already read everything.
    pub(crate) async fn join(&mut self) -> Result<FinishReason, RuntimeError> {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Ok(FinishReason::Cancelled),
                Err(err) => Err(RuntimeError::GenerationFailed(format!(
                    "generation task failed: {err}"
                ))),
            },
            None => Ok(FinishReason::Cancelled),
        }
    }
}

impl Stream for TokenStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("running", &self.task.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn spawn_producer(pieces: Vec<&'static str>) -> TokenStream {
        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let mut sink = TokenSink::new(tx, cancel.clone());
        let task = tokio::spawn(async move {
            for piece in pieces {
                if !sink.send(piece).await {
                    return Ok(FinishReason::Cancelled);
                }
            }
            Ok(FinishReason::EndOfOutput)
        });
        TokenStream::new(rx, cancel, task)
    }

    #[tokio::test]
    async fn test_stream_yields_in_order() {
        let stream = spawn_producer(vec!["a", "b", "c"]);
        let pieces: Vec<String> = stream.collect().await;
        assert_eq!(pieces, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_finish_reports_reason() {
        let stream = spawn_producer(vec!["x", "y"]);
        assert_eq!(stream.finish().await.unwrap(), FinishReason::EndOfOutput);
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let mut stream = spawn_producer(vec!["a"; 500]);
        assert_eq!(stream.next().await.as_deref(), Some("a"));
        stream.cancel();
        assert!(stream.next().await.is_none());
        assert_eq!(stream.join().await.unwrap(), FinishReason::Cancelled);
    }

    #[tokio::test]
    async fn test_sink_reports_dropped_consumer() {
        let (mut sink, rx, _cancel) = TokenSink::channel();
        drop(rx);
        assert!(!sink.send("late").await);
        assert!(sink.is_cancelled());
        assert_eq!(sink.emitted(), 0);
    }

    #[tokio::test]
    async fn test_sink_skips_empty_pieces() {
        let (mut sink, mut rx, _cancel) = TokenSink::channel();
        assert!(sink.send("").await);
        assert!(sink.send("x").await);
        drop(sink);
        assert_eq!(rx.recv().await.as_deref(), Some("x"));
        assert!(rx.recv().await.is_none());
    }
}
