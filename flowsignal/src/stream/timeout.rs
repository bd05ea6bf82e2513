//! Idle read timeout for the live connection.
//!
//! A socket that silently stops delivering frames never yields an error, so the reader is
//! wrapped in a [`TimeoutStream`] that ends the stream once nothing arrives for the configured
//! period. The connection manager treats the end of the stream as a drop and reconnects.

use futures::Stream;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;

/// A stream wrapper that terminates once no item is received for `timeout_duration`.
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout_duration: Duration,
    deadline: Pin<Box<tokio::time::Sleep>>,
    timed_out: bool,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout_duration: Duration) -> Self {
        Self {
            inner,
            timeout_duration,
            deadline: Box::pin(tokio::time::sleep(timeout_duration)),
            timed_out: false,
        }
    }

    /// True if the stream ended because the read timeout elapsed.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.timed_out {
            return Poll::Ready(None);
        }

        let timeout_duration = self.timeout_duration;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline.as_mut().reset(Instant::now() + timeout_duration);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(
                        timeout_secs = timeout_duration.as_secs(),
                        "WebSocket read timeout - no data received, triggering reconnection"
                    );
                    self.timed_out = true;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn test_silent_stream_times_out() {
        let mut stream = TimeoutStream::new(futures::stream::pending::<u32>(), Duration::from_secs(120));

        let start = Instant::now();
        assert_eq!(stream.next().await, None);
        assert!(stream.timed_out());
        assert!(start.elapsed() >= Duration::from_secs(120));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_reset_deadline() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<u32>();
        let inner = channel_stream(rx);
        let mut stream = TimeoutStream::new(inner, Duration::from_secs(10));

        for value in 0..3 {
            tokio::time::sleep(Duration::from_secs(8)).await;
            tx.send(value).unwrap();
            assert_eq!(stream.next().await, Some(value));
        }
        assert!(!stream.timed_out());

        drop(tx);
        assert_eq!(stream.next().await, None);
        assert!(!stream.timed_out());
    }

    fn channel_stream(
        rx: tokio::sync::mpsc::UnboundedReceiver<u32>,
    ) -> impl Stream<Item = u32> + Unpin {
        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        }))
    }
}
