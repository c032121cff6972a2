//! Write-stall detection for raw connections.
//!
//! A write that stays pending for longer than the configured timeout fails
//! with [`io::ErrorKind::TimedOut`], which tears the session down. The clock
//! starts when a write first returns pending and restarts whenever bytes are
//! accepted.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Sleep, sleep};

use super::engine::BoxedIo;

// ============================================================================
// WriteStallIo
// ============================================================================

/// Raw stream wrapper that fails writes stuck for too long.
pub(crate) struct WriteStallIo {
    inner: BoxedIo,
    timeout: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl WriteStallIo {
    pub(crate) fn new(inner: BoxedIo, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            deadline: None,
        }
    }

    /// Arms the deadline if needed and reports whether it expired.
    fn poll_stalled(&mut self, cx: &mut Context<'_>) -> Option<io::Error> {
        let timeout = self.timeout;
        let deadline = self
            .deadline
            .get_or_insert_with(|| Box::pin(sleep(timeout)));

        match deadline.as_mut().poll(cx) {
            Poll::Ready(()) => {
                self.deadline = None;
                Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("write stalled for {}ms", timeout.as_millis()),
                ))
            }
            Poll::Pending => None,
        }
    }
}

impl AsyncRead for WriteStallIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for WriteStallIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => match this.poll_stalled(cx) {
                Some(err) => Poll::Ready(Err(err)),
                None => Poll::Pending,
            },
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => {
                this.deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => match this.poll_stalled(cx) {
                Some(err) => Poll::Ready(Err(err)),
                None => Poll::Pending,
            },
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

// ============================================================================
// Tests
// ============================================================================
