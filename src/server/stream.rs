//! Socket wrapper that enforces the idle and write limits of one connection.

use std::{
    future::Future,
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    time::{sleep, Sleep},
};

/// Number of requests a connection is currently handling.
#[derive(Debug, Clone, Default)]
pub struct ActiveRequests(Arc<AtomicUsize>);

impl ActiveRequests {
    pub fn enter(&self) -> RequestGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        RequestGuard(self.0.clone())
    }

    fn is_idle(&self) -> bool {
        self.0.load(Ordering::Acquire) == 0
    }
}

/// Marks one request as in flight until dropped.
pub struct RequestGuard(Arc<AtomicUsize>);

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Wraps a connection's socket.
///
/// A read that stays pending for `idle_timeout` while no request is in flight
/// reads as end of stream, so the HTTP driver closes the connection. A write
/// or flush that makes no progress for `write_timeout` fails with
/// [`io::ErrorKind::TimedOut`].
pub struct TimedStream<S> {
    inner: S,
    active: ActiveRequests,
    idle_timeout: Duration,
    write_timeout: Duration,
    idle: Option<Pin<Box<Sleep>>>,
    stalled: Option<Pin<Box<Sleep>>>,
}

impl<S> TimedStream<S> {
    pub fn new(
        inner: S,
        active: ActiveRequests,
        idle_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            active,
            idle_timeout,
            write_timeout,
            idle: None,
            stalled: None,
        }
    }

    /// Polls the write timer after the socket returned `Pending`.
    fn poll_stalled(&mut self, cx: &mut Context<'_>) -> Poll<io::Error> {
        let limit = self.write_timeout;
        let timer = self.stalled.get_or_insert_with(|| Box::pin(sleep(limit)));
        match timer.as_mut().poll(cx) {
            Poll::Ready(()) => {
                self.stalled = None;
                Poll::Ready(io::Error::new(io::ErrorKind::TimedOut, "write timed out"))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TimedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Poll::Ready(res) = Pin::new(&mut this.inner).poll_read(cx, buf) {
            this.idle = None;
            return Poll::Ready(res);
        }
        if !this.active.is_idle() {
            // re-armed on the next read after the response went out
            this.idle = None;
            return Poll::Pending;
        }

        let limit = this.idle_timeout;
        let timer = this.idle.get_or_insert_with(|| Box::pin(sleep(limit)));
        match timer.as_mut().poll(cx) {
            // nothing filled: end of stream
            Poll::Ready(()) => {
                this.idle = None;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TimedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(res) => {
                this.stalled = None;
                Poll::Ready(res)
            }
            Poll::Pending => this.poll_stalled(cx).map(Err),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(res) => {
                this.stalled = None;
                Poll::Ready(res)
            }
            Poll::Pending => this.poll_stalled(cx).map(Err),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
