//! Per-operation read/write deadlines for accepted connections.
//!
//! hyper bounds header reads itself but has no notion of an idle connection
//! or a stalled write. [`DeadlineIo`] wraps the socket and fails any single
//! read or write that stays pending longer than its limit with
//! [`io::ErrorKind::TimedOut`]; hyper then tears the connection down.
//!
//! The clock starts when an operation first returns `Pending` and is reset
//! every time one completes, so a steady trickle of progress never expires.
//!
//! The read deadline only runs while no request is in flight. hyper keeps a
//! read pending during a request to notice a vanished client, and a slow
//! middleware must not turn that read into a dead connection.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::rt::{Read, ReadBufCursor, Write};
use tokio::time::{Instant, Sleep};

struct Deadline {
    limit: Duration,
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl Deadline {
    fn new(limit: Duration) -> Self {
        Self { limit, sleep: Box::pin(tokio::time::sleep(limit)), armed: false }
    }

    /// Starts the clock if needed and reports whether it ran out.
    fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.armed {
            self.sleep.as_mut().reset(Instant::now() + self.limit);
            self.armed = true;
        }
        self.sleep.as_mut().poll(cx).is_ready()
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

fn guard<T>(
    deadline: &mut Option<Deadline>,
    cx: &mut Context<'_>,
    poll: Poll<io::Result<T>>,
) -> Poll<io::Result<T>> {
    let Some(deadline) = deadline else {
        return poll;
    };
    if poll.is_ready() {
        deadline.disarm();
        return poll;
    }
    if deadline.poll_expired(cx) {
        deadline.disarm();
        return Poll::Ready(Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "socket deadline exceeded",
        )));
    }
    Poll::Pending
}

/// Requests in progress on one connection.
#[derive(Clone, Debug, Default)]
pub(crate) struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    /// Counts one request until the returned guard is dropped.
    pub(crate) fn enter(&self) -> InFlightGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(self.clone())
    }

    fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire) > 0
    }
}

#[derive(Debug)]
pub(crate) struct InFlightGuard(InFlight);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        (self.0).0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A hyper I/O object with optional read and write deadlines.
pub(crate) struct DeadlineIo<T> {
    inner: T,
    read: Option<Deadline>,
    write: Option<Deadline>,
    in_flight: InFlight,
}

impl<T> DeadlineIo<T> {
    pub(crate) fn new(inner: T, read: Option<Duration>, write: Option<Duration>) -> Self {
        Self {
            inner,
            read: read.map(Deadline::new),
            write: write.map(Deadline::new),
            in_flight: InFlight::default(),
        }
    }

    /// Handle for marking requests in flight; the read deadline is paused
    /// while any are.
    pub(crate) fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }
}

impl<T: Read + Unpin> Read for DeadlineIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if this.in_flight.is_busy() {
            if let Some(deadline) = &mut this.read {
                deadline.disarm();
            }
            return poll;
        }
        guard(&mut this.read, cx, poll)
    }
}

impl<T: Write + Unpin> Write for DeadlineIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        guard(&mut this.write, cx, poll)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        guard(&mut this.write, cx, poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        guard(&mut this.write, cx, poll)
    }
}

#[cfg(test)]
mod tests {
    use hyper_util::rt::TokioIo;
    use tokio::io::{AsyncWriteExt, duplex};

    use super::*;

    /// Minimal read future over hyper's `Read` trait.
    async fn read_some<T: Read + Unpin>(io: &mut T) -> io::Result<usize> {
        let mut storage = [0u8; 64];
        std::future::poll_fn(|cx| {
            let mut buf = hyper::rt::ReadBuf::new(&mut storage);
            match Pin::new(&mut *io).poll_read(cx, buf.unfilled()) {
                Poll::Ready(Ok(())) => Poll::Ready(Ok(buf.filled().len())),
                Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                Poll::Pending => Poll::Pending,
            }
        })
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_read_times_out() {
        let (client, _server_end) = duplex(64);
        let mut io = DeadlineIo::new(TokioIo::new(client), Some(Duration::from_secs(5)), None);

        let err = read_some(&mut io).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_resets_the_clock() {
        let (client, mut server_end) = duplex(64);
        let mut io = DeadlineIo::new(TokioIo::new(client), Some(Duration::from_secs(5)), None);

        for _ in 0..3 {
            let writer = async {
                tokio::time::sleep(Duration::from_secs(4)).await;
                server_end.write_all(b"x").await.unwrap();
            };
            let (read, ()) = tokio::join!(read_some(&mut io), writer);
            assert_eq!(read.unwrap(), 1);
        }
    }

    /// Minimal write future over hyper's `Write` trait.
    async fn write_some<T: Write + Unpin>(io: &mut T, data: &[u8]) -> io::Result<usize> {
        std::future::poll_fn(|cx| Pin::new(&mut *io).poll_write(cx, data)).await
    }

    #[tokio::test(start_paused = true)]
    async fn reads_wait_freely_while_a_request_is_in_flight() {
        let (client, mut server_end) = duplex(64);
        let mut io = DeadlineIo::new(TokioIo::new(client), Some(Duration::from_secs(5)), None);
        let in_flight = io.in_flight();

        let request = in_flight.enter();
        let writer = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            server_end.write_all(b"x").await.unwrap();
        };
        let (read, ()) = tokio::join!(read_some(&mut io), writer);
        assert_eq!(read.unwrap(), 1);

        drop(request);
        let err = read_some(&mut io).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out() {
        // Nobody drains the other end, so the pipe fills after 8 bytes.
        let (client, _server_end) = duplex(8);
        let mut io = DeadlineIo::new(TokioIo::new(client), None, Some(Duration::from_secs(5)));

        assert_eq!(write_some(&mut io, &[0; 8]).await.unwrap(), 8);
        let err = write_some(&mut io, b"more").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn no_deadline_passes_through() {
        let (client, mut server_end) = duplex(64);
        let mut io = DeadlineIo::new(TokioIo::new(client), None, None);

        server_end.write_all(b"hello").await.unwrap();
        assert_eq!(read_some(&mut io).await.unwrap(), 5);
    }
}
