//! Outgoing HTTP response: the streaming [`ResponseWriter`], the body type
//! handed to hyper, and the [`ResponseHelper`] convenience set.
//!
//! # How a write reaches the socket
//!
//! The middleware chain runs synchronously on a blocking worker while hyper
//! drives the connection on the async side. The two halves are joined by two
//! channels:
//!
//! ```text
//! ResponseWriter (worker thread)          PendingResponse (connection task)
//!   write_header(status) ── oneshot ───▶  head: status + headers
//!   write_bytes(chunk)   ── mpsc(16) ──▶  ResponseBody::poll_frame
//!   drop                 ── close ─────▶  end of body
//! ```
//!
//! hyper sends the head as soon as it is committed and streams each chunk as
//! it is written. Nothing is buffered beyond the channel, and a write can
//! never be taken back.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use http::StatusCode;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::body::{Body, Frame, SizeHint};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

/// Chunks in flight between a writer and its connection before `write`
/// blocks.
const BODY_CHANNEL_CAPACITY: usize = 16;

type Head = (StatusCode, HeaderMap);

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseHelper::bytes`] and
/// [`RequestHelper::is`](crate::RequestHelper::is).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }

    fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// The response sink every middleware writes to.
///
/// Semantics follow a streaming HTTP response:
///
/// - Headers are staged in [`headers_mut`](Self::headers_mut) until the head
///   is committed, either by [`write_header`](Self::write_header) or by the
///   first body write (which commits `200 OK`). Edits made after that point
///   have no effect.
/// - A second `write_header` is ignored and logged.
/// - If nothing was committed when the writer is dropped, an empty `200 OK`
///   goes out with whatever headers were staged.
///
/// Writes fail with [`io::ErrorKind::BrokenPipe`] once the connection has
/// gone away, for example after a write timeout.
pub struct ResponseWriter {
    headers: HeaderMap,
    status: Option<StatusCode>,
    head_tx: Option<oneshot::Sender<Head>>,
    body_tx: mpsc::Sender<Bytes>,
}

impl ResponseWriter {
    /// Creates a writer and the receiving half that turns into an
    /// `http::Response`.
    pub fn channel() -> (Self, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let writer = Self {
            headers: HeaderMap::new(),
            status: None,
            head_tx: Some(head_tx),
            body_tx,
        };
        (writer, PendingResponse { head_rx, body_rx })
    }

    /// Headers staged for the response head.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The committed status, or `None` while the head is still open.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn is_committed(&self) -> bool {
        self.status.is_some()
    }

    /// Commits the response head. Only the first call has any effect.
    pub fn write_header(&mut self, status: StatusCode) {
        if let Some(committed) = self.status {
            warn!(%committed, ignored = %status, "superfluous write_header call");
            return;
        }
        self.commit(status);
    }

    /// Streams one chunk of the body, committing `200 OK` first if needed.
    ///
    /// Blocks while the connection is 16 chunks behind.
    pub fn write_bytes(&mut self, chunk: impl Into<Bytes>) -> io::Result<()> {
        if self.status.is_none() {
            self.commit(StatusCode::OK);
        }
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.body_tx
            .blocking_send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body closed"))
    }

    fn commit(&mut self, status: StatusCode) {
        self.status = Some(status);
        if let Some(tx) = self.head_tx.take() {
            // The receiver is gone only when the connection already is.
            let _ = tx.send((status, std::mem::take(&mut self.headers)));
        }
    }
}

impl io::Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(Bytes::copy_from_slice(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ResponseWriter {
    fn drop(&mut self) {
        // A panicking chain leaves the head uncommitted on purpose so the
        // receiving side can answer 500 instead of an empty 200.
        if self.status.is_none() && !std::thread::panicking() {
            self.commit(StatusCode::OK);
        }
    }
}

// ── PendingResponse ───────────────────────────────────────────────────────────

/// Receiving half of a [`ResponseWriter`].
pub struct PendingResponse {
    head_rx: oneshot::Receiver<Head>,
    body_rx: mpsc::Receiver<Bytes>,
}

impl PendingResponse {
    /// Waits for the head to be committed and returns a response whose body
    /// streams the remaining writes.
    ///
    /// If the writer vanished without committing (the chain panicked), the
    /// result is an empty `500 Internal Server Error`.
    pub async fn response(self) -> http::Response<ResponseBody> {
        match self.head_rx.await {
            Ok((status, headers)) => {
                let mut res = http::Response::new(ResponseBody::stream(self.body_rx));
                *res.status_mut() = status;
                *res.headers_mut() = headers;
                res
            }
            Err(_) => {
                error!("middleware chain ended without committing a response");
                ResponseBody::empty_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

// ── ResponseBody ──────────────────────────────────────────────────────────────

/// The body type tether hands to hyper.
pub struct ResponseBody {
    rx: Option<mpsc::Receiver<Bytes>>,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { rx: None }
    }

    fn stream(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx: Some(rx) }
    }

    pub(crate) fn empty_response(status: StatusCode) -> http::Response<Self> {
        let mut res = http::Response::new(Self::empty());
        *res.status_mut() = status;
        res
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        match self.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx).map(|chunk| chunk.map(|b| Ok(Frame::data(b)))),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.rx.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match self.rx {
            Some(_) => SizeHint::default(),
            None => SizeHint::with_exact(0),
        }
    }
}

// ── ResponseHelper ────────────────────────────────────────────────────────────

/// Formatting conveniences on top of a [`ResponseWriter`].
///
/// Obtain via [`Context::response_helper`](crate::Context::response_helper).
/// Defaults to `200 OK`; terminated by a typed body method which commits the
/// head and writes the body in one go.
///
/// ```rust,no_run
/// # use tether::{Chain, Context};
/// use http::{StatusCode, header, HeaderValue};
///
/// fn created(ctx: &mut Context, _chain: Chain<'_>) {
///     let _ = ctx
///         .response_helper()
///         .status(StatusCode::CREATED)
///         .header(header::LOCATION, HeaderValue::from_static("/users/99"))
///         .json(br#"{"id":99}"#.to_vec());
/// }
/// ```
pub struct ResponseHelper<'a> {
    res: &'a mut ResponseWriter,
    status: StatusCode,
}

impl<'a> ResponseHelper<'a> {
    pub(crate) fn new(res: &'a mut ResponseWriter) -> Self {
        Self { res, status: StatusCode::OK }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.res.headers_mut().append(name, value);
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> io::Result<()> {
        self.finish(ContentType::Json, body.into())
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> io::Result<()> {
        self.finish(ContentType::Text, Bytes::from(body.into()))
    }

    /// Terminate with a typed body. Use this for XML, HTML, binary, SSE, etc.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> io::Result<()> {
        self.finish(content_type, body.into())
    }

    /// Terminate with no body (e.g. `204 No Content`).
    pub fn no_body(mut self) {
        self.res.write_header(self.status);
    }

    /// Redirect to `location` with `status` (one of the 3xx codes).
    pub fn redirect(mut self, status: StatusCode, location: HeaderValue) {
        self.res.headers_mut().insert(header::LOCATION, location);
        self.res.write_header(status);
    }

    fn finish(mut self, content_type: ContentType, body: Bytes) -> io::Result<()> {
        let headers = self.res.headers_mut();
        headers.insert(header::CONTENT_TYPE, content_type.header_value());
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        self.res.write_header(self.status);
        self.res.write_bytes(body)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use http_body_util::BodyExt;

    use super::*;

    async fn collect(res: http::Response<ResponseBody>) -> (StatusCode, HeaderMap, Bytes) {
        let (parts, body) = res.into_parts();
        let body = body.collect().await.unwrap().to_bytes();
        (parts.status, parts.headers, body)
    }

    // Writes block on a bounded channel, so they run off the async executor
    // just like the dispatcher does it.
    async fn run(
        f: impl FnOnce(&mut ResponseWriter) + Send + 'static,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let (mut writer, pending) = ResponseWriter::channel();
        let worker = tokio::task::spawn_blocking(move || f(&mut writer));
        let res = pending.response().await;
        let out = collect(res).await;
        worker.await.unwrap();
        out
    }

    #[tokio::test]
    async fn first_write_commits_ok() {
        let (status, _, body) = run(|w| {
            w.write_all(b"a").unwrap();
            w.write_bytes("bc").unwrap();
        })
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "abc");
    }

    #[tokio::test]
    async fn second_write_header_is_ignored() {
        let (status, _, _) = run(|w| {
            w.write_header(StatusCode::ACCEPTED);
            w.write_header(StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(w.status(), Some(StatusCode::ACCEPTED));
        })
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn headers_edited_after_commit_are_not_sent() {
        let (_, headers, _) = run(|w| {
            w.headers_mut().insert("x-before", HeaderValue::from_static("1"));
            w.write_header(StatusCode::OK);
            w.headers_mut().insert("x-after", HeaderValue::from_static("1"));
        })
        .await;

        assert!(headers.contains_key("x-before"));
        assert!(!headers.contains_key("x-after"));
    }

    #[tokio::test]
    async fn untouched_writer_sends_empty_ok() {
        let (status, _, body) = run(|_| {}).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn helper_sets_content_type_and_status() {
        let (status, headers, body) = run(|w| {
            ResponseHelper::new(w)
                .status(StatusCode::CREATED)
                .header(header::LOCATION, HeaderValue::from_static("/users/1"))
                .json(r#"{"id":1}"#)
                .unwrap();
        })
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::LOCATION], "/users/1");
        assert_eq!(body, r#"{"id":1}"#);
    }

    #[tokio::test]
    async fn writes_fail_once_the_connection_is_gone() {
        let (mut writer, pending) = ResponseWriter::channel();
        drop(pending);
        let result = tokio::task::spawn_blocking(move || writer.write_bytes("late"))
            .await
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
