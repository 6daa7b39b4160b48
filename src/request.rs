//! Incoming HTTP request handle and the request helper set.

use std::borrow::Cow;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version, header};

use crate::response::ContentType;

/// An incoming HTTP request.
///
/// The head is parsed by hyper; the body has already been read in full by the
/// time the first middleware runs. Read-only: middlewares pass information to
/// each other through the [`Context`](crate::Context), not by editing this.
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    pub(crate) fn new(
        parts: http::request::Parts,
        body: Bytes,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            remote_addr,
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn query(&self) -> Option<&str> { self.uri.query() }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Peer address, when the request arrived over a socket.
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup. Values that are not visible ASCII are
    /// treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(parts, body, None)
    }
}

// ── RequestHelper ─────────────────────────────────────────────────────────────

/// Parsing conveniences over a [`Request`].
///
/// Obtain via [`Context::request_helper`](crate::Context::request_helper).
pub struct RequestHelper<'a> {
    req: &'a Request,
}

impl<'a> RequestHelper<'a> {
    pub(crate) fn new(req: &'a Request) -> Self {
        Self { req }
    }

    /// First value of a query-string parameter, percent-decoded.
    ///
    /// `?name=alice%20b` → `query("name") == Some("alice b")`
    pub fn query(&self, name: &str) -> Option<Cow<'a, str>> {
        let raw = self.req.query()?;
        url::form_urlencoded::parse(raw.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Every query-string pair in order, percent-decoded. Repeated keys are kept.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.req
            .query()
            .map(|raw| url::form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
            .unwrap_or_default()
    }

    /// The body as UTF-8 text.
    pub fn text(&self) -> Result<&'a str, std::str::Utf8Error> {
        std::str::from_utf8(&self.req.body)
    }

    /// The media type of the `content-type` header, without parameters.
    pub fn content_type(&self) -> Option<&'a str> {
        let value = self.req.headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
        value.split(';').next().map(str::trim)
    }

    /// True when the request's media type matches `ty` (parameters ignored).
    pub fn is(&self, ty: ContentType) -> bool {
        let expected = ty.as_str().split(';').next().unwrap_or_default();
        self.content_type()
            .is_some_and(|actual| actual.eq_ignore_ascii_case(expected))
    }

    /// The declared `content-length`, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.req
            .headers
            .get(header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }
}
