//! Per-request entry point: builds the [`Context`] and starts the chain.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use tracing::warn;

use crate::context::Context;
use crate::error::BoxError;
use crate::middleware::{BoxedMiddleware, Chain};
use crate::request::Request;
use crate::response::{ResponseBody, ResponseWriter};

/// The frozen middleware chain of a running server.
///
/// Cloning is one `Arc` increment; every connection task holds a clone and
/// all of them read the same list.
#[derive(Clone)]
pub struct Dispatcher {
    middlewares: Arc<[BoxedMiddleware]>,
    read_timeout: Option<Duration>,
    max_body_bytes: usize,
}

impl Dispatcher {
    pub(crate) fn new(
        middlewares: Vec<BoxedMiddleware>,
        read_timeout: Option<Duration>,
        max_body_bytes: usize,
    ) -> Self {
        Self { middlewares: middlewares.into(), read_timeout, max_body_bytes }
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs the chain for one request, synchronously.
    ///
    /// Returns once the chain is done: either every middleware continued, or
    /// the first one that did not has returned. With no middlewares
    /// registered this does nothing.
    pub fn dispatch(&self, ctx: &mut Context) {
        if self.middlewares.is_empty() {
            return;
        }
        Chain::new(&self.middlewares).next(ctx);
    }

    /// Serves one HTTP request end to end.
    ///
    /// 1. No middlewares: answer an empty `200` without reading the body.
    /// 2. Read the whole body, bounded by the read timeout (`408` on expiry)
    ///    and the body size cap (`413` once exceeded). `400` if the body
    ///    stream fails.
    /// 3. Run the chain on a blocking worker, since middlewares are plain
    ///    synchronous code and body writes block on backpressure.
    /// 4. Return as soon as the head is committed; the body keeps streaming
    ///    while the chain runs.
    pub async fn serve_request<B>(
        &self,
        req: http::Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> http::Response<ResponseBody>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        if self.is_empty() {
            return http::Response::new(ResponseBody::empty());
        }

        let (parts, body) = req.into_parts();
        if body.size_hint().lower() > self.max_body_bytes as u64 {
            return self.too_large(parts.uri.path());
        }

        let body = Limited::new(body, self.max_body_bytes);
        let collected = match self.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, body.collect()).await {
                Ok(collected) => collected,
                Err(_) => {
                    warn!(path = parts.uri.path(), ?limit, "request body read timed out");
                    return ResponseBody::empty_response(StatusCode::REQUEST_TIMEOUT);
                }
            },
            None => body.collect().await,
        };
        let body = match collected {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => return self.too_large(parts.uri.path()),
            Err(e) => {
                warn!(path = parts.uri.path(), error = %e, "failed to read request body");
                return ResponseBody::empty_response(StatusCode::BAD_REQUEST);
            }
        };

        let request = Request::new(parts, body, remote_addr);
        let (writer, pending) = ResponseWriter::channel();
        let dispatcher = self.clone();

        // Detached: the worker outlives this future while the body streams.
        tokio::task::spawn_blocking(move || {
            let mut ctx = Context::new(writer, request);
            dispatcher.dispatch(&mut ctx);
        });

        pending.response().await
    }

    fn too_large(&self, path: &str) -> http::Response<ResponseBody> {
        warn!(path, limit = self.max_body_bytes, "request body too large");
        ResponseBody::empty_response(StatusCode::PAYLOAD_TOO_LARGE)
    }
}
