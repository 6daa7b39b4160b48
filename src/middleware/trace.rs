//! Per-request tracing span with method, path, status and latency.

use std::time::Instant;

use tracing::{info, info_span};

use crate::context::Context;
use crate::middleware::{Chain, Middleware};

/// Wraps the rest of the chain in an `http.request` span and logs one event
/// when it returns.
///
/// Register it first so the span covers every later middleware:
///
/// ```rust,no_run
/// use tether::{ServerBuilder, middleware::trace::Trace};
///
/// let app = ServerBuilder::new().addr(":8000").build().use_middleware(Trace);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Middleware for Trace {
    fn process(&self, ctx: &mut Context, chain: Chain<'_>) {
        let span = info_span!(
            "http.request",
            method = %ctx.req.method(),
            path = ctx.req.path(),
        );
        let _entered = span.enter();
        let started = Instant::now();

        chain.next(ctx);

        // `None` means nothing committed yet; the writer sends 200 on drop.
        let status = ctx.res.status().map_or(200, |s| s.as_u16());
        info!(
            status,
            latency_us = started.elapsed().as_micros() as u64,
            error = ctx.has_error(),
            "request finished",
        );
    }
}
