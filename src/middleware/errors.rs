//! Terminal error reporting.

use http::StatusCode;
use tracing::error;

use crate::context::Context;
use crate::middleware::{Chain, Middleware};

/// Logs the error slot if an earlier middleware filled it.
///
/// The chain never acts on the error slot by itself; register this last to
/// get the error into the logs. With [`respond`](Self::respond) it also
/// answers `500` when nothing has been sent yet. It always calls
/// [`Chain::next`], which is a no-op at the end of the chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReportErrors {
    respond: bool,
}

impl ReportErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also write `500 Internal Server Error` if the head is still open.
    pub fn respond(mut self, respond: bool) -> Self {
        self.respond = respond;
        self
    }
}

impl Middleware for ReportErrors {
    fn process(&self, ctx: &mut Context, chain: Chain<'_>) {
        if let Some(err) = ctx.error() {
            error!(
                method = %ctx.req.method(),
                path = ctx.req.path(),
                error = %err,
                "request failed",
            );
            if self.respond && !ctx.res.is_committed() {
                ctx.res.write_header(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
        chain.next(ctx);
    }
}
