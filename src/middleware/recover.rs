//! Panic recovery.

use std::panic::{self, AssertUnwindSafe};

use http::StatusCode;
use tracing::error;

use crate::context::Context;
use crate::middleware::{Chain, Middleware};

/// Catches a panic anywhere later in the chain.
///
/// The panic message is stored in the context's error slot and, if no
/// response head has gone out yet, `500 Internal Server Error` is written.
/// The middlewares after the one that panicked do not run.
///
/// Without this, a panicking chain still gets a `500` from the dispatcher but
/// earlier middlewares never regain control.
#[derive(Clone, Copy, Debug, Default)]
pub struct Recover;

impl Middleware for Recover {
    fn process(&self, ctx: &mut Context, chain: Chain<'_>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| chain.next(ctx)));
        let Err(payload) = outcome else {
            return;
        };

        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "middleware panicked".to_owned());
        error!(panic = %message, path = ctx.req.path(), "recovered from panic");

        if !ctx.res.is_committed() {
            ctx.res.write_header(StatusCode::INTERNAL_SERVER_ERROR);
        }
        ctx.set_error(message);
    }
}
