//! The chain cursor handed to every middleware.

use tracing::trace;

use crate::context::Context;
use crate::middleware::BoxedMiddleware;

/// Position in a request's middleware chain.
///
/// A `Chain` points at the *next* middleware to run. [`next`](Self::next)
/// consumes it, so a middleware can continue at most once and can never step
/// backwards: each call builds a fresh cursor one position further along.
pub struct Chain<'a> {
    middlewares: &'a [BoxedMiddleware],
    index: usize,
}

impl<'a> Chain<'a> {
    /// A cursor at the start of `middlewares`.
    pub fn new(middlewares: &'a [BoxedMiddleware]) -> Self {
        Self { middlewares, index: 0 }
    }

    /// Runs the middleware at this position with a cursor for the one after.
    ///
    /// Past the end of the chain this does nothing: the last middleware may
    /// call `next` unconditionally.
    pub fn next(self, ctx: &mut Context) {
        let Some(middleware) = self.middlewares.get(self.index) else {
            return;
        };
        trace!(index = self.index, "middleware");
        let rest = Chain { middlewares: self.middlewares, index: self.index + 1 };
        middleware.process(ctx, rest);
    }

    /// Index of the middleware `next` would run.
    pub fn index(&self) -> usize {
        self.index
    }

    /// How many middlewares are still ahead, this position included.
    pub fn remaining(&self) -> usize {
        self.middlewares.len().saturating_sub(self.index)
    }

    pub fn is_end(&self) -> bool {
        self.remaining() == 0
    }
}
