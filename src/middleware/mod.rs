//! Middleware trait, the function adapter, and built-in middlewares.
//!
//! A middleware is one step of request processing. It receives the request's
//! [`Context`] and a [`Chain`] cursor, does its work, and then decides:
//!
//! - call [`chain.next(ctx)`](Chain::next) to run the rest of the chain, or
//! - return without calling it, which ends the chain right there.
//!
//! Nothing flows back up the stack; everything a middleware wants to say is
//! written to the context or to the response.
//!
//! # How middlewares are stored
//!
//! The server holds middlewares of *different* types in one ordered list, so
//! each is boxed behind the [`Middleware`] trait object:
//!
//! ```text
//! |ctx, chain| { … }                      ← user writes this
//!        ↓ server.use_fn(…)
//! FnMiddleware(closure)                   ← adapter, implements Middleware
//!        ↓  stored as BoxedMiddleware = Arc<dyn Middleware>
//! middleware.process(ctx, chain)          ← one vtable call per step
//! ```

use std::sync::Arc;

use crate::context::Context;

mod chain;
pub mod errors;
pub mod recover;
pub mod trace;

pub use chain::Chain;

/// A type-erased middleware shared by every request.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// One unit of request handling.
///
/// Implement this on your own type for reusable or stateful middlewares;
/// plain closures go through [`FnMiddleware`] instead.
///
/// ```rust
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use tether::{Chain, Context, Middleware};
///
/// #[derive(Default)]
/// struct CountRequests(AtomicU64);
///
/// impl Middleware for CountRequests {
///     fn process(&self, ctx: &mut Context, chain: Chain<'_>) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         chain.next(ctx);
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    fn process(&self, ctx: &mut Context, chain: Chain<'_>);
}

/// Adapts a plain function or closure into a [`Middleware`].
pub struct FnMiddleware<F>(F);

impl<F> FnMiddleware<F>
where
    F: Fn(&mut Context, Chain<'_>) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Context, Chain<'_>) + Send + Sync + 'static,
{
    fn process(&self, ctx: &mut Context, chain: Chain<'_>) {
        (self.0)(ctx, chain)
    }
}

/// Shorthand for [`FnMiddleware::new`].
pub fn from_fn<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&mut Context, Chain<'_>) + Send + Sync + 'static,
{
    FnMiddleware::new(f)
}
