//! # tether
//!
//! A minimal HTTP server scaffold: a fluent builder for server settings and
//! an explicit middleware chain. Nothing more.
//!
//! ## The chain
//!
//! Every request gets a fresh [`Context`] and runs through the registered
//! middlewares in registration order. Each middleware decides for itself
//! whether the request goes any further:
//!
//! - call [`chain.next(ctx)`](Chain::next) to hand control to the next one;
//! - return without calling it and the remaining middlewares never run.
//!
//! There is no routing, no automatic error handling and no implicit
//! response. A middleware that records an error in the context keeps the
//! chain running; a later middleware decides what the error means.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tether::ServerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tether::Error> {
//!     ServerBuilder::new()
//!         .addr(":8000")
//!         .read_timeout(Duration::from_secs(10))
//!         .write_timeout(Duration::from_secs(10))
//!         .max_header_bytes(1 << 20)
//!         .build()
//!         .use_fn(|ctx, chain| {
//!             if ctx.req.header("authorization").is_none() {
//!                 ctx.set_error("missing credentials");
//!             }
//!             chain.next(ctx);
//!         })
//!         .use_fn(|ctx, _chain| {
//!             let reply = match ctx.error() {
//!                 Some(err) => err.to_string(),
//!                 None => "welcome".to_owned(),
//!             };
//!             let _ = ctx.response_helper().text(reply);
//!         })
//!         .listen()
//!         .await
//! }
//! ```

mod config;
mod context;
mod dispatcher;
mod error;
mod io;
mod request;
mod response;
mod server;

pub mod middleware;
pub mod tls;

pub use config::{
    BoxFuture, ConnState, ConnStateHook, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_HEADER_BYTES,
    ErrorLog, NextProtoHandler, ServerBuilder, ServerConfig,
};
pub use context::Context;
pub use dispatcher::Dispatcher;
pub use error::{BoxError, Error};
pub use middleware::{BoxedMiddleware, Chain, FnMiddleware, Middleware, from_fn};
pub use request::{Request, RequestHelper};
pub use response::{ContentType, PendingResponse, ResponseBody, ResponseHelper, ResponseWriter};
pub use server::Server;
