//! Minimal tether example: a four-step chain with a terminal error handler.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:8000/
//!   curl -i 'http://localhost:8000/?fail=1'

use std::time::Duration;

use tether::middleware::{errors::ReportErrors, recover::Recover, trace::Trace};
use tether::ServerBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let app = ServerBuilder::new()
        .addr(":8000")
        .read_timeout(Duration::from_secs(10))
        .write_timeout(Duration::from_secs(10))
        .max_header_bytes(1 << 20)
        .build()
        .use_middleware(Trace)
        .use_middleware(Recover)
        .use_fn(|ctx, chain| {
            let _ = ctx.res.write_bytes("this is middleware 1, call next\n");
            chain.next(ctx);
        })
        .use_fn(|ctx, chain| {
            let _ = ctx.res.write_bytes("this is middleware 2, call next\n");
            chain.next(ctx);
        })
        .use_fn(|ctx, chain| {
            let _ = ctx.res.write_bytes("this is middleware 3\n");
            if ctx.request_helper().query("fail").is_some() {
                ctx.set_error("params error");
            }
            chain.next(ctx);
        })
        // Terminal: logs the error slot and stops.
        .use_middleware(ReportErrors::new());

    if let Err(e) = app.listen().await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
