//! HTTP server: middleware registration, the accept loop, and graceful
//! shutdown.
//!
//! # Two phases
//!
//! A [`Server`] starts in its setup phase, where [`use_fn`](Server::use_fn)
//! and [`use_middleware`](Server::use_middleware) append to the chain.
//! [`listen`](Server::listen) consumes the server and freezes the chain into
//! a [`Dispatcher`] shared by every connection, so registering a middleware
//! while requests are in flight cannot be expressed.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning `Ok(())` from [`Server::listen`], which lets `main` exit cleanly.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::config::{ConnState, ServerConfig};
use crate::context::Context;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::io::{DeadlineIo, InFlight, InFlightGuard};
use crate::middleware::{BoxedMiddleware, Chain, FnMiddleware, Middleware};
use crate::response::ResponseBody;
use crate::tls;

/// hyper refuses HTTP/1 read buffers smaller than this.
const MIN_HTTP1_BUF: usize = 8192;

/// Slack on top of `max_header_bytes` for the read buffer, so a head of
/// exactly the configured size still fits next to pipelined bytes.
const HEADER_BUF_SLACK: usize = 4096;

/// The HTTP server. Obtain one from [`ServerBuilder::build`](crate::ServerBuilder::build).
pub struct Server {
    config: ServerConfig,
    middlewares: Vec<BoxedMiddleware>,
}

impl Server {
    pub(crate) fn new(config: ServerConfig) -> Self {
        Self { config, middlewares: Vec::new() }
    }

    /// Settings this server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Appends a closure to the chain. Middlewares run in registration order.
    ///
    /// ```rust,no_run
    /// use tether::ServerBuilder;
    ///
    /// let app = ServerBuilder::new()
    ///     .addr(":8000")
    ///     .build()
    ///     .use_fn(|ctx, chain| {
    ///         let _ = ctx.res.write_bytes("hello\n");
    ///         chain.next(ctx);
    ///     });
    /// ```
    pub fn use_fn<F>(self, f: F) -> Self
    where
        F: Fn(&mut Context, Chain<'_>) + Send + Sync + 'static,
    {
        self.use_middleware(FnMiddleware::new(f))
    }

    /// Appends a [`Middleware`] value to the chain.
    pub fn use_middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Number of registered middlewares.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Ends the setup phase and returns the frozen chain.
    pub fn into_dispatcher(self) -> Dispatcher {
        Dispatcher::new(
            self.middlewares,
            self.config.read_timeout,
            self.config.effective_max_body_bytes(),
        )
    }

    /// Binds the configured address and serves until SIGTERM or Ctrl-C.
    ///
    /// Failing to bind is the only fatal error. Accept, handshake and
    /// connection errors go to the error log and serving continues.
    pub async fn listen(self) -> Result<(), Error> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serves connections from an already-bound `listener` until `shutdown`
    /// resolves, then drains in-flight connections.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let local_addr = listener
            .local_addr()
            .map_err(|source| Error::Bind { addr: self.config.bind_addr(), source })?;

        let config = Arc::new(self.config.clone());
        let dispatcher = self.into_dispatcher();
        let conn_builder = Arc::new(connection_builder(&config));
        let tls = config.tls_config.clone().map(|tls_config| {
            TlsAcceptor::from(tls::advertise(tls_config, config.tls_next_proto.keys()))
        });

        info!(
            addr = %local_addr,
            tls = tls.is_some(),
            middlewares = dispatcher.len(),
            "tether listening",
        );

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM immediately stops
                // accepting new connections, even if more are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            config.report_error(&Error::Accept(e));
                            continue;
                        }
                    };

                    let conn = Connection {
                        peer,
                        config: Arc::clone(&config),
                        dispatcher: dispatcher.clone(),
                        builder: Arc::clone(&conn_builder),
                    };
                    let tls = tls.clone();
                    tasks.spawn(async move {
                        conn.config.report_conn_state(peer, ConnState::New);
                        let hijacked = match tls {
                            Some(acceptor) => conn.run_tls(acceptor, stream).await,
                            None => {
                                conn.run(TokioIo::new(stream)).await;
                                false
                            }
                        };
                        if !hijacked {
                            conn.config.report_conn_state(peer, ConnState::Closed);
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: wait for every in-flight connection to finish before we return.
        while tasks.join_next().await.is_some() {}

        info!("tether stopped");
        Ok(())
    }
}

/// hyper connection settings derived from the server config.
fn connection_builder(config: &ServerConfig) -> ConnBuilder<TokioExecutor> {
    let mut builder = ConnBuilder::new(TokioExecutor::new());
    let max_header_bytes = config.effective_max_header_bytes();

    {
        let mut http1 = builder.http1();
        http1
            .timer(TokioTimer::new())
            .max_buf_size((max_header_bytes + HEADER_BUF_SLACK).max(MIN_HTTP1_BUF));
        if let Some(timeout) = config.effective_read_header_timeout() {
            http1.header_read_timeout(timeout);
        }
    }
    builder
        .http2()
        .timer(TokioTimer::new())
        .max_header_list_size(u32::try_from(max_header_bytes).unwrap_or(u32::MAX));

    builder
}

// ── Per-connection ────────────────────────────────────────────────────────────

struct Connection {
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    dispatcher: Dispatcher,
    builder: Arc<ConnBuilder<TokioExecutor>>,
}

impl Connection {
    /// Completes the TLS handshake, then either hands the stream to a
    /// protocol-upgrade handler (returns `true`) or serves HTTP over it.
    async fn run_tls(&self, acceptor: TlsAcceptor, stream: TcpStream) -> bool {
        let handshake = acceptor.accept(stream);
        let accepted = match self.config.effective_read_header_timeout() {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into())),
            None => handshake.await,
        };
        let tls_stream = match accepted {
            Ok(s) => s,
            Err(source) => {
                self.config.report_error(&Error::Handshake { peer: self.peer, source });
                return false;
            }
        };

        let proto = tls_stream
            .get_ref()
            .1
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned());
        if let Some((name, handler)) = proto
            .and_then(|p| self.config.tls_next_proto.get_key_value(&p))
        {
            debug!(peer = %self.peer, proto = %name, "handing connection to upgrade handler");
            self.config.report_conn_state(self.peer, ConnState::Hijacked);
            handler(tls_stream, self.dispatcher.clone()).await;
            return true;
        }

        self.run(TokioIo::new(tls_stream)).await;
        false
    }

    /// Serves HTTP/1.1 or HTTP/2 over `io` until the client goes away.
    async fn run<I>(&self, io: I)
    where
        I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    {
        let io = DeadlineIo::new(
            io,
            self.config.effective_idle_timeout(),
            self.config.write_timeout,
        );
        let in_flight = io.in_flight();

        let peer = self.peer;
        let config = Arc::clone(&self.config);
        let dispatcher = self.dispatcher.clone();

        // `service_fn` is called once per request on the connection, not
        // once per connection.
        let svc = service_fn(move |req: hyper::Request<Incoming>| {
            let exchange = Exchange::begin(Arc::clone(&config), peer, &in_flight);
            let dispatcher = dispatcher.clone();
            async move {
                let res = dispatcher.serve_request(req, Some(peer)).await;
                Ok::<_, Infallible>(res.map(|body| TrackedBody { body, _exchange: exchange }))
            }
        });

        if let Err(source) = self.builder.serve_connection(io, svc).await {
            self.config.report_error(&Error::Connection { peer, source });
        }
    }
}

/// One request on a connection, from `Active` until hyper drops the
/// response body.
struct Exchange {
    config: Arc<ServerConfig>,
    peer: SocketAddr,
    _in_flight: InFlightGuard,
}

impl Exchange {
    fn begin(config: Arc<ServerConfig>, peer: SocketAddr, in_flight: &InFlight) -> Self {
        config.report_conn_state(peer, ConnState::Active);
        Self { _in_flight: in_flight.enter(), config, peer }
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.config.report_conn_state(self.peer, ConnState::Idle);
    }
}

/// Response body that ends its [`Exchange`] once hyper is done with it.
struct TrackedBody {
    body: ResponseBody,
    _exchange: Exchange,
}

impl Body for TrackedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        Pin::new(&mut self.body).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.body.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.body.size_hint()
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // `pending()` is a future that never resolves: on non-Unix platforms
    // the SIGTERM arm is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
