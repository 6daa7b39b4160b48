//! Server settings and the fluent [`ServerBuilder`].
//!
//! Every setting is optional. Unset values fall back the way a stock HTTP
//! server does:
//!
//! | Setting | Unset / zero means |
//! |---|---|
//! | `addr` | `0.0.0.0:80`, or `0.0.0.0:443` with TLS |
//! | `read_timeout` | no limit on reading the request body |
//! | `read_header_timeout` | falls back to `read_timeout` |
//! | `write_timeout` | no limit on a single socket write |
//! | `idle_timeout` | falls back to `read_timeout`, then `read_header_timeout` |
//! | `max_header_bytes` | [`DEFAULT_MAX_HEADER_BYTES`] |
//! | `max_body_bytes` | [`DEFAULT_MAX_BODY_BYTES`] |

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::server::Server;

/// Header cap applied when `max_header_bytes` is zero: 1 MiB.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 20;

/// Request body cap applied when `max_body_bytes` is zero: 10 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 << 20;

/// A heap-allocated, type-erased future, as returned by upgrade handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Takes over a TLS connection whose ALPN protocol matched its key in
/// [`ServerConfig::tls_next_proto`]. The connection is closed when the
/// returned future completes.
pub type NextProtoHandler =
    Arc<dyn Fn(TlsStream<TcpStream>, Dispatcher) -> BoxFuture<()> + Send + Sync>;

/// Called whenever a client connection changes [`ConnState`].
pub type ConnStateHook = Arc<dyn Fn(SocketAddr, ConnState) + Send + Sync>;

/// Receives accept, handshake and connection errors. Without one they go to
/// `tracing::error!`.
pub type ErrorLog = Arc<dyn Fn(&Error) + Send + Sync>;

/// Lifecycle of a client connection, as reported to a [`ConnStateHook`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConnState {
    /// Just accepted; no request read yet.
    New,
    /// A request is being handled.
    Active,
    /// A response body finished streaming. Reported once per request, so
    /// on HTTP/2 the `Active`/`Idle` reports of concurrent streams
    /// interleave.
    Idle,
    /// Handed to a [`NextProtoHandler`]; no further states are reported.
    Hijacked,
    /// The connection is finished.
    Closed,
}

/// Settings for one [`Server`]. Assembled by [`ServerBuilder`].
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// `host:port` to listen on. `":8000"` listens on every interface.
    pub addr: String,
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    /// Upper bound on reading a whole request body.
    pub read_timeout: Option<Duration>,
    /// Upper bound on reading a request head.
    pub read_header_timeout: Option<Duration>,
    /// Upper bound on any single socket write.
    pub write_timeout: Option<Duration>,
    /// How long a connection may wait for its next request.
    pub idle_timeout: Option<Duration>,
    /// Cap on the request line plus headers. Zero means the default.
    pub max_header_bytes: usize,
    /// Cap on a buffered request body. Zero means the default.
    pub max_body_bytes: usize,
    /// ALPN protocol name → handler that takes the connection over.
    pub tls_next_proto: HashMap<String, NextProtoHandler>,
    pub conn_state: Option<ConnStateHook>,
    pub error_log: Option<ErrorLog>,
}

impl ServerConfig {
    /// The address actually bound.
    pub fn bind_addr(&self) -> String {
        match self.addr.as_str() {
            "" if self.tls_config.is_some() => "0.0.0.0:443".to_owned(),
            "" => "0.0.0.0:80".to_owned(),
            addr if addr.starts_with(':') => format!("0.0.0.0{addr}"),
            addr => addr.to_owned(),
        }
    }

    pub fn effective_max_header_bytes(&self) -> usize {
        match self.max_header_bytes {
            0 => DEFAULT_MAX_HEADER_BYTES,
            n => n,
        }
    }

    pub fn effective_max_body_bytes(&self) -> usize {
        match self.max_body_bytes {
            0 => DEFAULT_MAX_BODY_BYTES,
            n => n,
        }
    }

    pub fn effective_read_header_timeout(&self) -> Option<Duration> {
        self.read_header_timeout.or(self.read_timeout)
    }

    pub fn effective_idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
            .or(self.read_timeout)
            .or(self.read_header_timeout)
    }

    pub(crate) fn report_conn_state(&self, peer: SocketAddr, state: ConnState) {
        if let Some(hook) = &self.conn_state {
            hook(peer, state);
        }
    }

    pub(crate) fn report_error(&self, err: &Error) {
        match &self.error_log {
            Some(log) => log(err),
            None if err.is_timeout() => tracing::debug!("{err}"),
            None => tracing::error!("{err}"),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut protos: Vec<_> = self.tls_next_proto.keys().collect();
        protos.sort();
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .field("tls", &self.tls_config.is_some())
            .field("read_timeout", &self.read_timeout)
            .field("read_header_timeout", &self.read_header_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_header_bytes", &self.max_header_bytes)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("tls_next_proto", &protos)
            .field("conn_state", &self.conn_state.is_some())
            .field("error_log", &self.error_log.is_some())
            .finish()
    }
}

/// Fluent accumulator for [`ServerConfig`].
///
/// Setters mutate the builder in place and hand it back, so they chain:
///
/// ```rust,no_run
/// use std::time::Duration;
/// use tether::ServerBuilder;
///
/// let app = ServerBuilder::new()
///     .addr(":8000")
///     .read_timeout(Duration::from_secs(10))
///     .write_timeout(Duration::from_secs(10))
///     .max_header_bytes(1 << 20)
///     .build();
/// ```
///
/// A zero duration clears the corresponding timeout.
#[derive(Clone, Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// TCP address to listen on. Empty means the default port.
    pub fn addr(&mut self, addr: impl Into<String>) -> &mut Self {
        self.config.addr = addr.into();
        self
    }

    /// Maximum time to read an entire request body.
    pub fn read_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.read_timeout = non_zero(timeout);
        self
    }

    /// Maximum time to read a request head. The body is governed by
    /// [`read_timeout`](Self::read_timeout).
    pub fn read_header_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.read_header_timeout = non_zero(timeout);
        self
    }

    /// Maximum time a single write to the socket may stall.
    pub fn write_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.write_timeout = non_zero(timeout);
        self
    }

    /// Maximum time a keep-alive connection may sit between requests.
    pub fn idle_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.idle_timeout = non_zero(timeout);
        self
    }

    /// Cap on bytes read for the request line and headers. Does not limit
    /// the body.
    pub fn max_header_bytes(&mut self, bytes: usize) -> &mut Self {
        self.config.max_header_bytes = bytes;
        self
    }

    /// Cap on the request body, which is read in full before the chain
    /// runs. Larger bodies are answered with `413 Payload Too Large`.
    pub fn max_body_bytes(&mut self, bytes: usize) -> &mut Self {
        self.config.max_body_bytes = bytes;
        self
    }

    /// Serve HTTPS with this configuration. See [`crate::tls::load_server_config`].
    pub fn tls_config(&mut self, config: Arc<rustls::ServerConfig>) -> &mut Self {
        self.config.tls_config = Some(config);
        self
    }

    /// Replaces the whole protocol-upgrade table.
    pub fn tls_next_proto(&mut self, protos: HashMap<String, NextProtoHandler>) -> &mut Self {
        self.config.tls_next_proto = protos;
        self
    }

    /// Adds one protocol-upgrade handler for the ALPN name `proto`.
    pub fn next_proto<F, Fut>(&mut self, proto: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(TlsStream<TcpStream>, Dispatcher) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: NextProtoHandler = Arc::new(
            move |io: TlsStream<TcpStream>, dispatcher: Dispatcher| -> BoxFuture<()> {
                Box::pin(handler(io, dispatcher))
            },
        );
        self.config.tls_next_proto.insert(proto.into(), handler);
        self
    }

    pub fn conn_state(
        &mut self,
        hook: impl Fn(SocketAddr, ConnState) + Send + Sync + 'static,
    ) -> &mut Self {
        self.config.conn_state = Some(Arc::new(hook));
        self
    }

    pub fn error_log(&mut self, log: impl Fn(&Error) + Send + Sync + 'static) -> &mut Self {
        self.config.error_log = Some(Arc::new(log));
        self
    }

    /// Produces a server with a snapshot of the current settings and no
    /// middlewares. Each call returns an independent server.
    pub fn build(&self) -> Server {
        Server::new(self.config.clone())
    }
}
