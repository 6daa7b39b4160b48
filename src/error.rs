//! Unified error type.

use std::io;
use std::net::SocketAddr;

/// A boxed, thread-safe error. This is what middlewares store in the
/// [`Context`](crate::Context) error slot.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by tether's fallible operations.
///
/// Application-level failures are not `Error`s: a middleware records those in
/// the context's error slot and a later middleware decides what to do with
/// them. This type surfaces transport failures only.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The listener could not be bound. Fatal: returned from
    /// [`Server::listen`](crate::Server::listen).
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// `accept(2)` failed. The server logs it and keeps accepting.
    #[error("accept: {0}")]
    Accept(#[source] io::Error),

    /// The TLS handshake with a client failed or timed out.
    #[error("tls handshake with {peer}: {source}")]
    Handshake {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// hyper gave up on a connection (malformed request, timeout, reset).
    #[error("connection {peer}: {source}")]
    Connection {
        peer: SocketAddr,
        #[source]
        source: BoxError,
    },

    /// Certificates or keys could not be turned into a TLS configuration.
    #[error("tls config: {0}")]
    Tls(String),
}

impl Error {
    /// True when the failure is a deadline expiring rather than a fault:
    /// idle connections and slow writers end this way.
    pub fn is_timeout(&self) -> bool {
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = source {
            if let Some(io) = err.downcast_ref::<io::Error>() {
                if io.kind() == io::ErrorKind::TimedOut {
                    return true;
                }
            }
            source = err.source();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_found_through_the_source_chain() {
        let err = Error::Connection {
            peer: "127.0.0.1:9".parse().unwrap(),
            source: Box::new(io::Error::from(io::ErrorKind::TimedOut)),
        };
        assert!(err.is_timeout());

        let err = Error::Accept(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(!err.is_timeout());
    }

    #[test]
    fn bind_error_names_the_address() {
        let err = Error::Bind {
            addr: "0.0.0.0:80".to_owned(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().starts_with("bind 0.0.0.0:80: "));
    }
}
