//! TLS configuration from PEM-encoded certificates.
//!
//! The result goes straight into [`ServerBuilder::tls_config`](crate::ServerBuilder::tls_config).

use std::io::BufReader;
use std::sync::Arc;

use rustls::ServerConfig;

use crate::error::Error;

/// ALPN protocols advertised by [`load_server_config`], in preference order.
pub const DEFAULT_ALPN: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// Builds a [`rustls::ServerConfig`] from a PEM certificate chain and private
/// key, advertising HTTP/2 and HTTP/1.1 over ALPN.
///
/// Names registered with [`next_proto`](crate::ServerBuilder::next_proto)
/// are appended to the advertised list when the server starts.
///
/// # Errors
///
/// Returns [`Error::Tls`] if either PEM block cannot be parsed, or if rustls
/// rejects the pair.
pub fn load_server_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<ServerConfig>, Error> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("failed to parse certificate chain: {e}")))?;
    if certs.is_empty() {
        return Err(Error::Tls("no certificate found in PEM data".to_owned()));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(|e| Error::Tls(format!("failed to read private key: {e}")))?
        .ok_or_else(|| Error::Tls("no private key found in PEM data".to_owned()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(e.to_string()))?;
    config.alpn_protocols = DEFAULT_ALPN.iter().map(|p| p.to_vec()).collect();

    Ok(Arc::new(config))
}

/// Adds every name in `protos` that `config` does not already advertise.
pub(crate) fn advertise<'a>(
    config: Arc<ServerConfig>,
    protos: impl IntoIterator<Item = &'a String>,
) -> Arc<ServerConfig> {
    let missing: Vec<Vec<u8>> = protos
        .into_iter()
        .map(|p| p.as_bytes().to_vec())
        .filter(|p| !config.alpn_protocols.contains(p))
        .collect();
    if missing.is_empty() {
        return config;
    }
    let mut config = (*config).clone();
    config.alpn_protocols.extend(missing);
    Arc::new(config)
}
