//! HTTPS serving and ALPN protocol handoff, with a client from tokio-rustls.

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use common::{read_chunked, start, write_and};
use rustls::pki_types::ServerName;
use tether::{ConnState, Dispatcher, ServerBuilder, tls};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::{TlsConnector, server};

const CA: &[u8] = include_bytes!("fixtures/ca.pem");
const CERT: &[u8] = include_bytes!("fixtures/localhost.pem");
const KEY: &[u8] = include_bytes!("fixtures/localhost.key");

const TUNNEL: &str = "x-tether-tunnel";

async fn connect(addr: SocketAddr, alpn: &[&[u8]]) -> TlsStream<TcpStream> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &CA[..]) {
        roots.add(cert.unwrap()).unwrap();
    }
    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

    let tcp = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    TlsConnector::from(Arc::new(config))
        .connect(name, tcp)
        .await
        .unwrap()
}

fn record_states(builder: &mut ServerBuilder) -> Arc<Mutex<Vec<ConnState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&states);
    builder.conn_state(move |_, state| seen.lock().unwrap().push(state));
    states
}

#[tokio::test]
async fn serves_the_chain_over_tls() {
    let mut builder = ServerBuilder::new();
    builder.tls_config(tls::load_server_config(CERT, KEY).unwrap());
    let states = record_states(&mut builder);
    let running = start(builder.build().use_fn(write_and("secure", true))).await;

    let mut stream = connect(running.addr, &[b"http/1.1"]).await;
    assert_eq!(stream.get_ref().1.alpn_protocol(), Some(&b"http/1.1"[..]));
    stream
        .write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
        .await
        .unwrap();
    let res = read_chunked(&mut stream).await;
    drop(stream);
    running.shutdown().await.unwrap();

    assert_eq!(res.status, 200);
    assert_eq!(res.body, b"secure");
    assert_eq!(
        *states.lock().unwrap(),
        vec![ConnState::New, ConnState::Active, ConnState::Idle, ConnState::Closed],
    );
}

#[tokio::test]
async fn registered_alpn_name_hands_the_stream_over() {
    let mut builder = ServerBuilder::new();
    builder
        .tls_config(tls::load_server_config(CERT, KEY).unwrap())
        .next_proto(TUNNEL, |mut io: server::TlsStream<TcpStream>, dispatcher: Dispatcher| {
            async move {
                let greeting = format!("tunnel over {} middlewares", dispatcher.len());
                io.write_all(greeting.as_bytes()).await.unwrap();
                io.shutdown().await.unwrap();
            }
        });
    let states = record_states(&mut builder);
    let running = start(builder.build().use_fn(write_and("http", true))).await;

    let mut stream = connect(running.addr, &[TUNNEL.as_bytes()]).await;
    assert_eq!(stream.get_ref().1.alpn_protocol(), Some(TUNNEL.as_bytes()));
    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    drop(stream);
    running.shutdown().await.unwrap();

    assert_eq!(received, b"tunnel over 1 middlewares");
    assert_eq!(*states.lock().unwrap(), vec![ConnState::New, ConnState::Hijacked]);
}
