//! End-to-end lifecycle tests over real sockets.
//!
//! These cover the drain contract as a client sees it:
//!
//! 1. In-flight requests finish when the grace period allows it
//! 2. A zero or elapsed grace period closes open connections
//! 3. Construction and bind failures surface as errors
//! 4. Unix sockets and TLS listeners serve the same routes

mod common;

use common::{get, send, send_over, tcp};
use http::{Method, StatusCode};
use keel_core::{with_grace_period, with_listen, with_network, with_tls, Network, TlsMaterial};
use keel_middleware::RequestError;
use keel_server::http::{text, with_route, HttpOption, HttpServer};
use keel_server::{ServerError, ServerState, ShutdownOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn slow_route(delay: Duration) -> HttpOption {
    with_route(Method::GET, "/slow", move |_req, _params| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, RequestError>(text(StatusCode::OK, "done"))
    })
}

fn hello_route() -> HttpOption {
    with_route(Method::GET, "/hello", |_req, _params| async {
        Ok::<_, RequestError>(text(StatusCode::OK, "hello"))
    })
}

#[tokio::test]
async fn test_in_flight_request_completes_within_grace_period() {
    let server = HttpServer::new([
        with_listen("127.0.0.1:0"),
        with_grace_period(Duration::from_secs(2)),
        slow_route(Duration::from_millis(200)),
    ])
    .unwrap();
    let addr = tcp(&server.start().await.unwrap());

    let client = send(addr, Method::GET, "/slow", "");
    let drain = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        let outcome = server.shutdown().await;
        (outcome, started.elapsed())
    };
    let (response, (outcome, elapsed)) = tokio::join!(client, drain);

    let (status, body) = response.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"done");
    assert_eq!(outcome, ShutdownOutcome::Clean);
    assert!(elapsed < Duration::from_secs(1), "drain took {elapsed:?}");
    assert_eq!(server.state(), ServerState::Stopped { forced: false });
}

#[tokio::test]
async fn test_zero_grace_period_closes_open_connections() {
    let server = HttpServer::new([
        with_listen("127.0.0.1:0"),
        slow_route(Duration::from_secs(5)),
    ])
    .unwrap();
    let addr = tcp(&server.start().await.unwrap());

    let client = send(addr, Method::GET, "/slow", "");
    let drain = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        server.shutdown().await
    };
    let (response, outcome) = tokio::join!(client, drain);

    assert!(response.is_err());
    assert_eq!(outcome, ShutdownOutcome::Forced { abandoned: 1 });
    assert_eq!(server.state(), ServerState::Stopped { forced: true });
}

#[tokio::test]
async fn test_elapsed_grace_period_forces_closure() {
    let server = HttpServer::new([
        with_listen("127.0.0.1:0"),
        with_grace_period(Duration::from_millis(200)),
        slow_route(Duration::from_secs(5)),
    ])
    .unwrap();
    let addr = tcp(&server.start().await.unwrap());

    let client = send(addr, Method::GET, "/slow", "");
    let drain = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        (server.shutdown().await, started.elapsed())
    };
    let (response, (outcome, elapsed)) = tokio::join!(client, drain);

    assert!(response.is_err());
    assert!(outcome.is_forced());
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_shutdown_from_another_task() {
    let server = Arc::new(
        HttpServer::new([
            with_listen("127.0.0.1:0"),
            with_grace_period(Duration::from_secs(1)),
            hello_route(),
        ])
        .unwrap(),
    );
    let addr = tcp(&server.start().await.unwrap());
    assert_eq!(get(addr, "/hello").await, (StatusCode::OK, "hello".to_string()));

    let stopper = Arc::clone(&server);
    let handle = tokio::spawn(async move { stopper.shutdown().await });

    assert_eq!(server.stopped().await, ServerState::Stopped { forced: false });
    assert_eq!(handle.await.unwrap(), ShutdownOutcome::Clean);
    assert_eq!(server.shutdown().await, ShutdownOutcome::Clean);
}

#[test]
fn test_duplicate_route_fails_construction() {
    let result = HttpServer::new([with_listen("127.0.0.1:0"), hello_route(), hello_route()]);
    match result {
        Err(ServerError::RegistrationConflict(conflict)) => {
            assert_eq!(conflict.kind, "route");
            assert_eq!(conflict.name, "GET /hello");
        }
        other => panic!("expected a registration conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_port_in_use_fails_to_start() {
    let first = HttpServer::new([
        with_listen("127.0.0.1:0"),
        with_grace_period(Duration::from_secs(1)),
        hello_route(),
    ])
    .unwrap();
    let addr = tcp(&first.start().await.unwrap());

    let second = HttpServer::new([with_listen(addr.to_string()), hello_route()]).unwrap();
    let err = second.start().await.unwrap_err();
    assert!(err.is_bind());
    assert_eq!(second.state(), ServerState::FailedToStart);

    // The first server is unaffected.
    assert_eq!(get(addr, "/hello").await.0, StatusCode::OK);
    assert_eq!(first.shutdown().await, ShutdownOutcome::Clean);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_listener() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keel.sock");

    let server = HttpServer::new([
        with_network(Network::Unix),
        with_listen(path.to_string_lossy().into_owned()),
        hello_route(),
    ])
    .unwrap();
    server.start().await.unwrap();
    assert!(path.exists());

    let stream = tokio::net::UnixStream::connect(&path).await.unwrap();
    let (status, body) = send_over(stream, Method::GET, "/hello", "").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"hello");

    server.shutdown().await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_tls_listener() {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let material = TlsMaterial::from_pem(cert.pem(), key_pair.serialize_pem());

    let server = HttpServer::new([
        with_listen("127.0.0.1:0"),
        with_grace_period(Duration::from_secs(1)),
        with_tls(material),
        hello_route(),
    ])
    .unwrap();
    let addr = tcp(&server.start().await.unwrap());

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let tcp_stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let stream = connector.connect(server_name, tcp_stream).await.unwrap();

    let (status, body) = send_over(stream, Method::GET, "/hello", "").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"hello");

    assert_eq!(server.shutdown().await, ShutdownOutcome::Clean);
}
