//! Shared client helpers for the end-to-end tests.

#![allow(dead_code)]

use bytes::Bytes;
use http::header::HOST;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use keel_server::LocalAddr;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Returns the TCP address a server bound to.
pub fn tcp(addr: &LocalAddr) -> SocketAddr {
    addr.as_tcp().expect("server listens on tcp")
}

/// Sends one HTTP/1.1 request over `io`.
pub async fn send_over<I>(
    io: I,
    method: Method,
    path: &str,
    body: &str,
) -> hyper::Result<(StatusCode, Bytes)>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = http1::handshake(TokioIo::new(io)).await?;
    tokio::spawn(conn);

    let request = hyper::Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, "localhost")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap();
    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, body))
}

/// Sends one HTTP/1.1 request to `addr`.
pub async fn send(
    addr: SocketAddr,
    method: Method,
    path: &str,
    body: &str,
) -> hyper::Result<(StatusCode, Bytes)> {
    let stream = TcpStream::connect(addr).await.unwrap();
    send_over(stream, method, path, body).await
}

/// `GET path`, panicking on transport errors.
pub async fn get(addr: SocketAddr, path: &str) -> (StatusCode, String) {
    let (status, body) = send(addr, Method::GET, path, "").await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}
