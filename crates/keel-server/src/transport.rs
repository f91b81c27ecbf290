//! The seam between the lifecycle manager and a protocol.
//!
//! The lifecycle manager owns binding, the accept loop, connection tracking,
//! and the drain deadline. A [`Transport`] only knows how to serve a single
//! accepted connection and how to wind it down when asked.

use crate::error::ServerResult;
use crate::shutdown::ShutdownSignal;
use crate::listener::BoxedIo;
use keel_core::{Alpn, Flavor, ServerOptions};
use keel_middleware::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;

/// A protocol the generic [`Server`](crate::Server) can drive.
pub trait Transport: Sized + Send + Sync + 'static {
    /// The option flavour this transport is configured with.
    type Flavor: Flavor;

    /// ALPN protocol advertised when serving over TLS.
    const ALPN: Alpn;

    /// Short protocol name used in logs.
    const PROTOCOL: &'static str;

    /// Builds the request handling state from a validated option record.
    ///
    /// Runs every attach callback; a conflict fails construction.
    fn build(options: &ServerOptions<Self::Flavor>) -> ServerResult<Self>;

    /// Serves one connection until the peer closes it or `drain` fires.
    ///
    /// After `drain` fires the transport must stop taking new requests on the
    /// connection, let in-flight ones finish, and then return. The lifecycle
    /// manager aborts the returned future if the grace period runs out.
    fn serve_connection(
        self: Arc<Self>,
        io: BoxedIo,
        peer: Option<SocketAddr>,
        drain: ShutdownSignal,
    ) -> BoxFuture<'static, ()>;

    /// Called once when the server starts draining, before connections are told.
    fn on_drain(&self) {}
}
