//! External collaborator interface: the ordered, reliable, backpressured
//! byte-stream transport (§6 "To the transport"). The core never speaks raw
//! sockets or TLS directly — that lives outside the specified core — so
//! these traits are the seam a real listener/dialer implementation plugs
//! into.

use crate::message::{Request, Response};

/// The client-facing half: a [`crate::cliconn::CliConn`] sends already-built
/// responses to the client that is waiting for them.
pub trait ClientTransport: Send + Sync + std::fmt::Debug {
    fn send_response(&self, resp: &Response) -> std::io::Result<()>;

    /// Force-close the transport synchronously. Called when an ordering
    /// invariant would otherwise be violated (§4.B "Failure semantics").
    fn close_sync(&self);

    /// Opaque per-client identity (peer address) the Frang limiter accounts
    /// against (§4.F, §6 "client classifier").
    fn peer_key(&self) -> String;
}

/// The upstream-facing half: a [`crate::srvconn::SrvConn`] sends requests to
/// the backend server it is connected to.
pub trait ServerTransport: Send + Sync + std::fmt::Debug {
    fn send_request(&self, req: &Request) -> std::io::Result<()>;

    fn close_sync(&self);

    /// True while the underlying connection is established. `SrvConn` treats
    /// this as the `LIVE`/`DEAD` axis of its state (§4.C).
    fn is_live(&self) -> bool;
}
