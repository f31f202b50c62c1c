//! The application-facing seam: what a Worker calls once a socket has
//! finished its options/handshake setup, and what the Poller's comet fleet
//! calls back into (routed through the worker pool, never from the poller's
//! own thread) when a socket it's multiplexing is ready.

use crate::socket::PooledSocket;

/// Why a `Handler::event` call is happening.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SocketStatus {
    /// The socket became readable again while registered with a Poller.
    Open,
    /// The endpoint is stopping; the handler is done with this socket.
    Stop,
    /// The poller gave up waiting on this socket.
    Timeout,
    /// The peer closed the connection, or a read returned EOF.
    Disconnect,
    /// The handler hit an unrecoverable error processing this socket, or
    /// the stage queueing it ran out of capacity.
    Error,
}

/// What a `Handler` call returns, and what the caller does with the socket
/// next: `CLOSED` destroys it, `LONG` registers it with the comet fleet for
/// event-driven delivery, `OPEN` keeps it alive under normal keep-alive
/// registration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandlerSocketState {
    /// Keep the socket open and hand it to the normal keep-alive Poller.
    Open,
    /// The caller must destroy the socket.
    Closed,
    /// Register with the comet fleet: further readiness/timeout events are
    /// delivered to `Handler::event` through the worker pool rather than
    /// triggering a fresh `Handler::process` dispatch.
    Long,
}

/// Application logic invoked by Worker. Implementations must be
/// `Send + Sync`: a single `Handler` instance is shared across every worker
/// thread.
pub trait Handler: Send + Sync {
    /// Called once socket options and (if configured) the TLS handshake
    /// have completed, for a fresh accept or a keep-alive re-dispatch.
    fn process(&self, socket: &PooledSocket) -> HandlerSocketState;

    /// Called when a socket registered with the comet fleet becomes
    /// readable, times out, or the endpoint is tearing it down.
    fn event(&self, socket: &PooledSocket, status: SocketStatus) -> HandlerSocketState;
}
