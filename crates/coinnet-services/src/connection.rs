//! Connection lifecycle contract.
//!
//! A connection owns its transport and keeps itself alive while it has
//! pending asynchronous work: `start` and `start_outbound` take
//! `Arc<Self>` and move clones into the tasks they spawn. Nothing else
//! needs to hold a strong reference for the session to keep running, and
//! once the tasks finish (transport closed or `stop` called) the object is
//! dropped. The registry only ever sees a `Weak`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use coinnet_core::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Incoming => write!(f, "incoming"),
            Direction::Outgoing => write!(f, "outgoing"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("transport is closed")]
    Closed,
    /// The peer is not draining its send queue.
    #[error("send queue is full")]
    Backlogged,
}

/// One peer session, inbound or outbound.
pub trait PeerConnection: Send + Sync {
    fn direction(&self) -> Direction;

    /// Remote endpoint of the transport, once known.
    fn remote_endpoint(&self) -> Option<Endpoint>;

    /// Start an inbound session on the already connected transport.
    fn start(self: Arc<Self>);

    /// Dial `endpoint` and start the session once connected.
    fn start_outbound(self: Arc<Self>, endpoint: Endpoint);

    /// Close the transport and release self-ownership. Idempotent.
    fn stop(&self);

    /// False once the transport failed, was closed by the peer, or was stopped.
    fn is_transport_valid(&self) -> bool;

    /// Queue `payload` for sending. A peer whose queue is full is stopped.
    fn send(&self, payload: Bytes) -> Result<(), ConnectionError>;
}

/// A freshly accepted inbound socket awaiting admission.
pub trait InboundTransport: Send {
    /// `None` if the peer address cannot be read (socket already dead).
    fn remote_endpoint(&self) -> Option<Endpoint>;

    /// Close a rejected transport.
    fn close(self);
}

/// Builds connection objects for the manager.
pub trait ConnectionFactory: Send + Sync {
    type Transport: InboundTransport;

    fn incoming(&self, transport: Self::Transport) -> Arc<dyn PeerConnection>;

    fn outgoing(&self) -> Arc<dyn PeerConnection>;
}
