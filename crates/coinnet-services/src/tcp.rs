//! TCP peer connection.
//!
//! Each connection runs a read task and a write task. Both hold an
//! `Arc<TcpConnection>`; when the transport closes or `stop` is called the
//! tasks exit, drop their references, and the connection is freed. Message
//! framing is not interpreted here: received bytes are forwarded as-is to
//! the inbound channel supplied by the factory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use coinnet_core::{Endpoint, NetworkAddress};

use crate::collaborators::AddressDatabase;
use crate::connection::{
    ConnectionError, ConnectionFactory, Direction, InboundTransport, PeerConnection,
};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Payloads queued for a peer before it counts as stalled.
pub const OUTBOX_CAPACITY: usize = 1024;

/// Received payloads, tagged with the peer they came from.
pub type InboundSender = mpsc::UnboundedSender<(Endpoint, Bytes)>;

pub struct TcpConnection {
    direction: Direction,
    remote: Mutex<Option<Endpoint>>,
    /// Accepted stream waiting for `start`.
    pending: Mutex<Option<TcpStream>>,
    valid: AtomicBool,
    stop_tx: watch::Sender<bool>,
    outbox_tx: mpsc::Sender<Bytes>,
    outbox_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    connect_timeout: Duration,
    addresses: Option<Arc<dyn AddressDatabase>>,
    inbound: Option<InboundSender>,
}

impl TcpConnection {
    fn new(
        direction: Direction,
        stream: Option<(TcpStream, Endpoint)>,
        connect_timeout: Duration,
        addresses: Option<Arc<dyn AddressDatabase>>,
        inbound: Option<InboundSender>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let (pending, remote) = match stream {
            Some((stream, remote)) => (Some(stream), Some(remote)),
            None => (None, None),
        };
        Self {
            direction,
            remote: Mutex::new(remote),
            pending: Mutex::new(pending),
            valid: AtomicBool::new(true),
            stop_tx,
            outbox_tx,
            outbox_rx: Mutex::new(Some(outbox_rx)),
            connect_timeout,
            addresses,
            inbound,
        }
    }

    fn peer_label(&self) -> String {
        let remote = *self.remote.lock();
        remote
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Drive an established stream until it closes or we are stopped.
    async fn run(self: Arc<Self>, stream: TcpStream) {
        let remote = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::debug!(error = %e, "transport closed before start");
                self.stop();
                return;
            }
        };
        *self.remote.lock() = Some(remote);

        let outbox = match self.outbox_rx.lock().take() {
            Some(rx) => rx,
            None => {
                tracing::warn!(peer = %remote, "connection started twice, ignoring");
                return;
            }
        };

        let (reader, writer) = stream.into_split();
        tracing::debug!(peer = %remote, direction = %self.direction, "connection running");

        tokio::spawn(self.clone().write_loop(writer, outbox));
        self.read_loop(reader, remote).await;
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf, remote: Endpoint) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = stopped(&mut stop_rx) => break,

                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        tracing::debug!(peer = %remote, "peer closed connection");
                        break;
                    }
                    Ok(n) => {
                        tracing::trace!(peer = %remote, bytes = n, "received");
                        if let Some(inbound) = &self.inbound {
                            let _ = inbound.send((remote, Bytes::copy_from_slice(&buf[..n])));
                        }
                    }
                    Err(e) => {
                        tracing::debug!(peer = %remote, error = %e, "read failed");
                        break;
                    }
                },
            }
        }

        self.stop();
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut outbox: mpsc::Receiver<Bytes>,
    ) {
        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            let payload = tokio::select! {
                _ = stopped(&mut stop_rx) => break,
                next = outbox.recv() => match next {
                    Some(payload) => payload,
                    None => break,
                },
            };

            // A peer that stops reading blocks the write; stop must still win.
            let written = tokio::select! {
                _ = stopped(&mut stop_rx) => break,
                result = writer.write_all(&payload) => result,
            };
            if let Err(e) = written {
                tracing::debug!(peer = %self.peer_label(), error = %e, "write failed");
                break;
            }
        }

        let _ = writer.shutdown().await;
        self.stop();
    }
}

impl PeerConnection for TcpConnection {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn remote_endpoint(&self) -> Option<Endpoint> {
        *self.remote.lock()
    }

    fn start(self: Arc<Self>) {
        let stream = self.pending.lock().take();
        match stream {
            Some(stream) => {
                tokio::spawn(self.run(stream));
            }
            None => {
                tracing::warn!(peer = %self.peer_label(), "start called without a transport");
                self.stop();
            }
        }
    }

    fn start_outbound(self: Arc<Self>, endpoint: Endpoint) {
        *self.remote.lock() = Some(endpoint);

        tokio::spawn(async move {
            let mut stop_rx = self.stop_tx.subscribe();
            let connect = tokio::time::timeout(self.connect_timeout, TcpStream::connect(endpoint));

            let stream = tokio::select! {
                _ = stopped(&mut stop_rx) => return,
                result = connect => match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        tracing::debug!(peer = %endpoint, error = %e, "connect failed");
                        self.stop();
                        return;
                    }
                    Err(_) => {
                        tracing::debug!(peer = %endpoint, "connect timed out");
                        self.stop();
                        return;
                    }
                },
            };

            tracing::info!(peer = %endpoint, "outbound connection established");
            if let Some(addresses) = &self.addresses {
                addresses.on_connected(&NetworkAddress::from_endpoint(&endpoint));
            }
            self.run(stream).await;
        });
    }

    fn stop(&self) {
        let was_valid = self.valid.swap(false, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
        // Drop a stream that was never started.
        self.pending.lock().take();
        if was_valid {
            tracing::debug!(peer = %self.peer_label(), "connection stopped");
        }
    }

    fn is_transport_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn send(&self, payload: Bytes) -> Result<(), ConnectionError> {
        if !self.is_transport_valid() {
            return Err(ConnectionError::Closed);
        }
        match self.outbox_tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::info!(
                    peer = %self.peer_label(),
                    queued = OUTBOX_CAPACITY,
                    "peer not reading, dropping connection"
                );
                self.stop();
                Err(ConnectionError::Backlogged)
            }
            Err(TrySendError::Closed(_)) => Err(ConnectionError::Closed),
        }
    }
}

/// Resolves once `stop` has been called. The `watch::Ref` is dropped here
/// so callers never hold the channel's read lock across an await.
async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stopped| *stopped).await;
}

/// An accepted inbound socket.
pub struct AcceptedStream {
    pub stream: TcpStream,
    pub remote: Endpoint,
}

impl InboundTransport for AcceptedStream {
    fn remote_endpoint(&self) -> Option<Endpoint> {
        Some(self.remote)
    }

    fn close(self) {
        drop(self.stream);
    }
}

/// Builds TCP connections sharing one configuration.
#[derive(Clone)]
pub struct TcpConnectionFactory {
    connect_timeout: Duration,
    addresses: Option<Arc<dyn AddressDatabase>>,
    inbound: Option<InboundSender>,
}

impl TcpConnectionFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            addresses: None,
            inbound: None,
        }
    }

    /// Report successful outbound connects to `addresses`.
    pub fn with_address_database(mut self, addresses: Arc<dyn AddressDatabase>) -> Self {
        self.addresses = Some(addresses);
        self
    }

    /// Forward received bytes to `inbound`.
    pub fn with_inbound(mut self, inbound: InboundSender) -> Self {
        self.inbound = Some(inbound);
        self
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    type Transport = AcceptedStream;

    fn incoming(&self, transport: AcceptedStream) -> Arc<dyn PeerConnection> {
        Arc::new(TcpConnection::new(
            Direction::Incoming,
            Some((transport.stream, transport.remote)),
            self.connect_timeout,
            self.addresses.clone(),
            self.inbound.clone(),
        ))
    }

    fn outgoing(&self) -> Arc<dyn PeerConnection> {
        Arc::new(TcpConnection::new(
            Direction::Outgoing,
            None,
            self.connect_timeout,
            self.addresses.clone(),
            self.inbound.clone(),
        ))
    }
}
