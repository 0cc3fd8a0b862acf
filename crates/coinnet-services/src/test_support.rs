//! Test doubles for the manager's collaborators.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use coinnet_core::{Endpoint, NetworkAddress};

use crate::collaborators::{AddressDatabase, BanList, Clock, Collaborators, StatusSink};
use crate::connection::{
    ConnectionError, ConnectionFactory, Direction, InboundTransport, PeerConnection,
};

pub fn ep(s: &str) -> Endpoint {
    s.parse().unwrap()
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

// ── Connections ───────────────────────────────────────────────────────────────

pub struct StubConnection {
    pub direction: Direction,
    pub remote: Mutex<Option<Endpoint>>,
    pub valid: AtomicBool,
    pub started: AtomicBool,
    pub stopped: AtomicBool,
    pub sent: AtomicUsize,
    pub fail_sends: AtomicBool,
}

impl StubConnection {
    pub fn new(direction: Direction, remote: Option<Endpoint>) -> Arc<Self> {
        Arc::new(Self {
            direction,
            remote: Mutex::new(remote),
            valid: AtomicBool::new(true),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
        })
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl PeerConnection for StubConnection {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn remote_endpoint(&self) -> Option<Endpoint> {
        *self.remote.lock()
    }

    fn start(self: Arc<Self>) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn start_outbound(self: Arc<Self>, endpoint: Endpoint) {
        *self.remote.lock() = Some(endpoint);
        self.started.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.valid.store(false, Ordering::SeqCst);
    }

    fn is_transport_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn send(&self, _payload: Bytes) -> Result<(), ConnectionError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Inbound transport that only knows its peer address.
pub struct StubTransport {
    pub remote: Option<Endpoint>,
    pub closed: Arc<AtomicBool>,
}

impl StubTransport {
    pub fn new(remote: &str) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                remote: Some(ep(remote)),
                closed: closed.clone(),
            },
            closed,
        )
    }
}

impl InboundTransport for StubTransport {
    fn remote_endpoint(&self) -> Option<Endpoint> {
        self.remote
    }

    fn close(self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Factory that hands out stubs and keeps the strong references, standing in
/// for the in-flight work a real connection would own itself with.
#[derive(Default)]
pub struct StubFactory {
    pub created: Mutex<Vec<Arc<StubConnection>>>,
}

impl StubFactory {
    pub fn created(&self) -> Vec<Arc<StubConnection>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Arc<StubConnection> {
        self.created.lock().last().cloned().expect("no connection created")
    }

    /// Forget the strong reference to every connection created so far.
    pub fn release_all(&self) {
        self.created.lock().clear();
    }
}

impl ConnectionFactory for StubFactory {
    type Transport = StubTransport;

    fn incoming(&self, transport: StubTransport) -> Arc<dyn PeerConnection> {
        let stub = StubConnection::new(Direction::Incoming, transport.remote);
        self.created.lock().push(stub.clone());
        stub
    }

    fn outgoing(&self) -> Arc<dyn PeerConnection> {
        let stub = StubConnection::new(Direction::Outgoing, None);
        self.created.lock().push(stub.clone());
        stub
    }
}

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Address database returning queued candidates in order.
#[derive(Default)]
pub struct ScriptedAddresses {
    pub candidates: Mutex<VecDeque<NetworkAddress>>,
    pub biases: Mutex<Vec<u32>>,
    pub added: Mutex<Vec<(NetworkAddress, NetworkAddress)>>,
    pub attempts: Mutex<Vec<NetworkAddress>>,
}

impl ScriptedAddresses {
    pub fn push(&self, address: NetworkAddress) {
        self.candidates.lock().push_back(address);
    }
}

impl AddressDatabase for ScriptedAddresses {
    fn select(&self, unk_bias: u32) -> Option<NetworkAddress> {
        self.biases.lock().push(unk_bias);
        self.candidates.lock().pop_front()
    }

    fn add(&self, address: NetworkAddress, source: NetworkAddress) {
        self.added.lock().push((address, source));
    }

    fn on_connection_attempt(&self, address: &NetworkAddress) {
        self.attempts.lock().push(address.clone());
    }

    fn on_connected(&self, _address: &NetworkAddress) {}
}

#[derive(Default)]
pub struct StaticBans {
    pub banned: Mutex<Vec<IpAddr>>,
}

impl StaticBans {
    pub fn ban(&self, address: &str) {
        self.banned.lock().push(ip(address));
    }
}

impl BanList for StaticBans {
    fn is_address_banned(&self, address: &IpAddr) -> bool {
        self.banned.lock().contains(&address.to_canonical())
    }
}

#[derive(Default)]
pub struct RecordingStatus {
    pub records: Mutex<Vec<HashMap<String, String>>>,
}

impl RecordingStatus {
    pub fn last(&self) -> HashMap<String, String> {
        self.records.lock().last().cloned().expect("no status recorded")
    }
}

impl StatusSink for RecordingStatus {
    fn insert(&self, status: HashMap<String, String>) {
        self.records.lock().push(status);
    }
}

pub struct FixedClock(pub AtomicU64);

impl FixedClock {
    pub fn at(secs: u64) -> Self {
        Self(AtomicU64::new(secs))
    }
}

impl Clock for FixedClock {
    fn adjusted_time(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub const NOW: u64 = 1_700_000_000;

/// The full set of doubles plus the bundle the manager takes.
pub struct Fakes {
    pub addresses: Arc<ScriptedAddresses>,
    pub bans: Arc<StaticBans>,
    pub status: Arc<RecordingStatus>,
    pub clock: Arc<FixedClock>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            addresses: Arc::new(ScriptedAddresses::default()),
            bans: Arc::new(StaticBans::default()),
            status: Arc::new(RecordingStatus::default()),
            clock: Arc::new(FixedClock::at(NOW)),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            addresses: self.addresses.clone(),
            bans: self.bans.clone(),
            status: self.status.clone(),
            clock: self.clock.clone(),
        }
    }
}
