//! Peer address types shared by the connection manager and its collaborators.
//!
//! Every peer is identified by an [`Endpoint`]. The richer [`NetworkAddress`]
//! record is what the address database hands out as a connection candidate:
//! it carries scheduling timestamps and derives the coarse [`NetworkGroup`]
//! used to spread outbound connections across network neighbourhoods.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Identity of one remote peer connection: address plus port.
pub type Endpoint = SocketAddr;

/// Coarse network-topology bucket of an address.
///
/// At most one outbound peer is kept per group so a single operator (or a
/// single hosting provider) cannot occupy the whole peer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NetworkGroup {
    /// Loopback and unspecified addresses.
    Local,
    /// IPv4 (and IPv4-mapped IPv6) /16 prefix.
    Ipv4([u8; 2]),
    /// Native IPv6 /32 prefix.
    Ipv6([u8; 4]),
}

impl fmt::Display for NetworkGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkGroup::Local => write!(f, "local"),
            NetworkGroup::Ipv4([a, b]) => write!(f, "{a}.{b}.0.0/16"),
            NetworkGroup::Ipv6([a, b, c, d]) => write!(f, "{a:02x}{b:02x}:{c:02x}{d:02x}::/32"),
        }
    }
}

/// A candidate or known peer address as stored by the address database.
///
/// The address is held in IPv6 form; IPv4 peers are stored IPv4-mapped so
/// both families share one representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub address: Ipv6Addr,
    pub port: u16,
    /// Last time the peer was seen, epoch seconds.
    pub timestamp: u64,
    /// Last connection attempt, epoch seconds. 0 = never tried.
    pub last_try: u64,
}

impl NetworkAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        let address = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        Self {
            address,
            port,
            timestamp: 0,
            last_try: 0,
        }
    }

    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        Self::new(endpoint.ip(), endpoint.port())
    }

    /// The address with IPv4-mapped addresses unwrapped back to IPv4.
    pub fn ip(&self) -> IpAddr {
        IpAddr::V6(self.address).to_canonical()
    }

    pub fn endpoint(&self) -> Endpoint {
        SocketAddr::new(self.ip(), self.port)
    }

    pub fn is_ipv4(&self) -> bool {
        self.address.to_ipv4_mapped().is_some()
    }

    /// Loopback or "this network" addresses. Never worth dialling.
    pub fn is_local(&self) -> bool {
        match self.ip() {
            IpAddr::V4(v4) => v4.is_loopback() || v4.octets()[0] == 0,
            IpAddr::V6(v6) => v6.is_loopback(),
        }
    }

    /// Whether the record could name a reachable peer at all.
    pub fn is_valid(&self) -> bool {
        if self.port == 0 {
            return false;
        }
        match self.ip() {
            IpAddr::V4(v4) => !v4.is_unspecified() && v4 != Ipv4Addr::BROADCAST,
            IpAddr::V6(v6) => !v6.is_unspecified(),
        }
    }

    pub fn group(&self) -> NetworkGroup {
        group_of(&self.ip())
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

impl From<Endpoint> for NetworkAddress {
    fn from(endpoint: Endpoint) -> Self {
        Self::from_endpoint(&endpoint)
    }
}

/// `endpoint` with an IPv4-mapped address unwrapped to plain IPv4, so a
/// peer reached over a dual-stack socket keys the same as over IPv4.
pub fn canonical_endpoint(endpoint: &Endpoint) -> Endpoint {
    SocketAddr::new(endpoint.ip().to_canonical(), endpoint.port())
}

/// Network group of a bare IP address.
pub fn group_of(ip: &IpAddr) -> NetworkGroup {
    let ip = ip.to_canonical();
    if ip.is_loopback() || ip.is_unspecified() {
        return NetworkGroup::Local;
    }
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, _, _] = v4.octets();
            NetworkGroup::Ipv4([a, b])
        }
        IpAddr::V6(v6) => {
            let o = v6.octets();
            NetworkGroup::Ipv6([o[0], o[1], o[2], o[3]])
        }
    }
}
