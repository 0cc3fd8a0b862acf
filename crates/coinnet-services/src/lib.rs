//! coinnet-services: peer connection management for the coinnet node.
//! The daemon wires these together; the API reads the registry, ban table
//! and status board.

pub mod address_book;
pub mod ban;
pub mod collaborators;
pub mod connection;
pub mod listener;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod status;
pub mod tcp;

#[cfg(test)]
mod test_support;

pub use address_book::AddressBook;
pub use ban::BanTable;
pub use collaborators::{AddressDatabase, BanList, Clock, Collaborators, StatusSink, SystemClock};
pub use connection::{ConnectionError, ConnectionFactory, Direction, InboundTransport, PeerConnection};
pub use manager::{Admission, ConnectionManager, ManagerSettings, RejectReason};
pub use registry::{ConnectionRegistry, PruneReport};
pub use resolver::{HostResolver, TokioResolver};
pub use status::{StatusBoard, StatusRecord};
pub use tcp::{AcceptedStream, InboundSender, TcpConnection, TcpConnectionFactory};
