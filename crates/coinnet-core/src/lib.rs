//! coinnet-core: peer address types and configuration.
//! All other coinnet crates depend on this one.

pub mod address;
pub mod config;

pub use address::{canonical_endpoint, group_of, Endpoint, NetworkAddress, NetworkGroup};
pub use config::{CoinnetConfig, ConfigError};
