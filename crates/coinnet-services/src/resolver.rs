//! Bootstrap resolution.
//!
//! Turns the configured `host:port` seed list into address-database
//! entries. Entries are shuffled so every node does not hammer the same
//! seed first, then resolved strictly one after another.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::seq::SliceRandom;

use coinnet_core::NetworkAddress;

use crate::collaborators::AddressDatabase;

/// Upper bound on the number of seeds resolved per run.
pub const MAX_BOOTSTRAP_NODES: usize = 100;

/// Per-lookup timeout used by the daemon.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Host name lookup, swappable for tests.
pub trait HostResolver: Send + Sync {
    fn resolve<'a>(&'a self, host: &'a str, port: u16)
        -> BoxFuture<'a, io::Result<Vec<SocketAddr>>>;
}

/// System resolver via `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioResolver;

impl HostResolver for TokioResolver {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> BoxFuture<'a, io::Result<Vec<SocketAddr>>> {
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((host, port)).await?;
            Ok(addrs.collect())
        })
    }
}

/// Source attributed to bootstrap addresses.
pub fn bootstrap_source() -> NetworkAddress {
    NetworkAddress::from_endpoint(&SocketAddr::from(([127, 0, 0, 1], 0)))
}

/// Resolve `nodes` one at a time and feed the first answer of each into
/// `addresses`. Returns how many addresses were added.
pub async fn resolve_bootstrap(
    mut nodes: Vec<(String, u16)>,
    resolver: &dyn HostResolver,
    addresses: &dyn AddressDatabase,
    per_lookup: Duration,
) -> usize {
    if nodes.len() > MAX_BOOTSTRAP_NODES {
        tracing::warn!(
            configured = nodes.len(),
            max = MAX_BOOTSTRAP_NODES,
            "too many bootstrap nodes, truncating"
        );
    }
    nodes.shuffle(&mut rand::thread_rng());
    nodes.truncate(MAX_BOOTSTRAP_NODES);

    let source = bootstrap_source();
    let mut added = 0;
    for (host, port) in nodes {
        let resolved = tokio::time::timeout(per_lookup, resolver.resolve(&host, port)).await;
        match resolved {
            Ok(Ok(addrs)) => match addrs.first() {
                Some(first) => {
                    tracing::debug!(%host, port, resolved = %first, "bootstrap node resolved");
                    addresses.add(NetworkAddress::from_endpoint(first), source.clone());
                    added += 1;
                }
                None => tracing::info!(%host, port, "bootstrap node resolved to nothing"),
            },
            Ok(Err(e)) => {
                tracing::info!(%host, port, error = %e, "failed to resolve bootstrap node")
            }
            Err(_) => tracing::info!(%host, port, "bootstrap lookup timed out"),
        }
    }
    tracing::info!(added, "bootstrap resolution finished");
    added
}
