//! Inbound TCP listener.
//!
//! Accepts sockets and hands each one to the manager's admission check.
//! Runs until the shutdown channel fires.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::manager::{Admission, ConnectionManager};
use crate::tcp::{AcceptedStream, TcpConnectionFactory};

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub async fn accept_loop(
    listener: TcpListener,
    manager: Arc<ConnectionManager<TcpConnectionFactory>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, "accepting peer connections");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("peer listener shutting down");
                return Ok(());
            }

            result = listener.accept() => {
                let (stream, remote) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                if let Admission::Rejected(reason) =
                    manager.handle_accept(AcceptedStream { stream, remote })
                {
                    tracing::debug!(peer = %remote, %reason, "dropped inbound socket");
                }
            }
        }
    }
}
