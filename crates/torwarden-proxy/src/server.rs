//! The supervisor: TCP listener, session dispatch, and lifecycle.
//!
//! Accepts control clients on the configured address and hands each one,
//! along with the shared policy, to an independent session task. No
//! per-client failure affects any other session; an accept failure is
//! logged and the loop continues.

use crate::config::ServerConfig;
use crate::error::{ProxyError, Result};
use crate::policy::Policy;
use crate::session;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Handle returned when the supervisor starts.
///
/// Carries the actually-bound address and a shutdown channel. Sessions
/// already running are not interrupted by a shutdown; only the accept
/// loop stops.
#[derive(Debug)]
pub struct ServerHandle {
    /// The address the listener is bound to.
    pub local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    /// Stop accepting new control clients.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Start the supervisor.
///
/// Binds the client-facing listener and begins accepting connections.
/// Returns a [`ServerHandle`]; the accept loop runs until the handle is
/// shut down.
pub async fn start(config: ServerConfig, policy: Policy) -> Result<ServerHandle> {
    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|source| ProxyError::Bind {
            addr: config.listen.to_string(),
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| ProxyError::Bind {
        addr: config.listen.to_string(),
        source,
    })?;

    info!(listen = %local_addr, upstream = %config.upstream, "control port filter listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let policy = Arc::new(policy);

    tokio::spawn(accept_loop(listener, config, policy, shutdown_rx));

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
    })
}

async fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    policy: Arc<Policy>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "accepted control client");
                        let policy = Arc::clone(&policy);
                        let upstream = config.upstream.clone();
                        tokio::spawn(async move {
                            handle_session(stream, peer, &upstream, policy).await;
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("control port filter shutting down");
                    return;
                }
            }
        }
    }
}

async fn handle_session(
    stream: TcpStream,
    peer: SocketAddr,
    upstream: &crate::config::UpstreamAddr,
    policy: Arc<Policy>,
) {
    match session::run_client(stream, upstream, policy).await {
        Ok(()) => debug!(peer = %peer, "control session closed"),
        Err(ProxyError::ServerHashMismatch) => {
            error!(peer = %peer, "SAFECOOKIE server hash mismatch: possible control port tampering");
        }
        Err(err) => info!(peer = %peer, error = %err, "control session ended with error"),
    }
}
