//! Proxy configuration types.
//!
//! The supervisor needs two endpoints: where to accept control clients,
//! and where the daemon's control port lives. The upstream is a local
//! filesystem socket by default, with a loopback TCP port as the
//! alternative.

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

/// Where the daemon's control endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpstreamAddr {
    /// Local filesystem socket (the preferred transport).
    UnixSocket(PathBuf),
    /// Loopback TCP control port.
    ControlPort(SocketAddr),
}

impl Default for UpstreamAddr {
    fn default() -> Self {
        UpstreamAddr::UnixSocket(PathBuf::from("/var/run/tor/control"))
    }
}

impl UpstreamAddr {
    /// Open a transport to the control endpoint.
    pub async fn connect(&self) -> Result<UpstreamStream> {
        match self {
            UpstreamAddr::UnixSocket(path) => {
                let stream = UnixStream::connect(path).await.map_err(|source| {
                    ProxyError::UpstreamConnect {
                        addr: path.display().to_string(),
                        source,
                    }
                })?;
                Ok(UpstreamStream::Unix(stream))
            }
            UpstreamAddr::ControlPort(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(|source| {
                    ProxyError::UpstreamConnect {
                        addr: addr.to_string(),
                        source,
                    }
                })?;
                Ok(UpstreamStream::Tcp(stream))
            }
        }
    }
}

impl std::fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamAddr::UnixSocket(path) => write!(f, "unix:{}", path.display()),
            UpstreamAddr::ControlPort(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// A connected control-port transport, either flavor.
#[derive(Debug)]
pub enum UpstreamStream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl AsyncRead for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            UpstreamStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            UpstreamStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Unix(stream) => Pin::new(stream).poll_flush(cx),
            UpstreamStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            UpstreamStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Configuration for the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Address to accept control clients on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// The daemon's control endpoint.
    #[serde(default)]
    pub upstream: UpstreamAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            upstream: UpstreamAddr::default(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8851))
}
