//! Error types for the torwarden-proxy crate.

use thiserror::Error;

/// Errors that can occur while proxying a control connection.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream connect failed to {addr}: {source}")]
    UpstreamConnect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {reply} reply from control port: {detail}")]
    AuthParse { reply: &'static str, detail: String },

    #[error("no supported authentication method offered by control port")]
    AuthMethodUnavailable,

    #[error("AUTHCHALLENGE server hash verification failed")]
    ServerHashMismatch,

    #[error("authentication rejected by control port: {0}")]
    AuthRejected(String),

    #[error("control port authentication timed out")]
    AuthTimeout,

    #[error("cookie file {path} unreadable: {source}")]
    CookieRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("random nonce generation failed: {0}")]
    Rng(String),

    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
