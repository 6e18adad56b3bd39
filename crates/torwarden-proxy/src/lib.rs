//! Protocol-aware filtering proxy for the Tor control port.
//!
//! The control protocol is line-oriented and powerful: a client that can
//! speak it freely can deanonymize the user, reconfigure circuits, read
//! identity keys, or shut the daemon down. torwarden interposes on that
//! dialogue:
//!
//! 1. **Authenticate upstream** (`auth`) - the proxy negotiates
//!    `PROTOCOLINFO` with the daemon and authenticates itself using the
//!    daemon's cookie schemes (NULL > SAFECOOKIE > COOKIE), so the client
//!    never needs the cookie.
//!
//! 2. **Filter every line** (`policy`, `session`) - each direction has
//!    its own allow-list and rewrite rules; anything unmatched is
//!    swallowed and answered with a benign `250 OK`.
//!
//! 3. **Supervise sessions** (`server`) - one independent session per
//!    accepted client, all sharing one immutable policy.
//!
//! The proxy never parses the control protocol beyond line framing and
//! the authentication exchange; it keeps no state across restarts.

pub mod audit;
pub mod auth;
pub mod codec;
pub mod config;
pub mod cookie;
pub mod error;
pub mod policy;
pub mod server;
pub mod session;

pub use config::{ServerConfig, UpstreamAddr};
pub use error::{ProxyError, Result};
pub use policy::{Direction, Policy, PolicyDoc, Verdict};
pub use server::{start, ServerHandle};
