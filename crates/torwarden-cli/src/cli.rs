//! CLI argument definitions for torwarden.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// torwarden - filtering proxy for the Tor control port
///
/// Sits between an untrusted control client (a browser, typically) and
/// the daemon's control endpoint. torwarden authenticates upstream with
/// the daemon's own cookie schemes and enforces a static allow-list on
/// every line in both directions, so the client never holds the cookie
/// and never speaks to the control port directly.
#[derive(Parser, Debug)]
#[command(name = "torwarden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON filter policy document
    #[arg(long, default_value = "torwarden.json")]
    pub config_file: PathBuf,

    /// Enable logging (off by default: filtered lines are sensitive)
    #[arg(long)]
    pub enable_logging: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Address to accept control clients on
    #[arg(long, default_value = "127.0.0.1:8851")]
    pub listen: SocketAddr,

    /// Path to the daemon's control unix socket
    #[arg(long, default_value = "/var/run/tor/control", conflicts_with = "control_port")]
    pub control_socket: PathBuf,

    /// The daemon's TCP control port, used instead of the unix socket
    #[arg(long)]
    pub control_port: Option<SocketAddr>,
}
