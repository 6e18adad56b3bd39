//! torwarden launcher: policy loading, logging setup, and the supervisor.

mod cli;

use clap::Parser;
use cli::Cli;
use std::path::Path;
use std::sync::Mutex;
use torwarden_proxy::{Policy, PolicyDoc, ProxyError, Result, ServerConfig, UpstreamAddr};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = init_logging(&cli) {
        eprintln!("torwarden: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(cli).await {
        error!("{err}");
        eprintln!("torwarden: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let policy = load_policy(&cli.config_file)?;

    let config = ServerConfig {
        listen: cli.listen,
        upstream: match cli.control_port {
            Some(addr) => UpstreamAddr::ControlPort(addr),
            None => UpstreamAddr::UnixSocket(cli.control_socket.clone()),
        },
    };

    let handle = torwarden_proxy::start(config, policy).await?;

    // Serve until killed.
    tokio::signal::ctrl_c().await.map_err(ProxyError::Io)?;
    info!("interrupt received, shutting down");
    handle.shutdown();
    Ok(())
}

/// Load and compile the JSON policy document.
fn load_policy(path: &Path) -> Result<Policy> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        ProxyError::Config(format!("cannot read policy {}: {err}", path.display()))
    })?;
    let doc: PolicyDoc = serde_json::from_str(&raw).map_err(|err| {
        ProxyError::Config(format!("invalid policy {}: {err}", path.display()))
    })?;
    Ok(Policy::from_doc(doc))
}

/// Install the tracing subscriber.
///
/// Without `--enable-logging` no subscriber is installed at all; filtered
/// lines and connection metadata are sensitive, so silence is the
/// default. `--log-file` appends to a file instead of stderr.
fn init_logging(cli: &Cli) -> Result<()> {
    if !cli.enable_logging {
        return Ok(());
    }
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| {
                    ProxyError::Config(format!("cannot open log file {}: {err}", path.display()))
                })?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
