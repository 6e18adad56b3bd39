//! Per-client session: upstream connect, authentication, and the two
//! line pumps.
//!
//! A session owns both transports exclusively. After the authenticator
//! finishes, two pumps run concurrently: client-to-upstream and
//! upstream-to-client, each reading lines from its side, consulting the
//! policy, and writing to the other. The client-facing writer is shared
//! behind a mutex because the client-to-upstream pump also writes to it
//! when synthesizing a soft denial.
//!
//! Teardown is symmetric: whichever pump exits first (EOF, read error,
//! write error) takes the whole session down, and the session reports
//! only the first error observed.

use crate::audit;
use crate::auth;
use crate::codec::{self, LineReader};
use crate::config::UpstreamAddr;
use crate::error::{ProxyError, Result};
use crate::policy::{Direction, Policy, Verdict};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};

/// Synthesized toward the client in place of a denied line. A benign
/// empty success keeps client state machines intact, where a
/// `510 Unrecognized command` would derail them.
const SOFT_DENIAL: &[u8] = b"250 OK";

/// Deadline for the whole upstream authentication phase. The pumps
/// themselves have no idle deadline; control sessions are long-lived.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Open the upstream control transport and run a full session over it.
///
/// A connect failure ends the session before any client I/O happens; the
/// client transport closes without a response.
pub async fn run_client<C>(client: C, upstream: &UpstreamAddr, policy: Arc<Policy>) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let upstream = upstream.connect().await?;
    run(client, upstream, policy).await
}

/// Run a session over already-connected transports.
///
/// Authenticates upstream first (failure closes the client without a
/// response), then pumps lines both ways until either side closes. Both
/// transports are closed by the time this returns.
pub async fn run<C, U>(client: C, upstream: U, policy: Arc<Policy>) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    U: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (upstream_read, mut upstream_write) = tokio::io::split(upstream);
    let mut upstream_reader = LineReader::new(upstream_read);

    match tokio::time::timeout(
        AUTH_TIMEOUT,
        auth::authenticate(&mut upstream_reader, &mut upstream_write),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => return Err(ProxyError::AuthTimeout),
    }

    let (client_read, client_write) = tokio::io::split(client);
    let client_reader = LineReader::new(client_read);
    let client_writer = Arc::new(Mutex::new(client_write));

    // Bounded and drop-on-full: whichever pump fails first gets its error
    // recorded; a second failure is swallowed.
    let (errors, mut first_error) = mpsc::channel::<ProxyError>(2);

    let mut c2u = tokio::spawn(pump_client_to_upstream(
        client_reader,
        upstream_write,
        Arc::clone(&client_writer),
        Arc::clone(&policy),
        errors.clone(),
    ));
    let mut u2c = tokio::spawn(pump_upstream_to_client(
        upstream_reader,
        client_writer,
        policy,
        errors,
    ));

    // Whichever pump exits first takes the session down: aborting the
    // other task drops its transport halves, so both sockets close.
    tokio::select! {
        _ = &mut c2u => {
            u2c.abort();
            let _ = u2c.await;
        }
        _ = &mut u2c => {
            c2u.abort();
            let _ = c2u.await;
        }
    }

    match first_error.try_recv() {
        Ok(err) => Err(err),
        Err(_) => Ok(()),
    }
}

async fn pump_client_to_upstream<C, U>(
    mut client_reader: LineReader<ReadHalf<C>>,
    mut upstream_write: WriteHalf<U>,
    client_writer: Arc<Mutex<WriteHalf<C>>>,
    policy: Arc<Policy>,
    errors: mpsc::Sender<ProxyError>,
) where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    U: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    loop {
        let raw = match client_reader.read_line().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(err) => {
                let _ = errors.try_send(err);
                break;
            }
        };
        let semantic = codec::trim_line(raw);
        let write_result = match evaluate(&policy, Direction::ClientToUpstream, semantic) {
            Verdict::PassThrough => codec::write_line(&mut upstream_write, semantic).await,
            Verdict::Replace(replacement) => {
                codec::write_line(&mut upstream_write, replacement.as_bytes()).await
            }
            Verdict::Deny => {
                let mut writer = client_writer.lock().await;
                codec::write_line(&mut *writer, SOFT_DENIAL).await
            }
        };
        if let Err(err) = write_result {
            let _ = errors.try_send(err);
            break;
        }
    }
}

async fn pump_upstream_to_client<C, U>(
    mut upstream_reader: LineReader<ReadHalf<U>>,
    client_writer: Arc<Mutex<WriteHalf<C>>>,
    policy: Arc<Policy>,
    errors: mpsc::Sender<ProxyError>,
) where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    U: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    loop {
        let raw = match upstream_reader.read_line().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(err) => {
                let _ = errors.try_send(err);
                break;
            }
        };
        let semantic = codec::trim_line(raw);
        let verdict = evaluate(&policy, Direction::UpstreamToClient, semantic);
        let mut writer = client_writer.lock().await;
        let write_result = match verdict {
            Verdict::PassThrough => codec::write_line(&mut *writer, semantic).await,
            Verdict::Replace(replacement) => {
                codec::write_line(&mut *writer, replacement.as_bytes()).await
            }
            Verdict::Deny => codec::write_line(&mut *writer, SOFT_DENIAL).await,
        };
        drop(writer);
        if let Err(err) = write_result {
            let _ = errors.try_send(err);
            break;
        }
    }
}

/// Evaluate one semantic line, with audit logging. Policy rules are
/// strings, so a line that is not UTF-8 can never match one; it takes
/// the deny path.
fn evaluate(policy: &Policy, direction: Direction, semantic: &[u8]) -> Verdict {
    match std::str::from_utf8(semantic) {
        Ok(line) => {
            let verdict = policy.evaluate(direction, line);
            audit::log_verdict(direction, line, &verdict);
            verdict
        }
        Err(_) => {
            audit::log_verdict(direction, "<non-utf-8 line>", &Verdict::Deny);
            Verdict::Deny
        }
    }
}
