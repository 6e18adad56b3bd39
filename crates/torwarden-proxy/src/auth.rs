//! Control-port authentication.
//!
//! Before any client traffic flows, the proxy authenticates itself to the
//! daemon: it sends `PROTOCOLINFO`, collects the advertised methods and
//! cookie file path, picks the best method, and completes the handshake.
//!
//! Method preference is `NULL` > `SAFECOOKIE` > `COOKIE`. NULL first
//! because a daemon advertising it has been configured to require no
//! authentication, so the proxy has no secret to present. Between the two
//! cookie schemes, SAFECOOKIE wins: it proves knowledge of the cookie
//! without sending its contents over the socket.
//!
//! Nothing in this module logs cookie bytes, nonces, or derived hashes.

use crate::codec::{self, LineReader};
use crate::cookie;
use crate::error::{ProxyError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// HMAC keys fixed by the control protocol's SAFECOOKIE scheme.
const SERVER_HASH_KEY: &[u8] = b"Tor safe cookie authentication server-to-controller hash";
const CLIENT_HASH_KEY: &[u8] = b"Tor safe cookie authentication controller-to-server hash";

/// Client nonce length in bytes; fresh per handshake.
const NONCE_LEN: usize = 32;

/// What PROTOCOLINFO told us about the daemon's auth requirements.
#[derive(Debug, Default, PartialEq, Eq)]
struct AuthContext {
    can_null: bool,
    can_cookie: bool,
    can_safecookie: bool,
    cookie_path: Option<String>,
}

/// The method actually selected for this session.
#[derive(Debug, PartialEq, Eq)]
enum Method {
    Null,
    SafeCookie(String),
    Cookie(String),
}

impl AuthContext {
    /// Pick the best advertised method. Cookie schemes are only usable
    /// when the daemon also told us where the cookie lives.
    fn choose(self) -> Option<Method> {
        if self.can_null {
            return Some(Method::Null);
        }
        match self.cookie_path {
            Some(path) if self.can_safecookie => Some(Method::SafeCookie(path)),
            Some(path) if self.can_cookie => Some(Method::Cookie(path)),
            _ => None,
        }
    }
}

/// Authenticate to the daemon over the given upstream transport.
///
/// Drives the whole state machine to completion: `PROTOCOLINFO`, method
/// selection, the optional `AUTHCHALLENGE` exchange, and the final
/// `AUTHENTICATE`. Any unexpected or unparsable reply is fatal.
pub async fn authenticate<R, W>(reader: &mut LineReader<R>, writer: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    codec::write_line(writer, b"PROTOCOLINFO").await?;
    let context = read_protocolinfo(reader).await?;

    match context.choose() {
        Some(Method::Null) => {
            debug!("authenticating with NULL method");
            codec::write_line(writer, b"AUTHENTICATE").await?;
        }
        Some(Method::SafeCookie(path)) => {
            debug!("authenticating with SAFECOOKIE method");
            let cookie = cookie::read_cookie(&path).await?;
            let client_hash = safecookie_handshake(reader, writer, &cookie).await?;
            let request = Zeroizing::new(format!("AUTHENTICATE {}", hex::encode(&client_hash[..])));
            codec::write_line(writer, request.as_bytes()).await?;
        }
        Some(Method::Cookie(path)) => {
            debug!("authenticating with COOKIE method");
            let cookie = cookie::read_cookie(&path).await?;
            let request = Zeroizing::new(format!("AUTHENTICATE {}", hex::encode(&cookie[..])));
            codec::write_line(writer, request.as_bytes()).await?;
        }
        None => return Err(ProxyError::AuthMethodUnavailable),
    }

    let raw = reader
        .read_line()
        .await?
        .ok_or_else(|| auth_parse("AUTHENTICATE", "stream closed before reply"))?;
    let line = std::str::from_utf8(codec::trim_line(raw))
        .map_err(|_| auth_parse("AUTHENTICATE", "reply is not valid UTF-8"))?;
    if !line.starts_with("250") {
        return Err(ProxyError::AuthRejected(line.to_string()));
    }

    debug!("control port authentication complete");
    Ok(())
}

/// Read the multi-line PROTOCOLINFO reply up to its `250 OK` terminator.
///
/// `250-AUTH` lines contribute methods and the cookie path; other `250-`
/// lines (version, protocol revision) are ignored. Any line not starting
/// with `250` is fatal.
async fn read_protocolinfo<R>(reader: &mut LineReader<R>) -> Result<AuthContext>
where
    R: AsyncRead + Unpin,
{
    let mut context = AuthContext::default();
    loop {
        let raw = reader
            .read_line()
            .await?
            .ok_or_else(|| auth_parse("PROTOCOLINFO", "stream closed before 250 OK"))?;
        let line = std::str::from_utf8(codec::trim_line(raw))
            .map_err(|_| auth_parse("PROTOCOLINFO", "reply is not valid UTF-8"))?;
        if !line.starts_with("250") {
            return Err(auth_parse(
                "PROTOCOLINFO",
                format!("unexpected status line: {line}"),
            ));
        }
        if line == "250 OK" {
            return Ok(context);
        }
        if line.split(' ').next() == Some("250-AUTH") {
            absorb_auth_line(&mut context, line);
        }
    }
}

/// Fold one `250-AUTH` line into the context.
///
/// Mirrors the daemon's tolerance on the way in: a bare `250-AUTH`, a
/// second word without `METHODS=`, or an unquotable `COOKIEFILE=` value
/// all leave the context unchanged rather than failing the handshake.
fn absorb_auth_line(context: &mut AuthContext, line: &str) {
    let mut words = line.splitn(3, ' ');
    let _ = words.next();
    let Some(methods_word) = words.next() else {
        return;
    };
    let Some(methods) = methods_word.strip_prefix("METHODS=") else {
        return;
    };
    for method in methods.split(',') {
        match method {
            "NULL" => context.can_null = true,
            "COOKIE" => context.can_cookie = true,
            "SAFECOOKIE" => context.can_safecookie = true,
            _ => {}
        }
    }
    if context.can_cookie || context.can_safecookie {
        if let Some(rest) = words.next() {
            if let Some(path) = rest
                .strip_prefix("COOKIEFILE=")
                .and_then(cookie::unquote)
            {
                context.cookie_path = Some(path);
            }
        }
    }
}

/// Run the SAFECOOKIE challenge-response exchange.
///
/// Sends a fresh 32-byte nonce, verifies the daemon's server hash in
/// constant time, and returns the client hash to submit in
/// `AUTHENTICATE`. A hash mismatch signals possible tampering and is
/// fatal.
async fn safecookie_handshake<R, W>(
    reader: &mut LineReader<R>,
    writer: &mut W,
    cookie: &[u8],
) -> Result<Zeroizing<Vec<u8>>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut client_nonce = [0u8; NONCE_LEN];
    getrandom::fill(&mut client_nonce).map_err(|e| ProxyError::Rng(e.to_string()))?;

    let request = format!("AUTHCHALLENGE SAFECOOKIE {}", hex::encode(client_nonce));
    codec::write_line(writer, request.as_bytes()).await?;

    let raw = reader
        .read_line()
        .await?
        .ok_or_else(|| auth_parse("AUTHCHALLENGE", "stream closed before reply"))?;
    let line = std::str::from_utf8(codec::trim_line(raw))
        .map_err(|_| auth_parse("AUTHCHALLENGE", "reply is not valid UTF-8"))?;
    let (server_hash, server_nonce) = parse_authchallenge(line)?;

    let expected = keyed_hash(SERVER_HASH_KEY, cookie, &client_nonce, &server_nonce);
    if !constant_time_eq(&expected, &server_hash) {
        return Err(ProxyError::ServerHashMismatch);
    }

    Ok(Zeroizing::new(keyed_hash(
        CLIENT_HASH_KEY,
        cookie,
        &client_nonce,
        &server_nonce,
    )))
}

/// Parse a `250 AUTHCHALLENGE SERVERHASH=<hex> SERVERNONCE=<hex>` reply.
///
/// Both field prefixes must be literally present, in that order, space
/// separated; hex decoding rejects odd lengths and non-hex bytes.
fn parse_authchallenge(line: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let rest = line
        .strip_prefix("250 AUTHCHALLENGE ")
        .ok_or_else(|| auth_parse("AUTHCHALLENGE", format!("unexpected reply: {line}")))?;
    let (hash_word, nonce_word) = rest
        .split_once(' ')
        .ok_or_else(|| auth_parse("AUTHCHALLENGE", "missing SERVERNONCE field"))?;
    let server_hash = decode_hex_field(hash_word, "SERVERHASH=")?;
    let server_nonce = decode_hex_field(nonce_word, "SERVERNONCE=")?;
    Ok((server_hash, server_nonce))
}

fn decode_hex_field(word: &str, prefix: &'static str) -> Result<Vec<u8>> {
    let hex_str = word
        .strip_prefix(prefix)
        .ok_or_else(|| auth_parse("AUTHCHALLENGE", format!("missing {prefix} field")))?;
    hex::decode(hex_str)
        .map_err(|e| auth_parse("AUTHCHALLENGE", format!("bad hex after {prefix}: {e}")))
}

/// HMAC-SHA-256 over `cookie || client_nonce || server_nonce`.
fn keyed_hash(key: &[u8], cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("Hmac allows keys of any size");
    mac.update(cookie);
    mac.update(client_nonce);
    mac.update(server_nonce);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison; a length mismatch is an early (and
/// non-secret) reject.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn auth_parse(reply: &'static str, detail: impl Into<String>) -> ProxyError {
    ProxyError::AuthParse {
        reply,
        detail: detail.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn read_wire_line(stream: &mut DuplexStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = stream.read(&mut byte).await.unwrap();
            if n == 0 {
                break;
            }
            line.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }
        String::from_utf8(line).unwrap()
    }

    /// Run `authenticate` against a scripted daemon side.
    async fn drive<F, Fut>(daemon: F) -> Result<()>
    where
        F: FnOnce(DuplexStream) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (upstream, far) = duplex(4096);
        let stub = tokio::spawn(daemon(far));
        let (read, mut write) = tokio::io::split(upstream);
        let mut reader = LineReader::new(read);
        let result = authenticate(&mut reader, &mut write).await;
        // Close our side so a stub waiting on EOF can finish.
        drop(reader);
        drop(write);
        stub.await.unwrap();
        result
    }

    #[test]
    fn test_absorb_auth_line_methods_and_cookie() {
        let mut context = AuthContext::default();
        absorb_auth_line(
            &mut context,
            "250-AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE=\"/run/tor/control.authcookie\"",
        );
        assert!(!context.can_null);
        assert!(context.can_cookie);
        assert!(context.can_safecookie);
        assert_eq!(
            context.cookie_path.as_deref(),
            Some("/run/tor/control.authcookie")
        );
    }

    #[test]
    fn test_absorb_auth_line_tolerates_oddities() {
        let mut context = AuthContext::default();
        absorb_auth_line(&mut context, "250-AUTH");
        assert_eq!(context, AuthContext::default());

        absorb_auth_line(&mut context, "250-AUTH VERSION=1");
        assert_eq!(context, AuthContext::default());

        // Unquotable cookie path: methods stick, path does not.
        absorb_auth_line(&mut context, "250-AUTH METHODS=COOKIE COOKIEFILE=bare");
        assert!(context.can_cookie);
        assert!(context.cookie_path.is_none());
    }

    #[test]
    fn test_choose_prefers_null() {
        let context = AuthContext {
            can_null: true,
            can_cookie: true,
            can_safecookie: true,
            cookie_path: Some("/c".to_string()),
        };
        assert_eq!(context.choose(), Some(Method::Null));
    }

    #[test]
    fn test_choose_prefers_safecookie_over_cookie() {
        let context = AuthContext {
            can_null: false,
            can_cookie: true,
            can_safecookie: true,
            cookie_path: Some("/c".to_string()),
        };
        assert_eq!(context.choose(), Some(Method::SafeCookie("/c".to_string())));
    }

    #[test]
    fn test_choose_cookie_without_path_is_unusable() {
        let context = AuthContext {
            can_null: false,
            can_cookie: true,
            can_safecookie: true,
            cookie_path: None,
        };
        assert_eq!(context.choose(), None);
    }

    #[test]
    fn test_parse_authchallenge_field_order_is_enforced() {
        let hash = "aa".repeat(32);
        let nonce = "bb".repeat(32);
        let line = format!("250 AUTHCHALLENGE SERVERNONCE={nonce} SERVERHASH={hash}");
        assert!(parse_authchallenge(&line).is_err());
    }

    #[test]
    fn test_parse_authchallenge_rejects_bad_hex() {
        let err = parse_authchallenge("250 AUTHCHALLENGE SERVERHASH=xyz SERVERNONCE=aabb")
            .unwrap_err();
        assert!(matches!(err, ProxyError::AuthParse { .. }));
        // Odd length.
        let err = parse_authchallenge("250 AUTHCHALLENGE SERVERHASH=abc SERVERNONCE=aabb")
            .unwrap_err();
        assert!(matches!(err, ProxyError::AuthParse { .. }));
    }

    #[test]
    fn test_keyed_hash_keys_are_separated() {
        let cookie = [0x41u8; 32];
        let client_nonce = [1u8; 32];
        let server_nonce = [2u8; 32];
        let server = keyed_hash(SERVER_HASH_KEY, &cookie, &client_nonce, &server_nonce);
        let client = keyed_hash(CLIENT_HASH_KEY, &cookie, &client_nonce, &server_nonce);
        assert_eq!(server.len(), 32);
        assert_ne!(server, client);
    }

    #[tokio::test]
    async fn test_null_auth_sends_bare_authenticate() {
        let result = drive(move |mut stream| async move {
            assert_eq!(read_wire_line(&mut stream).await, "PROTOCOLINFO\n");
            stream
                .write_all(
                    b"250-PROTOCOLINFO 1\r\n250-AUTH METHODS=NULL,COOKIE,SAFECOOKIE COOKIEFILE=\"/c\"\r\n250-VERSION Tor=\"0.4.8.9\"\r\n250 OK\r\n",
                )
                .await
                .unwrap();
            assert_eq!(read_wire_line(&mut stream).await, "AUTHENTICATE\n");
            stream.write_all(b"250 OK\r\n").await.unwrap();
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cookie_auth_sends_hex_cookie() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x41u8; 32]).unwrap();
        let path = cookie::quote(file.path().to_str().unwrap());

        let result = drive(move |mut stream| async move {
            assert_eq!(read_wire_line(&mut stream).await, "PROTOCOLINFO\n");
            let auth_line = format!("250-AUTH METHODS=COOKIE COOKIEFILE={path}\r\n250 OK\r\n");
            stream.write_all(auth_line.as_bytes()).await.unwrap();
            let line = read_wire_line(&mut stream).await;
            assert_eq!(line, format!("AUTHENTICATE {}\n", "41".repeat(32)));
            stream.write_all(b"250 OK\r\n").await.unwrap();
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_safecookie_handshake_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x41u8; 32]).unwrap();
        let path = cookie::quote(file.path().to_str().unwrap());

        let result = drive(move |mut stream| async move {
            assert_eq!(read_wire_line(&mut stream).await, "PROTOCOLINFO\n");
            let auth_line =
                format!("250-AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE={path}\r\n250 OK\r\n");
            stream.write_all(auth_line.as_bytes()).await.unwrap();

            let challenge = read_wire_line(&mut stream).await;
            let nonce_hex = challenge
                .trim_end()
                .strip_prefix("AUTHCHALLENGE SAFECOOKIE ")
                .unwrap();
            let client_nonce = hex::decode(nonce_hex).unwrap();
            assert_eq!(client_nonce.len(), 32);

            // Independently computed daemon-side hashes.
            let cookie = [0x41u8; 32];
            let server_nonce = [0x42u8; 32];
            let mut mac = HmacSha256::new_from_slice(SERVER_HASH_KEY).unwrap();
            mac.update(&cookie);
            mac.update(&client_nonce);
            mac.update(&server_nonce);
            let server_hash = mac.finalize().into_bytes();

            let reply = format!(
                "250 AUTHCHALLENGE SERVERHASH={} SERVERNONCE={}\r\n",
                hex::encode(server_hash),
                hex::encode(server_nonce)
            );
            stream.write_all(reply.as_bytes()).await.unwrap();

            let auth = read_wire_line(&mut stream).await;
            let client_hash_hex = auth.trim_end().strip_prefix("AUTHENTICATE ").unwrap();
            let mut mac = HmacSha256::new_from_slice(CLIENT_HASH_KEY).unwrap();
            mac.update(&cookie);
            mac.update(&client_nonce);
            mac.update(&server_nonce);
            let expected_client_hash = mac.finalize().into_bytes();
            assert_eq!(client_hash_hex, hex::encode(expected_client_hash));

            stream.write_all(b"250 OK\r\n").await.unwrap();
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_safecookie_bad_server_hash_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x41u8; 32]).unwrap();
        let path = cookie::quote(file.path().to_str().unwrap());

        let result = drive(move |mut stream| async move {
            assert_eq!(read_wire_line(&mut stream).await, "PROTOCOLINFO\n");
            let auth_line = format!("250-AUTH METHODS=SAFECOOKIE COOKIEFILE={path}\r\n250 OK\r\n");
            stream.write_all(auth_line.as_bytes()).await.unwrap();

            let _ = read_wire_line(&mut stream).await;
            let reply = format!(
                "250 AUTHCHALLENGE SERVERHASH={} SERVERNONCE={}\r\n",
                "00".repeat(32),
                "42".repeat(32)
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
            // The proxy hangs up without sending AUTHENTICATE.
            assert_eq!(read_wire_line(&mut stream).await, "");
        })
        .await;
        assert!(matches!(result, Err(ProxyError::ServerHashMismatch)));
    }

    #[tokio::test]
    async fn test_no_usable_method_is_fatal() {
        let result = drive(move |mut stream| async move {
            assert_eq!(read_wire_line(&mut stream).await, "PROTOCOLINFO\n");
            stream
                .write_all(b"250-AUTH METHODS=HASHEDPASSWORD\r\n250 OK\r\n")
                .await
                .unwrap();
            assert_eq!(read_wire_line(&mut stream).await, "");
        })
        .await;
        assert!(matches!(result, Err(ProxyError::AuthMethodUnavailable)));
    }

    #[tokio::test]
    async fn test_non_250_protocolinfo_line_is_fatal() {
        let result = drive(move |mut stream| async move {
            assert_eq!(read_wire_line(&mut stream).await, "PROTOCOLINFO\n");
            stream.write_all(b"510 Unrecognized command\r\n").await.unwrap();
            assert_eq!(read_wire_line(&mut stream).await, "");
        })
        .await;
        assert!(matches!(result, Err(ProxyError::AuthParse { .. })));
    }

    #[tokio::test]
    async fn test_authenticate_rejection_is_fatal() {
        let result = drive(move |mut stream| async move {
            assert_eq!(read_wire_line(&mut stream).await, "PROTOCOLINFO\n");
            stream
                .write_all(b"250-AUTH METHODS=NULL\r\n250 OK\r\n")
                .await
                .unwrap();
            assert_eq!(read_wire_line(&mut stream).await, "AUTHENTICATE\n");
            stream
                .write_all(b"515 Authentication failed\r\n")
                .await
                .unwrap();
        })
        .await;
        assert!(matches!(result, Err(ProxyError::AuthRejected(_))));
    }
}
