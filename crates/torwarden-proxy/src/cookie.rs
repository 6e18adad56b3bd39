//! Cookie file handling for COOKIE/SAFECOOKIE authentication.
//!
//! The daemon advertises its cookie file path wire-quoted (double quotes,
//! backslash escapes). The path must be unquoted before the file is
//! opened; cookie contents are opaque key material and are wiped from
//! memory on drop.

use crate::error::{ProxyError, Result};
use zeroize::Zeroizing;

/// Decode a wire-quoted string.
///
/// Accepts a leading and trailing `"` with `\\` and `\"` escapes in
/// between. Returns `None` for anything else — a caller treats that as
/// no cookie path having been offered.
#[must_use]
pub fn unquote(quoted: &str) -> Option<String> {
    let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next()? {
                '\\' => out.push('\\'),
                '"' => out.push('"'),
                _ => return None,
            },
            '"' => return None,
            _ => out.push(c),
        }
    }
    Some(out)
}

/// Apply wire quoting. `unquote(&quote(s))` always yields `s` back.
#[must_use]
pub fn quote(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 2);
    out.push('"');
    for c in path.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Read the cookie file as opaque bytes.
pub async fn read_cookie(path: &str) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ProxyError::CookieRead {
            path: path.to_string(),
            source,
        })?;
    Ok(Zeroizing::new(bytes))
}
