//! Audit logging for filter decisions.
//!
//! Decisions are logged with structured fields via `tracing` under the
//! `torwarden_proxy::audit` target. Line contents can carry sensitive
//! material (addresses, identity keys) and appear only at `trace` level,
//! which is unsafe to enable outside of debugging. Cookies, nonces, and
//! derived hashes are never logged at any level.

use crate::policy::{Direction, Verdict};
use tracing::{debug, info, trace};

/// Log the verdict for one filtered line.
pub fn log_verdict(direction: Direction, line: &str, verdict: &Verdict) {
    match verdict {
        Verdict::PassThrough => {
            debug!(
                target: "torwarden_proxy::audit",
                direction = %direction,
                decision = "pass",
                "control line forwarded"
            );
            trace!(
                target: "torwarden_proxy::audit",
                direction = %direction,
                line = line,
                "forwarded line"
            );
        }
        Verdict::Replace(replacement) => {
            info!(
                target: "torwarden_proxy::audit",
                direction = %direction,
                decision = "replace",
                "control line rewritten"
            );
            trace!(
                target: "torwarden_proxy::audit",
                direction = %direction,
                line = line,
                replacement = replacement.as_str(),
                "rewritten line"
            );
        }
        Verdict::Deny => {
            info!(
                target: "torwarden_proxy::audit",
                direction = %direction,
                decision = "deny",
                "control line denied"
            );
            trace!(
                target: "torwarden_proxy::audit",
                direction = %direction,
                line = line,
                "denied line"
            );
        }
    }
}
