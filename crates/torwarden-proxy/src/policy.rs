//! The filter policy: an immutable ruleset consulted for every proxied line.
//!
//! A [`Policy`] carries four kinds of rule per direction: exact allows,
//! prefix allows, exact replacements, and prefix replacements. Evaluation
//! order is fixed and the first match wins:
//!
//! 1. Prefix replacement
//! 2. Exact replacement
//! 3. Exact allow
//! 4. Prefix allow
//! 5. Deny
//!
//! Replacements are active rewrites the operator configured to correct
//! specific daemon behavior (a bind address string, say); evaluating them
//! first keeps a broad prefix-allow rule from shadowing them.
//!
//! The policy is built once at startup from a [`PolicyDoc`] and handed to
//! every session by shared reference; it is never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Which half-duplex stream a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client (application) to the daemon's control port.
    ClientToUpstream,
    /// The daemon's control port back to the client.
    UpstreamToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToUpstream => write!(f, "client->upstream"),
            Direction::UpstreamToClient => write!(f, "upstream->client"),
        }
    }
}

/// The filter's decision for a single semantic line.
///
/// `PassThrough` carries no payload: the pump that asked for the verdict
/// already holds the line bytes, and keeping them out of the variant
/// avoids copying every forwarded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the line unchanged.
    PassThrough,
    /// Forward the substitute line instead (the entire line is replaced).
    Replace(String),
    /// Forward nothing; the session synthesizes a soft denial.
    Deny,
}

impl Verdict {
    /// Whether the verdict is a denial.
    #[must_use]
    pub fn is_deny(&self) -> bool {
        matches!(self, Verdict::Deny)
    }
}

/// The declarative policy document, as it appears on disk.
///
/// All eight collections default to empty, so `{}` is a valid (deny
/// everything) policy. The two replacement maps are ordered; when prefix
/// rules overlap, the lexicographically first prefix wins, stably across
/// runs. Overlapping prefixes are a configuration smell the operator
/// should avoid rather than rely on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PolicyDoc {
    /// Exact client lines that pass through unchanged.
    pub client_allowed: Vec<String>,
    /// Client lines starting with any of these pass through unchanged.
    pub client_allowed_prefixes: Vec<String>,
    /// Exact client line -> substitute line.
    pub client_replacements: BTreeMap<String, String>,
    /// Client line prefix -> substitute for the whole line.
    pub client_replacement_prefixes: BTreeMap<String, String>,

    /// Exact daemon lines that pass through unchanged.
    pub server_allowed: Vec<String>,
    /// Daemon lines starting with any of these pass through unchanged.
    pub server_allowed_prefixes: Vec<String>,
    /// Exact daemon line -> substitute line.
    pub server_replacements: BTreeMap<String, String>,
    /// Daemon line prefix -> substitute for the whole line.
    pub server_replacement_prefixes: BTreeMap<String, String>,
}

/// One direction's worth of compiled rules.
#[derive(Debug, Default)]
struct DirectionRules {
    allowed: HashSet<String>,
    allowed_prefixes: Vec<String>,
    replacements: BTreeMap<String, String>,
    replacement_prefixes: BTreeMap<String, String>,
}

impl DirectionRules {
    fn compile(
        allowed: Vec<String>,
        allowed_prefixes: Vec<String>,
        replacements: BTreeMap<String, String>,
        replacement_prefixes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            allowed_prefixes,
            replacements,
            replacement_prefixes,
        }
    }

    fn evaluate(&self, line: &str) -> Verdict {
        for (prefix, replacement) in &self.replacement_prefixes {
            if line.starts_with(prefix.as_str()) {
                return Verdict::Replace(replacement.clone());
            }
        }
        if let Some(replacement) = self.replacements.get(line) {
            return Verdict::Replace(replacement.clone());
        }
        if self.allowed.contains(line) {
            return Verdict::PassThrough;
        }
        if self
            .allowed_prefixes
            .iter()
            .any(|prefix| line.starts_with(prefix.as_str()))
        {
            return Verdict::PassThrough;
        }
        Verdict::Deny
    }
}

/// The compiled, immutable filter policy.
#[derive(Debug)]
pub struct Policy {
    client: DirectionRules,
    server: DirectionRules,
}

impl Policy {
    /// Compile a policy document into its evaluable form.
    #[must_use]
    pub fn from_doc(doc: PolicyDoc) -> Self {
        Self {
            client: DirectionRules::compile(
                doc.client_allowed,
                doc.client_allowed_prefixes,
                doc.client_replacements,
                doc.client_replacement_prefixes,
            ),
            server: DirectionRules::compile(
                doc.server_allowed,
                doc.server_allowed_prefixes,
                doc.server_replacements,
                doc.server_replacement_prefixes,
            ),
        }
    }

    /// Evaluate one semantic line against the rules for `direction`.
    #[must_use]
    pub fn evaluate(&self, direction: Direction, line: &str) -> Verdict {
        match direction {
            Direction::ClientToUpstream => self.client.evaluate(line),
            Direction::UpstreamToClient => self.server.evaluate(line),
        }
    }
}
