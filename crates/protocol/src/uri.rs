//! Pairing URI parsing.
//!
//! Both protocol versions hand the wallet a connection string of the form
//! `wc:<topic>@<version>?key=value&...`. Only the topic and version matter to
//! this core; the query parameters (bridge URL, relay protocol, symmetric
//! key) are passed through untouched for the relay client to consume.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::methods::ParseError;

/// Wire version of a dApp connection. Immutable once a session exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl ProtocolVersion {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, ParseError> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(ParseError::UnsupportedVersion(other)),
        }
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(value: ProtocolVersion) -> Self {
        value.as_u8()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Parsed `wc:` connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    /// Topic (v2) or handshake topic (v1) embedded before the `@`.
    pub topic: String,
    pub version: ProtocolVersion,
    /// Raw query parameters, e.g. `bridge`, `key`, `relay-protocol`.
    pub params: HashMap<String, String>,
    /// The original string, forwarded verbatim to the relay client.
    pub raw: String,
}

/// Parses a dApp-supplied connection string.
///
/// Accepts `wc:<topic>@<version>` with an optional query string. Anything
/// without a numeric version is rejected, matching the wallet-side check
/// that a malformed string never reaches the relay layer.
pub fn parse_uri(input: &str) -> Result<PairingUri, ParseError> {
    let rest = input
        .strip_prefix("wc:")
        .ok_or_else(|| ParseError::MalformedUri(input.to_string()))?;

    let (head, query) = match rest.split_once('?') {
        Some((h, q)) => (h, Some(q)),
        None => (rest, None),
    };

    let (topic, version_str) = head
        .split_once('@')
        .ok_or_else(|| ParseError::MalformedUri(input.to_string()))?;

    if topic.is_empty() {
        return Err(ParseError::MalformedUri(input.to_string()));
    }

    let version: u8 = version_str
        .parse()
        .map_err(|_| ParseError::MalformedUri(input.to_string()))?;
    let version = ProtocolVersion::try_from(version)?;

    let mut params = HashMap::new();
    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((k, v)) => params.insert(k.to_string(), v.to_string()),
                None => params.insert(pair.to_string(), String::new()),
            };
        }
    }

    Ok(PairingUri {
        topic: topic.to_string(),
        version,
        params,
        raw: input.to_string(),
    })
}
