//! Session data model: live sessions, durable records, pending requests.

use serde::{Deserialize, Serialize};
use std::fmt;

use wcb_protocol::{ChainRef, PeerMetadata, ProtocolVersion, RequestKind, RequestPayload};

/// Opaque identifier of the wallet owner. One user may hold many sessions.
pub type UserId = String;

/// Soft cap on live sessions a single user may hold.
pub const MAX_SESSIONS_PER_USER: usize = 5;

/// Peer/topic identifiers longer than this are truncated for local keying.
const KEY_FULL_LENGTH_MAX: usize = 60;
/// Number of trailing characters kept when truncating.
const KEY_TAIL_LENGTH: usize = 32;

/// Local session lookup key derived from the protocol peer/topic identifier.
///
/// Identifiers longer than 60 characters are collapsed to their trailing 32
/// characters; shorter ones are used verbatim. Two live sessions of one user
/// whose identifiers share a 32-character tail would alias onto the same
/// key; full-length identifiers keep enough entropy in the tail for this
/// not to matter in practice. The derivation is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn derive(peer_id: &str) -> Self {
        let count = peer_id.chars().count();
        if count > KEY_FULL_LENGTH_MAX {
            Self(peer_id.chars().skip(count - KEY_TAIL_LENGTH).collect())
        } else {
            Self(peer_id.to_string())
        }
    }

    /// Synthetic per-user key under which a v2 connector lives before its
    /// first settled session (and alongside them afterwards).
    pub fn placeholder(user_id: &str) -> Self {
        Self(format!("0_{user_id}"))
    }

    pub fn is_placeholder_for(&self, user_id: &str) -> bool {
        self.0 == format!("0_{user_id}")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-session state of a v1 (bridge-relayed) connection.
///
/// Carries everything the relay client needs to resume the session after a
/// restart without re-running the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1SessionData {
    pub peer_id: String,
    pub peer_meta: PeerMetadata,
    pub chain_id: ChainRef,
    pub accounts: Vec<String>,
    /// Relay client key identifying the pairing; used to detect reconnects
    /// to an already-persisted session before pairing again.
    pub key: String,
    /// Opaque relay resume blob (bridge URL, symmetric key, client ids).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub resume: serde_json::Value,
}

/// Per-session state of a v2 (pairing-topic) connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V2SessionData {
    pub topic: String,
    pub peer_meta: PeerMetadata,
    pub chain_id: ChainRef,
}

/// Tagged union over the two per-version session shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "snake_case")]
pub enum SessionState {
    V1(V1SessionData),
    V2(V2SessionData),
}

impl SessionState {
    pub fn version(&self) -> ProtocolVersion {
        match self {
            Self::V1(_) => ProtocolVersion::V1,
            Self::V2(_) => ProtocolVersion::V2,
        }
    }

    pub fn peer_id(&self) -> &str {
        match self {
            Self::V1(s) => &s.peer_id,
            Self::V2(s) => &s.topic,
        }
    }

    pub fn peer_meta(&self) -> &PeerMetadata {
        match self {
            Self::V1(s) => &s.peer_meta,
            Self::V2(s) => &s.peer_meta,
        }
    }

    pub fn chain_id(&self) -> &ChainRef {
        match self {
            Self::V1(s) => &s.chain_id,
            Self::V2(s) => &s.chain_id,
        }
    }
}

/// Durable session record owned by the persistence gateway.
///
/// Field names mirror the wire/storage document shape (camelCase) so records
/// written by earlier deployments keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: UserId,
    /// Full-length peer/topic identifier (records are keyed by this).
    pub peer_id: String,
    /// dApp URL, used for same-dApp replacement on re-pairing.
    pub url: String,
    pub version: ProtocolVersion,
    pub session: SessionState,
    /// Creation time, unix milliseconds.
    pub date: i64,
    /// Connector key (v1 pairing key, v2 settled topic).
    pub key: String,
}

impl SessionRecord {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::derive(&self.peer_id)
    }
}

/// An outstanding sign/send request awaiting a decision from the signing
/// backend. Scoped by `(session_key, request_id)`; request ids are only
/// unique per session.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub request_id: u64,
    pub session_key: SessionKey,
    pub kind: RequestKind,
    pub chain_id: ChainRef,
    pub payload: RequestPayload,
    pub opened_at: i64,
}

/// Current unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
