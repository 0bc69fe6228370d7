//! External capability interfaces.
//!
//! The session core consumes three collaborators it never owns: the durable
//! session-record store, the user/wallet directory, and the chain signing
//! backend. All three are trait seams so embedders wire in their own
//! storage and key handling; the core only ever talks to these contracts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::session::{SessionRecord, UserId};
use wcb_protocol::ChainRef;

/// Wallet owner as resolved by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
}

/// A chain this wallet knows how to operate on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDescriptor {
    /// Internal platform name, e.g. `ether`, `solana`.
    pub name: String,
    /// Human-readable network name for display, e.g. `Ethereum Mainnet`.
    pub network_name: String,
    pub chain: ChainRef,
}

/// Filter for looking up a single session record. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub user_id: Option<UserId>,
    pub url: Option<String>,
    pub key: Option<String>,
    pub peer_id: Option<String>,
}

impl SessionFilter {
    pub fn matches(&self, record: &SessionRecord) -> bool {
        self.user_id.as_ref().is_none_or(|u| *u == record.user_id)
            && self.url.as_ref().is_none_or(|u| *u == record.url)
            && self.key.as_ref().is_none_or(|k| *k == record.key)
            && self.peer_id.as_ref().is_none_or(|p| *p == record.peer_id)
    }
}

/// Durable CRUD over session records. Records are idempotently keyed by the
/// full peer/topic identifier; upserts replace.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;
    async fn get_session(&self, filter: &SessionFilter) -> Result<Option<SessionRecord>>;
    async fn upsert_session(&self, record: &SessionRecord) -> Result<()>;
    /// Returns whether a record was actually removed.
    async fn delete_session(&self, peer_id: &str) -> Result<bool>;
    async fn count_sessions(&self, user_id: &str) -> Result<usize>;
}

/// User and chain resolution.
#[async_trait]
pub trait WalletDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<User>;
    /// Resolves a chain reference to a known chain, `None` when unsupported.
    async fn resolve_chain(&self, chain: &ChainRef) -> Result<Option<ChainDescriptor>>;
    /// Resolves the user's address on the named platform, `None` when the
    /// user holds no wallet there.
    async fn resolve_address(&self, user: &User, chain_name: &str) -> Result<Option<String>>;
}

/// Chain signing operations, performed with caller-supplied key material.
/// The core forwards canonical payloads and never inspects results.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    async fn sign_message(&self, chain_name: &str, key: &str, message: &str) -> Result<String>;
    async fn sign_typed_data(&self, chain_name: &str, key: &str, data: &Value) -> Result<String>;
    async fn sign_transaction(&self, chain_name: &str, key: &str, tx: &Value) -> Result<String>;
    async fn send_transaction(&self, chain_name: &str, key: &str, tx: &Value) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionState, V2SessionData};
    use wcb_protocol::{PeerMetadata, ProtocolVersion};

    fn record(user: &str, url: &str, peer: &str) -> SessionRecord {
        SessionRecord {
            user_id: user.into(),
            peer_id: peer.into(),
            url: url.into(),
            version: ProtocolVersion::V2,
            session: SessionState::V2(V2SessionData {
                topic: peer.into(),
                peer_meta: PeerMetadata::default(),
                chain_id: ChainRef::Id(1),
            }),
            date: 0,
            key: peer.into(),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = SessionFilter::default();
        assert!(filter.matches(&record("u1", "https://a", "p1")));
    }

    #[test]
    fn all_set_fields_must_match() {
        let filter = SessionFilter {
            user_id: Some("u1".into()),
            url: Some("https://a".into()),
            ..Default::default()
        };
        assert!(filter.matches(&record("u1", "https://a", "p1")));
        assert!(!filter.matches(&record("u1", "https://b", "p1")));
        assert!(!filter.matches(&record("u2", "https://a", "p1")));
    }
}
