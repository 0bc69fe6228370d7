//! Relay transport contracts.
//!
//! The pairing/relay protocol stack (encryption, relay websockets, JSON-RPC
//! framing) lives behind these traits. The core only requires that a relay
//! client can perform handshake/approval operations and push decoded inbound
//! traffic through an event channel. Each relay instance splits into a
//! shareable command half and a single-consumer event half, consumed by the
//! connector pump.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::session::V1SessionData;
use wcb_protocol::{ChainRef, RelayInbound, SettledNamespaces};

/// Metadata advertised to peers during pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
}

/// Decoded inbound relay traffic for one relay instance.
pub type RelayEvents = mpsc::UnboundedReceiver<RelayInbound>;

/// Sender half used by relay implementations (and test doubles) to inject
/// inbound traffic.
pub type RelaySink = mpsc::UnboundedSender<RelayInbound>;

/// Command half of a legacy (v1) relay client. One instance per dApp session.
#[async_trait]
pub trait RelayV1: Send + Sync {
    /// The pairing topic this relay was built from, stable across
    /// reconnects to the same pairing.
    fn key(&self) -> &str;

    /// Whether the underlying session handshake has already settled.
    fn connected(&self) -> bool;

    /// Performs the session handshake, offering the given accounts and
    /// chain, and resolves with the settled session once the peer approves.
    async fn create_session(&self, accounts: Vec<String>, chain: &ChainRef) -> Result<V1SessionData>;

    async fn approve_request(&self, request_id: u64, result: Value) -> Result<()>;
    async fn reject_request(&self, request_id: u64, error: Value) -> Result<()>;

    /// Broadcasts a session update (chain or account change) to the peer.
    async fn update_session(&self, accounts: Vec<String>, chain: &ChainRef) -> Result<()>;

    async fn kill_session(&self) -> Result<()>;
}

/// Command half of a Sign-protocol (v2) relay client. One instance per user,
/// multiplexing any number of pairings and settled topics.
#[async_trait]
pub trait RelayV2: Send + Sync {
    /// Initiates pairing from a `wc:` URI; the resulting session proposal
    /// arrives through the event channel.
    async fn pair(&self, uri: &str) -> Result<()>;

    /// Approves a session proposal with the settled namespaces and returns
    /// the new session topic.
    async fn approve_session(&self, proposal_id: u64, namespaces: SettledNamespaces)
    -> Result<String>;

    async fn reject_session(&self, proposal_id: u64, proposer_public_key: &str, reason: &str)
    -> Result<()>;

    async fn approve_request(&self, topic: &str, request_id: u64, result: Value) -> Result<()>;
    async fn reject_request(&self, topic: &str, request_id: u64, error: Value) -> Result<()>;

    async fn disconnect(&self, topic: &str, reason: &str) -> Result<()>;
}

/// A v1 relay split into its command and event halves.
pub struct V1RelayParts {
    pub client: Arc<dyn RelayV1>,
    pub events: RelayEvents,
}

/// A v2 relay split into its command and event halves.
pub struct V2RelayParts {
    pub client: Arc<dyn RelayV2>,
    pub events: RelayEvents,
}

/// Builds relay clients. The factory owns transport configuration (project
/// credentials, storage paths, client metadata) so callers only supply the
/// session-specific inputs.
#[async_trait]
pub trait RelayFactory: Send + Sync {
    /// New v1 relay from a freshly scanned pairing URI.
    async fn v1_from_uri(&self, uri: &str) -> Result<V1RelayParts>;

    /// Rebuilds a v1 relay from a persisted session snapshot.
    async fn v1_resume(&self, session: &V1SessionData) -> Result<V1RelayParts>;

    /// V2 relay for the given user. Called at most once per user; the
    /// connector layer reuses the instance across pairings.
    async fn v2_for_user(&self, user_id: &str) -> Result<V2RelayParts>;
}
