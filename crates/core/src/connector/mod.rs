//! Session connectors.
//!
//! A connector owns the relay client(s) for one protocol version and pumps
//! decoded relay traffic into the events handler as [`ConnectorEvent`]s.
//! Version 1 connectors hold exactly one dApp session; version 2 connectors
//! multiplex every settled topic of a user over a single relay instance.

mod v1;
mod v2;

pub use v1::V1Connector;
pub use v2::V2Connector;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::session::{SessionKey, V1SessionData};
use wcb_protocol::{
    CaipChainId, ChainRef, NormalizedRequest, PeerMetadata, ProtocolVersion, SessionProposal,
};

/// Normalized connector output consumed by the events handler.
#[derive(Debug)]
pub enum ConnectorEvent {
    /// A v2 session proposal awaiting namespace validation.
    Proposal {
        user_id: String,
        proposal: SessionProposal,
    },
    /// A v1 handshake settled into a live session.
    Connected {
        user_id: String,
        session: V1SessionData,
        handle: ConnectorHandle,
    },
    /// An inbound dApp request, already normalized.
    Request {
        user_id: String,
        peer_id: String,
        request_id: u64,
        /// Chain scope the request arrived under, when the wire carried one.
        chain: Option<ChainRef>,
        request: NormalizedRequest,
    },
    Ping {
        user_id: String,
        peer_id: String,
    },
    /// Peer-side or transport-side session teardown.
    Disconnected {
        user_id: String,
        peer_id: Option<String>,
    },
    /// A fault scoped to one connector; the session itself may survive.
    Error {
        user_id: String,
        message: String,
        cause: Option<String>,
    },
}

/// Sender half of the handler's event queue.
pub type EventSink = mpsc::UnboundedSender<ConnectorEvent>;

/// Peer-facing view of one live session, for display and persistence.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub version: ProtocolVersion,
    pub peer_meta: PeerMetadata,
    pub chain_id: ChainRef,
}

/// Version-independent operations on a live connector. `peer_id` is the
/// v1 peer id or the v2 session topic, depending on the implementation.
#[async_trait]
pub trait Connector: Send + Sync {
    fn version(&self) -> ProtocolVersion;
    fn user_id(&self) -> &str;
    fn connected(&self) -> bool;
    fn describe_session(&self, key: &SessionKey) -> Option<SessionInfo>;

    async fn approve(&self, peer_id: &str, request_id: u64, result: Value) -> Result<()>;
    async fn reject(&self, peer_id: &str, request_id: u64, error: Value) -> Result<()>;

    /// Moves the session's active chain. V1 broadcasts a session update to
    /// the peer; v2 merely records the observation.
    async fn set_active_chain(
        &self,
        peer_id: &str,
        accounts: Vec<String>,
        chain: &ChainRef,
    ) -> Result<()>;

    /// Best-effort session teardown. Transport failures are reported through
    /// the event sink, never returned.
    async fn disconnect(&self, peer_id: &str);
}

/// Shared handle to a live connector, stored in the session registry.
#[derive(Clone)]
pub enum ConnectorHandle {
    V1(Arc<V1Connector>),
    V2(Arc<V2Connector>),
}

impl ConnectorHandle {
    pub fn as_connector(&self) -> &dyn Connector {
        match self {
            Self::V1(c) => c.as_ref(),
            Self::V2(c) => c.as_ref(),
        }
    }

    pub fn as_v2(&self) -> Option<&Arc<V2Connector>> {
        match self {
            Self::V2(c) => Some(c),
            Self::V1(_) => None,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.as_connector().version()
    }
}

impl std::fmt::Debug for ConnectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1(c) => f.debug_tuple("V1").field(&c.user_id()).finish(),
            Self::V2(c) => f.debug_tuple("V2").field(&c.user_id()).finish(),
        }
    }
}

/// Extracts the chain out of a CAIP-2 scope, e.g. `eip155:137`.
/// Bare tokens (v1 relays send plain ids) coerce directly.
pub(crate) fn chain_from_caip(scope: &str) -> Option<ChainRef> {
    CaipChainId::parse(scope).ok().map(|caip| caip.reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caip_scope_yields_numeric_chain() {
        assert_eq!(chain_from_caip("eip155:137"), Some(ChainRef::Id(137)));
    }

    #[test]
    fn bare_token_coerces() {
        assert_eq!(chain_from_caip("5"), Some(ChainRef::Id(5)));
        assert_eq!(
            chain_from_caip("solana"),
            Some(ChainRef::Name("solana".into()))
        );
        assert_eq!(chain_from_caip(""), None);
    }
}
