//! Sign-protocol (v2) connector: one relay per user, many topics.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::relay::{RelayEvents, RelayV2, V2RelayParts};
use crate::session::{SessionKey, V2SessionData};
use wcb_protocol::{ChainRef, ProtocolVersion, RelayInbound, SettledNamespaces};

use super::{Connector, ConnectorEvent, EventSink, SessionInfo, chain_from_caip};

/// Connector multiplexing every v2 session of one user over a shared relay
/// instance. Pairings add topics; disconnects remove them; the connector
/// itself outlives individual sessions.
pub struct V2Connector {
    user_id: String,
    relay: Arc<dyn RelayV2>,
    sessions: DashMap<SessionKey, V2SessionData>,
    sink: EventSink,
}

impl V2Connector {
    pub fn new(user_id: impl Into<String>, parts: V2RelayParts, sink: EventSink) -> Arc<Self> {
        let connector = Arc::new(Self {
            user_id: user_id.into(),
            relay: parts.client,
            sessions: DashMap::new(),
            sink,
        });
        connector.clone().spawn_pump(parts.events);
        connector
    }

    /// Starts pairing against a scanned URI. The resulting proposal arrives
    /// asynchronously as a [`ConnectorEvent::Proposal`].
    pub async fn pair(&self, uri: &str) -> Result<()> {
        self.relay.pair(uri).await
    }

    /// Approves a proposal with the settled namespaces, returning the topic
    /// the session will live under.
    pub async fn approve_session(
        &self,
        proposal_id: u64,
        namespaces: SettledNamespaces,
    ) -> Result<String> {
        self.relay.approve_session(proposal_id, namespaces).await
    }

    pub async fn reject_session(
        &self,
        proposal_id: u64,
        proposer_public_key: &str,
        reason: &str,
    ) -> Result<()> {
        self.relay
            .reject_session(proposal_id, proposer_public_key, reason)
            .await
    }

    /// Registers a settled (or recovered) session topic with this connector.
    pub fn attach_session(&self, key: SessionKey, session: V2SessionData) {
        self.sessions.insert(key, session);
    }

    /// Forgets a topic. Safe to call for topics never attached.
    pub fn detach_session(&self, key: &SessionKey) -> Option<V2SessionData> {
        self.sessions.remove(key).map(|(_, session)| session)
    }

    pub fn session(&self, key: &SessionKey) -> Option<V2SessionData> {
        self.sessions.get(key).map(|entry| entry.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn emit(&self, event: ConnectorEvent) {
        if self.sink.send(event).is_err() {
            debug!(target: "wcb.connector", user_id = %self.user_id, "event sink closed");
        }
    }

    fn spawn_pump(self: Arc<Self>, mut events: RelayEvents) {
        tokio::spawn(async move {
            while let Some(inbound) = events.recv().await {
                self.on_inbound(inbound);
            }
            debug!(target: "wcb.connector", user_id = %self.user_id, "v2 relay event stream closed");
        });
    }

    fn on_inbound(&self, inbound: RelayInbound) {
        match inbound {
            RelayInbound::SessionProposal { proposal } => self.emit(ConnectorEvent::Proposal {
                user_id: self.user_id.clone(),
                proposal,
            }),
            RelayInbound::Request {
                id,
                topic,
                chain_id,
                method,
                params,
            } => {
                let Some(topic) = topic else {
                    warn!(target: "wcb.connector", user_id = %self.user_id, %method, "request without topic");
                    return;
                };
                match wcb_protocol::normalize(&method, &params) {
                    Ok(request) => self.emit(ConnectorEvent::Request {
                        user_id: self.user_id.clone(),
                        peer_id: topic,
                        request_id: id,
                        chain: chain_id.as_deref().and_then(chain_from_caip),
                        request,
                    }),
                    Err(err) => {
                        warn!(target: "wcb.connector", user_id = %self.user_id, %method, %err, "dropping unparseable request");
                        self.emit(ConnectorEvent::Error {
                            user_id: self.user_id.clone(),
                            message: format!("failed to parse {method} request"),
                            cause: Some(err.to_string()),
                        });
                    }
                }
            }
            RelayInbound::Ping { topic } => self.emit(ConnectorEvent::Ping {
                user_id: self.user_id.clone(),
                peer_id: topic,
            }),
            RelayInbound::Disconnected { topic } => {
                if let Some(topic) = &topic {
                    self.detach_session(&SessionKey::derive(topic));
                }
                self.emit(ConnectorEvent::Disconnected {
                    user_id: self.user_id.clone(),
                    peer_id: topic,
                });
            }
            RelayInbound::TransportError { message } => self.emit(ConnectorEvent::Error {
                user_id: self.user_id.clone(),
                message,
                cause: None,
            }),
        }
    }
}

#[async_trait]
impl Connector for V2Connector {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V2
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn connected(&self) -> bool {
        // v2 relay clients reconnect transparently; the connector stays
        // usable as long as it exists.
        true
    }

    fn describe_session(&self, key: &SessionKey) -> Option<SessionInfo> {
        self.sessions.get(key).map(|session| SessionInfo {
            version: ProtocolVersion::V2,
            peer_meta: session.peer_meta.clone(),
            chain_id: session.chain_id.clone(),
        })
    }

    async fn approve(&self, peer_id: &str, request_id: u64, result: Value) -> Result<()> {
        self.relay.approve_request(peer_id, request_id, result).await
    }

    async fn reject(&self, peer_id: &str, request_id: u64, error: Value) -> Result<()> {
        self.relay.reject_request(peer_id, request_id, error).await
    }

    async fn set_active_chain(
        &self,
        peer_id: &str,
        _accounts: Vec<String>,
        chain: &ChainRef,
    ) -> Result<()> {
        // No wire traffic: v2 peers scope each request with its own chain.
        // The observation is recorded for display only.
        if let Some(mut session) = self.sessions.get_mut(&SessionKey::derive(peer_id)) {
            session.chain_id = chain.clone();
        }
        Ok(())
    }

    async fn disconnect(&self, peer_id: &str) {
        self.detach_session(&SessionKey::derive(peer_id));
        if let Err(err) = self.relay.disconnect(peer_id, "User disconnected").await {
            warn!(target: "wcb.connector", user_id = %self.user_id, %err, "disconnect failed");
            self.emit(ConnectorEvent::Error {
                user_id: self.user_id.clone(),
                message: "failed to close session".into(),
                cause: Some(err.to_string()),
            });
        }
    }
}
