//! Legacy (v1) connector: one relay, one dApp session.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::relay::{RelayEvents, RelayV1, V1RelayParts};
use crate::session::{SessionKey, V1SessionData};
use wcb_protocol::{ChainRef, NormalizedRequest, ProtocolVersion, RelayInbound};

use super::{Connector, ConnectorEvent, ConnectorHandle, EventSink, SessionInfo, chain_from_caip};

/// Connector for a single legacy pairing. Created fresh per scanned URI and
/// rebuilt from a persisted snapshot during recovery.
pub struct V1Connector {
    user_id: String,
    relay: Arc<dyn RelayV1>,
    session: RwLock<Option<V1SessionData>>,
    sink: EventSink,
}

impl V1Connector {
    /// Wraps the relay halves and starts pumping inbound traffic. The
    /// session stays empty until [`connect`](Self::connect) or
    /// [`attach`](Self::attach) fills it.
    pub fn new(user_id: impl Into<String>, parts: V1RelayParts, sink: EventSink) -> Arc<Self> {
        let connector = Arc::new(Self {
            user_id: user_id.into(),
            relay: parts.client,
            session: RwLock::new(None),
            sink,
        });
        connector.clone().spawn_pump(parts.events);
        connector
    }

    /// Bridge-side session identifier, stable across reconnects to the same
    /// pairing. Used to short-circuit duplicate connection attempts.
    pub fn relay_key(&self) -> &str {
        self.relay.key()
    }

    pub fn session(&self) -> Option<V1SessionData> {
        self.session.read().clone()
    }

    /// Runs the session handshake and announces the settled session through
    /// the event sink. Resolves only once the peer approves or the relay
    /// reports failure.
    pub async fn connect(
        self: &Arc<Self>,
        accounts: Vec<String>,
        chain: &ChainRef,
    ) -> Result<V1SessionData> {
        let session = self.relay.create_session(accounts, chain).await?;
        *self.session.write() = Some(session.clone());
        self.emit(ConnectorEvent::Connected {
            user_id: self.user_id.clone(),
            session: session.clone(),
            handle: ConnectorHandle::V1(self.clone()),
        });
        Ok(session)
    }

    /// Adopts an already-settled session without re-announcing it. Used by
    /// recovery, where the session was persisted on a previous run.
    pub fn attach(&self, session: V1SessionData) {
        *self.session.write() = Some(session);
    }

    fn emit(&self, event: ConnectorEvent) {
        if self.sink.send(event).is_err() {
            debug!(target: "wcb.connector", user_id = %self.user_id, "event sink closed");
        }
    }

    fn peer_id(&self) -> String {
        self.session
            .read()
            .as_ref()
            .map(|s| s.peer_id.clone())
            .unwrap_or_else(|| self.relay.key().to_string())
    }

    fn spawn_pump(self: Arc<Self>, mut events: RelayEvents) {
        tokio::spawn(async move {
            while let Some(inbound) = events.recv().await {
                self.on_inbound(inbound);
            }
            debug!(target: "wcb.connector", user_id = %self.user_id, "v1 relay event stream closed");
        });
    }

    fn on_inbound(&self, inbound: RelayInbound) {
        match inbound {
            RelayInbound::Request {
                id,
                chain_id,
                method,
                params,
                ..
            } => match wcb_protocol::normalize(&method, &params) {
                Ok(request) => self.emit_request(id, chain_id.as_deref(), request),
                Err(err) => {
                    warn!(target: "wcb.connector", user_id = %self.user_id, %method, %err, "dropping unparseable request");
                    self.emit(ConnectorEvent::Error {
                        user_id: self.user_id.clone(),
                        message: format!("failed to parse {method} request"),
                        cause: Some(err.to_string()),
                    });
                }
            },
            RelayInbound::Ping { .. } => self.emit(ConnectorEvent::Ping {
                user_id: self.user_id.clone(),
                peer_id: self.peer_id(),
            }),
            RelayInbound::Disconnected { topic } => self.emit(ConnectorEvent::Disconnected {
                user_id: self.user_id.clone(),
                peer_id: topic.or_else(|| Some(self.peer_id())),
            }),
            RelayInbound::TransportError { message } => self.emit(ConnectorEvent::Error {
                user_id: self.user_id.clone(),
                message,
                cause: None,
            }),
            // The v1 handshake settles through create_session, not a proposal.
            RelayInbound::SessionProposal { .. } => {
                debug!(target: "wcb.connector", user_id = %self.user_id, "ignoring proposal on v1 relay");
            }
        }
    }

    fn emit_request(&self, id: u64, chain_scope: Option<&str>, request: NormalizedRequest) {
        self.emit(ConnectorEvent::Request {
            user_id: self.user_id.clone(),
            peer_id: self.peer_id(),
            request_id: id,
            chain: chain_scope.and_then(chain_from_caip),
            request,
        });
    }
}

#[async_trait]
impl Connector for V1Connector {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V1
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn connected(&self) -> bool {
        self.relay.connected()
    }

    fn describe_session(&self, key: &SessionKey) -> Option<SessionInfo> {
        let guard = self.session.read();
        let session = guard.as_ref()?;
        if SessionKey::derive(&session.peer_id) != *key {
            return None;
        }
        Some(SessionInfo {
            version: ProtocolVersion::V1,
            peer_meta: session.peer_meta.clone(),
            chain_id: session.chain_id.clone(),
        })
    }

    async fn approve(&self, _peer_id: &str, request_id: u64, result: Value) -> Result<()> {
        self.relay.approve_request(request_id, result).await
    }

    async fn reject(&self, _peer_id: &str, request_id: u64, error: Value) -> Result<()> {
        self.relay.reject_request(request_id, error).await
    }

    async fn set_active_chain(
        &self,
        _peer_id: &str,
        accounts: Vec<String>,
        chain: &ChainRef,
    ) -> Result<()> {
        self.relay.update_session(accounts.clone(), chain).await?;
        if let Some(session) = self.session.write().as_mut() {
            session.chain_id = chain.clone();
            session.accounts = accounts;
        }
        Ok(())
    }

    async fn disconnect(&self, _peer_id: &str) {
        if let Err(err) = self.relay.kill_session().await {
            warn!(target: "wcb.connector", user_id = %self.user_id, %err, "kill_session failed");
            self.emit(ConnectorEvent::Error {
                user_id: self.user_id.clone(),
                message: "failed to close session".into(),
                cause: Some(err.to_string()),
            });
        }
    }
}
