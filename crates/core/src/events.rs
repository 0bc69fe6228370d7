//! The events handler: single dispatch loop between connectors and the
//! wallet UI.
//!
//! Connector events from every live connector funnel into one unbounded
//! queue and are dispatched strictly in arrival order, so registry and
//! persistence mutations never race each other. Faults in one event are
//! converted to [`WalletEvent::Error`] and never abort the loop.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connector::{ConnectorEvent, ConnectorHandle};
use crate::error::{Error, Result};
use crate::gateway::{ChainDescriptor, PersistenceGateway, SessionFilter, WalletDirectory};
use crate::registry::{Admission, RegistryEntry, SessionRegistry};
use crate::session::{
    PendingRequest, SessionKey, SessionRecord, SessionState, V1SessionData, V2SessionData, now_ms,
};
use wcb_protocol::{
    CaipChainId, ChainRef, NormalizedRequest, PeerMetadata, ProtocolVersion, RequestKind,
    RequestPayload, SessionProposal, SettledNamespace, SettledNamespaces,
};

/// A signing decision surfaced to the wallet, carrying everything the UI
/// needs to render it and everything the bridge needs to complete it.
#[derive(Debug, Clone)]
pub struct SignRequest {
    pub user_id: String,
    pub session_key: SessionKey,
    pub peer_id: String,
    pub request_id: u64,
    pub kind: RequestKind,
    pub sign_only: bool,
    pub chain: ChainRef,
    pub chain_name: String,
    pub network_name: String,
    pub payload: RequestPayload,
    pub dapp: PeerMetadata,
    pub version: ProtocolVersion,
    /// Display rendering of the payload, transaction calldata elided.
    pub params_json: String,
}

/// Session lifecycle and request traffic surfaced to the wallet.
#[derive(Debug, Clone)]
pub enum WalletEvent {
    Connected {
        user_id: String,
        session_key: SessionKey,
        version: ProtocolVersion,
        dapp: PeerMetadata,
        chain: ChainRef,
    },
    Disconnected {
        user_id: String,
        session_key: SessionKey,
        dapp_url: Option<String>,
        dapp_name: Option<String>,
    },
    Ping {
        user_id: String,
        session_key: SessionKey,
        dapp_name: Option<String>,
        dapp_url: Option<String>,
    },
    SwitchChain {
        user_id: String,
        session_key: SessionKey,
        version: ProtocolVersion,
        chain: ChainDescriptor,
    },
    SignRequest(SignRequest),
    Error {
        user_id: String,
        message: String,
        cause: Option<String>,
    },
}

pub type WalletEvents = mpsc::UnboundedReceiver<WalletEvent>;

/// Sequential dispatcher over connector events.
pub struct EventsHandler {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) gateway: Arc<dyn PersistenceGateway>,
    pub(crate) directory: Arc<dyn WalletDirectory>,
    pub(crate) pending: DashMap<(SessionKey, u64), PendingRequest>,
    wallet_tx: mpsc::UnboundedSender<WalletEvent>,
}

impl EventsHandler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        gateway: Arc<dyn PersistenceGateway>,
        directory: Arc<dyn WalletDirectory>,
    ) -> (Arc<Self>, WalletEvents) {
        let (wallet_tx, wallet_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Self {
            registry,
            gateway,
            directory,
            pending: DashMap::new(),
            wallet_tx,
        });
        (handler, wallet_rx)
    }

    /// Drains the connector event queue until every sender is dropped.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ConnectorEvent>) {
        while let Some(event) = events.recv().await {
            let user_id = event_user(&event).to_string();
            if let Err(err) = self.dispatch(event).await {
                warn!(target: "wcb.events", user_id, %err, "event dispatch failed");
                self.emit(WalletEvent::Error {
                    user_id,
                    message: err.to_string(),
                    cause: None,
                });
            }
        }
        debug!(target: "wcb.events", "connector event queue closed");
    }

    pub(crate) fn emit(&self, event: WalletEvent) {
        if self.wallet_tx.send(event).is_err() {
            debug!(target: "wcb.events", "wallet event receiver dropped");
        }
    }

    async fn dispatch(&self, event: ConnectorEvent) -> Result<()> {
        match event {
            ConnectorEvent::Proposal { user_id, proposal } => {
                self.on_proposal(&user_id, proposal).await
            }
            ConnectorEvent::Connected {
                user_id,
                session,
                handle,
            } => self.on_v1_connected(&user_id, session, handle).await,
            ConnectorEvent::Request {
                user_id,
                peer_id,
                request_id,
                chain,
                request,
            } => {
                self.on_request(&user_id, &peer_id, request_id, chain, request)
                    .await
            }
            ConnectorEvent::Ping { user_id, peer_id } => {
                self.on_ping(&user_id, &peer_id);
                Ok(())
            }
            ConnectorEvent::Disconnected { user_id, peer_id } => {
                self.on_disconnected(&user_id, peer_id.as_deref()).await
            }
            ConnectorEvent::Error {
                user_id,
                message,
                cause,
            } => {
                self.emit(WalletEvent::Error {
                    user_id,
                    message,
                    cause,
                });
                Ok(())
            }
        }
    }

    /// Validates a v2 proposal's namespaces as a whole: every required chain
    /// must resolve and the user must hold an address on each, or the entire
    /// proposal is rejected.
    async fn on_proposal(&self, user_id: &str, proposal: SessionProposal) -> Result<()> {
        let Some(handle) = self.registry.get(user_id, None) else {
            return Err(Error::Protocol(format!(
                "proposal for user {user_id} without a live v2 connector"
            )));
        };
        let Some(connector) = handle.as_v2().cloned() else {
            return Err(Error::Protocol("proposal routed to a v1 connector".into()));
        };

        let user = self.directory.get_user(user_id).await?;
        let mut settled = SettledNamespaces::new();
        let mut first_chain: Option<ChainRef> = None;
        let mut unsupported: Option<String> = None;

        'namespaces: for (name, ns) in &proposal.required_namespaces {
            let mut accounts = Vec::new();
            for scope in &ns.chains {
                let Ok(caip) = CaipChainId::parse(scope) else {
                    unsupported = Some(scope.clone());
                    break 'namespaces;
                };
                let Some(descriptor) = self.directory.resolve_chain(&caip.reference).await? else {
                    unsupported = Some(scope.clone());
                    break 'namespaces;
                };
                let Some(address) = self
                    .directory
                    .resolve_address(&user, &descriptor.name)
                    .await?
                else {
                    unsupported = Some(scope.clone());
                    break 'namespaces;
                };
                accounts.push(format!("{scope}:{address}"));
                first_chain.get_or_insert(descriptor.chain);
            }
            settled.insert(
                name.clone(),
                SettledNamespace {
                    accounts,
                    methods: ns.methods.clone(),
                    events: ns.events.clone(),
                },
            );
        }

        if let Some(scope) = unsupported {
            connector
                .reject_session(proposal.id, &proposal.proposer_public_key, "Unsupported chains")
                .await?;
            return Err(Error::UnsupportedChain(scope));
        }
        let chain = first_chain
            .ok_or_else(|| Error::Protocol("proposal carried no chains".into()))?;

        let topic = connector.approve_session(proposal.id, settled).await?;
        let key = SessionKey::derive(&topic);
        let session = V2SessionData {
            topic: topic.clone(),
            peer_meta: proposal.proposer.clone(),
            chain_id: chain.clone(),
        };
        connector.attach_session(key.clone(), session.clone());

        let admission = self.registry.admit(
            user_id,
            key.clone(),
            RegistryEntry::new(
                ConnectorHandle::V2(connector),
                proposal.proposer.url.clone(),
                topic.clone(),
            ),
        );
        self.apply_admission(user_id, &key, admission).await;

        self.gateway
            .upsert_session(&SessionRecord {
                user_id: user_id.to_string(),
                peer_id: topic,
                url: proposal.proposer.url.clone(),
                version: ProtocolVersion::V2,
                session: SessionState::V2(session),
                date: now_ms(),
                key: key.as_str().to_string(),
            })
            .await?;

        info!(target: "wcb.events", user_id, dapp = %proposal.proposer.url, "v2 session settled");
        self.emit(WalletEvent::Connected {
            user_id: user_id.to_string(),
            session_key: key,
            version: ProtocolVersion::V2,
            dapp: proposal.proposer,
            chain,
        });
        Ok(())
    }

    async fn on_v1_connected(
        &self,
        user_id: &str,
        session: V1SessionData,
        handle: ConnectorHandle,
    ) -> Result<()> {
        let key = SessionKey::derive(&session.peer_id);
        let url = session.peer_meta.url.clone();

        // A reconnect to the same dApp session should not re-announce it.
        let same_peer = self
            .gateway
            .get_session(&SessionFilter {
                user_id: Some(user_id.to_string()),
                url: Some(url.clone()),
                ..Default::default()
            })
            .await?
            .is_some_and(|record| record.peer_id == session.peer_id);

        let admission = self.registry.admit(
            user_id,
            key.clone(),
            RegistryEntry::new(handle, url.clone(), session.peer_id.clone()),
        );
        self.apply_admission(user_id, &key, admission).await;

        self.gateway
            .upsert_session(&SessionRecord {
                user_id: user_id.to_string(),
                peer_id: session.peer_id.clone(),
                url,
                version: ProtocolVersion::V1,
                session: SessionState::V1(session.clone()),
                date: now_ms(),
                key: key.as_str().to_string(),
            })
            .await?;

        if !same_peer {
            info!(target: "wcb.events", user_id, dapp = %session.peer_meta.url, "v1 session settled");
            self.emit(WalletEvent::Connected {
                user_id: user_id.to_string(),
                session_key: key,
                version: ProtocolVersion::V1,
                dapp: session.peer_meta,
                chain: session.chain_id,
            });
        }
        Ok(())
    }

    /// Cleans up after replacement or eviction. Victim teardown happens off
    /// the dispatch loop; the victim's own disconnect echo finds nothing
    /// left to remove and stays silent.
    async fn apply_admission(&self, user_id: &str, admitted_key: &SessionKey, admission: Admission) {
        match admission {
            Admission::Admitted => {}
            Admission::Replaced {
                old_key,
                old_peer_id,
                old_handle,
            } => {
                self.drop_pending(&old_key);
                if let Err(err) = self.gateway.delete_session(&old_peer_id).await {
                    warn!(target: "wcb.events", user_id, %err, "failed to delete replaced session record");
                }
                if old_key != *admitted_key {
                    if let Some(handle) = old_handle {
                        let peer = old_peer_id.clone();
                        tokio::spawn(async move {
                            handle.as_connector().disconnect(&peer).await;
                        });
                    }
                }
            }
            Admission::AdmittedWithEviction {
                victim_key,
                victim_peer_id,
                victim,
            } => {
                self.drop_pending(&victim_key);
                let record = self
                    .gateway
                    .get_session(&SessionFilter {
                        peer_id: Some(victim_peer_id.clone()),
                        ..Default::default()
                    })
                    .await
                    .ok()
                    .flatten();
                if let Err(err) = self.gateway.delete_session(&victim_peer_id).await {
                    warn!(target: "wcb.events", user_id, %err, "failed to delete evicted session record");
                }
                info!(target: "wcb.events", user_id, victim = %victim_key, "evicted oldest session at cap");
                self.emit(WalletEvent::Disconnected {
                    user_id: user_id.to_string(),
                    session_key: victim_key,
                    dapp_url: record.as_ref().map(|r| r.url.clone()),
                    dapp_name: record.map(|r| r.session.peer_meta().name.clone()),
                });
                let peer = victim_peer_id;
                tokio::spawn(async move {
                    victim.as_connector().disconnect(&peer).await;
                });
            }
        }
    }

    async fn on_request(
        &self,
        user_id: &str,
        peer_id: &str,
        request_id: u64,
        chain: Option<ChainRef>,
        request: NormalizedRequest,
    ) -> Result<()> {
        let key = SessionKey::derive(peer_id);
        let Some(handle) = self.registry.get(user_id, Some(&key)) else {
            return Err(Error::UnknownSession {
                user_id: user_id.to_string(),
                key: key.as_str().to_string(),
            });
        };
        let connector = handle.as_connector();

        if let RequestPayload::Chain { chain } = &request.payload {
            return self
                .on_switch_chain(user_id, peer_id, request_id, chain.clone(), &handle)
                .await;
        }

        let info = connector
            .describe_session(&key)
            .ok_or_else(|| Error::UnknownSession {
                user_id: user_id.to_string(),
                key: key.as_str().to_string(),
            })?;
        let effective_chain = chain.unwrap_or_else(|| info.chain_id.clone());

        let Some(descriptor) = self.directory.resolve_chain(&effective_chain).await? else {
            connector
                .reject(peer_id, request_id, json!({ "message": "Unsupported chain" }))
                .await?;
            return Err(Error::UnsupportedChain(effective_chain.to_string()));
        };

        self.pending.insert(
            (key.clone(), request_id),
            PendingRequest {
                request_id,
                session_key: key.clone(),
                kind: request.kind,
                chain_id: descriptor.chain.clone(),
                payload: request.payload.clone(),
                opened_at: now_ms(),
            },
        );

        self.emit(WalletEvent::SignRequest(SignRequest {
            user_id: user_id.to_string(),
            session_key: key,
            peer_id: peer_id.to_string(),
            request_id,
            kind: request.kind,
            sign_only: request.kind.sign_only(),
            chain: descriptor.chain.clone(),
            chain_name: descriptor.name,
            network_name: descriptor.network_name,
            params_json: display_params(&request.payload),
            payload: request.payload,
            dapp: info.peer_meta,
            version: info.version,
        }));
        Ok(())
    }

    /// Chain switches resolve synchronously: v1 acknowledges and broadcasts
    /// a session update; v2 acknowledges only, since each v2 request scopes
    /// its own chain.
    async fn on_switch_chain(
        &self,
        user_id: &str,
        peer_id: &str,
        request_id: u64,
        chain: ChainRef,
        handle: &ConnectorHandle,
    ) -> Result<()> {
        let connector = handle.as_connector();
        let key = SessionKey::derive(peer_id);

        let Some(descriptor) = self.directory.resolve_chain(&chain).await? else {
            connector
                .reject(peer_id, request_id, json!({ "message": "Unsupported chain" }))
                .await?;
            return Err(Error::UnsupportedChain(chain.to_string()));
        };

        connector.approve(peer_id, request_id, json!("ok")).await?;

        if connector.version() == ProtocolVersion::V1 {
            let user = self.directory.get_user(user_id).await?;
            let address = self
                .directory
                .resolve_address(&user, &descriptor.name)
                .await?
                .ok_or_else(|| Error::AddressUnavailable {
                    user_id: user_id.to_string(),
                    chain: descriptor.name.clone(),
                })?;
            connector
                .set_active_chain(peer_id, vec![address], &descriptor.chain)
                .await?;
            if let Some(mut record) = self
                .gateway
                .get_session(&SessionFilter {
                    peer_id: Some(peer_id.to_string()),
                    ..Default::default()
                })
                .await?
            {
                if let SessionState::V1(session) = &mut record.session {
                    session.chain_id = descriptor.chain.clone();
                }
                record.date = now_ms();
                self.gateway.upsert_session(&record).await?;
            }
        }

        self.emit(WalletEvent::SwitchChain {
            user_id: user_id.to_string(),
            session_key: key,
            version: connector.version(),
            chain: descriptor,
        });
        Ok(())
    }

    /// Pings carry the dApp's display metadata so the wallet can attribute
    /// them to a session.
    fn on_ping(&self, user_id: &str, peer_id: &str) {
        let key = SessionKey::derive(peer_id);
        let dapp = self
            .registry
            .get(user_id, Some(&key))
            .and_then(|handle| handle.as_connector().describe_session(&key))
            .map(|info| info.peer_meta);
        self.emit(WalletEvent::Ping {
            user_id: user_id.to_string(),
            session_key: key,
            dapp_name: dapp.as_ref().map(|meta| meta.name.clone()),
            dapp_url: dapp.map(|meta| meta.url),
        });
    }

    /// Idempotent teardown: the event is announced only when this call
    /// actually removed something, so relay echoes after a local disconnect
    /// stay silent.
    async fn on_disconnected(&self, user_id: &str, peer_id: Option<&str>) -> Result<()> {
        let Some(peer_id) = peer_id else {
            return Ok(());
        };
        let key = SessionKey::derive(peer_id);

        let removed = self.registry.remove(user_id, &key);
        if let Some(entry) = &removed {
            if let Some(v2) = entry.handle.as_v2() {
                v2.detach_session(&key);
            }
        }

        let record = self
            .gateway
            .get_session(&SessionFilter {
                peer_id: Some(peer_id.to_string()),
                ..Default::default()
            })
            .await?;
        let removed_record = self.gateway.delete_session(peer_id).await?;

        self.drop_pending(&key);

        if removed.is_some() || removed_record {
            info!(target: "wcb.events", user_id, peer_id, "session closed");
            self.emit(WalletEvent::Disconnected {
                user_id: user_id.to_string(),
                session_key: key,
                dapp_url: record.as_ref().map(|r| r.url.clone()),
                dapp_name: record.map(|r| r.session.peer_meta().name.clone()),
            });
        }
        Ok(())
    }

    pub(crate) fn drop_pending(&self, key: &SessionKey) {
        self.pending.retain(|(k, _), _| k != key);
    }

    pub(crate) fn take_pending(&self, key: &SessionKey, request_id: u64) -> Option<PendingRequest> {
        self.pending
            .remove(&(key.clone(), request_id))
            .map(|(_, pending)| pending)
    }
}

fn event_user(event: &ConnectorEvent) -> &str {
    match event {
        ConnectorEvent::Proposal { user_id, .. }
        | ConnectorEvent::Connected { user_id, .. }
        | ConnectorEvent::Request { user_id, .. }
        | ConnectorEvent::Ping { user_id, .. }
        | ConnectorEvent::Disconnected { user_id, .. }
        | ConnectorEvent::Error { user_id, .. } => user_id,
    }
}

/// Renders a payload for wallet display. Transactions are shown without
/// their calldata, which is bulky and meaningless to users.
fn display_params(payload: &RequestPayload) -> String {
    match payload {
        RequestPayload::Message { text } => text.clone(),
        RequestPayload::TypedData { data } => {
            serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
        }
        RequestPayload::Transaction { tx } => {
            let mut shown = tx.clone();
            if let Value::Object(map) = &mut shown {
                map.remove("data");
            }
            serde_json::to_string_pretty(&shown).unwrap_or_else(|_| shown.to_string())
        }
        RequestPayload::Chain { chain } => chain.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_strips_transaction_calldata() {
        let payload = RequestPayload::Transaction {
            tx: json!({"from": "0xa", "to": "0xb", "data": "0xdeadbeef", "value": "0x1"}),
        };
        let shown = display_params(&payload);
        assert!(!shown.contains("deadbeef"));
        assert!(shown.contains("0xb"));
    }

    #[test]
    fn display_renders_message_verbatim() {
        let payload = RequestPayload::Message {
            text: "hello dApp".into(),
        };
        assert_eq!(display_params(&payload), "hello dApp");
    }
}
