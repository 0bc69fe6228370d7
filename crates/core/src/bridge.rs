//! The wallet-facing facade.
//!
//! A [`Bridge`] owns the registry, the events handler loop, and the
//! capability gateways, and exposes the operations a wallet UI drives:
//! connect, approve/reject, switch chain, disconnect, list, recover.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::artifacts::TransportArtifacts;
use crate::connector::{
    Connector, ConnectorEvent, ConnectorHandle, EventSink, V1Connector, V2Connector,
};
use crate::error::{Error, Result};
use crate::events::{EventsHandler, SignRequest, WalletEvents};
use crate::gateway::{ChainDescriptor, PersistenceGateway, SessionFilter, SigningBackend, WalletDirectory};
use crate::recover::{RecoveryReport, recover};
use crate::registry::{RegistryEntry, SessionRegistry};
use crate::relay::RelayFactory;
use crate::session::{SessionKey, SessionState, now_ms};
use wcb_protocol::{
    ChainRef, PeerMetadata, ProtocolVersion, RequestKind, RequestPayload, parse_uri,
};

/// Platform name carrying the default v1 wallet address.
const DEFAULT_V1_CHAIN_NAME: &str = "ether";

/// Default chain offered in a v1 handshake when the caller names none.
const DEFAULT_V1_CHAIN: ChainRef = ChainRef::Id(1);

/// Outcome of [`Bridge::create_connection`].
#[derive(Debug)]
pub enum ConnectionStart {
    /// The scanned pairing is already live; current sessions returned
    /// instead of re-connecting.
    AlreadyConnected(Vec<ConnectInfo>),
    /// v1 handshake settled with the peer.
    V1Connected { session_key: SessionKey },
    /// v2 pairing initiated; the proposal arrives as a wallet event.
    V2Pairing,
}

/// Completion envelope for an approved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproveOutcome {
    pub result: bool,
    pub message: String,
    /// Signature or transaction hash on success.
    pub data: Option<String>,
}

/// One live session as shown to the wallet.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectInfo {
    pub session_key: SessionKey,
    pub version: ProtocolVersion,
    pub dapp_name: String,
    pub dapp_url: String,
    pub chain: ChainRef,
}

pub struct Bridge {
    registry: Arc<SessionRegistry>,
    handler: Arc<EventsHandler>,
    gateway: Arc<dyn PersistenceGateway>,
    directory: Arc<dyn WalletDirectory>,
    signer: Arc<dyn SigningBackend>,
    factory: Arc<dyn RelayFactory>,
    artifacts: Arc<dyn TransportArtifacts>,
    event_tx: EventSink,
    wallet_rx: Mutex<Option<WalletEvents>>,
}

impl Bridge {
    /// Builds the bridge and starts its dispatch loop.
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        directory: Arc<dyn WalletDirectory>,
        signer: Arc<dyn SigningBackend>,
        factory: Arc<dyn RelayFactory>,
        artifacts: Arc<dyn TransportArtifacts>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let (handler, wallet_rx) =
            EventsHandler::new(registry.clone(), gateway.clone(), directory.clone());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(handler.clone().run(event_rx));
        Self {
            registry,
            handler,
            gateway,
            directory,
            signer,
            factory,
            artifacts,
            event_tx,
            wallet_rx: Mutex::new(Some(wallet_rx)),
        }
    }

    /// Takes the wallet event stream. Yields `None` after the first call.
    pub fn events(&self) -> Option<WalletEvents> {
        self.wallet_rx.lock().take()
    }

    /// Restores persisted sessions into live connectors. Safe to repeat.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        recover(
            &self.registry,
            self.gateway.as_ref(),
            self.factory.as_ref(),
            self.artifacts.as_ref(),
            &self.event_tx,
        )
        .await
    }

    /// Opens a connection from a scanned `wc:` URI. v1 resolves only once
    /// the handshake settles; v2 returns immediately and delivers the
    /// proposal as a wallet event.
    pub async fn create_connection(
        &self,
        user_id: &str,
        uri: &str,
        chain: Option<ChainRef>,
    ) -> Result<ConnectionStart> {
        let pairing = parse_uri(uri)?;
        match pairing.version {
            ProtocolVersion::V1 => {
                // Re-scanning a code for a session that is still up is a
                // no-op; report what is connected instead.
                let already_live = self
                    .registry
                    .entries_for_user(user_id)
                    .into_iter()
                    .any(|(_, entry)| match &entry.handle {
                        ConnectorHandle::V1(c) => {
                            c.relay_key() == pairing.topic && c.connected()
                        }
                        ConnectorHandle::V2(_) => false,
                    });
                if already_live {
                    debug!(target: "wcb.bridge", user_id, "pairing already connected");
                    return Ok(ConnectionStart::AlreadyConnected(
                        self.connect_info(user_id).await?,
                    ));
                }

                let user = self.directory.get_user(user_id).await?;
                let address = self
                    .directory
                    .resolve_address(&user, DEFAULT_V1_CHAIN_NAME)
                    .await?
                    .ok_or_else(|| Error::AddressUnavailable {
                        user_id: user_id.to_string(),
                        chain: DEFAULT_V1_CHAIN_NAME.to_string(),
                    })?;
                let chain = chain.unwrap_or(DEFAULT_V1_CHAIN);

                let parts = self.factory.v1_from_uri(&pairing.raw).await?;
                let connector = V1Connector::new(user_id, parts, self.event_tx.clone());
                let session = connector.connect(vec![address], &chain).await?;
                info!(target: "wcb.bridge", user_id, dapp = %session.peer_meta.url, "v1 connection settled");
                Ok(ConnectionStart::V1Connected {
                    session_key: SessionKey::derive(&session.peer_id),
                })
            }
            ProtocolVersion::V2 => {
                let connector = self.v2_connector(user_id).await?;
                connector.pair(&pairing.raw).await?;
                info!(target: "wcb.bridge", user_id, "v2 pairing initiated");
                Ok(ConnectionStart::V2Pairing)
            }
        }
    }

    /// The user's shared v2 connector, created on first use and parked in
    /// the registry under a placeholder key.
    async fn v2_connector(&self, user_id: &str) -> Result<Arc<V2Connector>> {
        if let Some(connector) = self
            .registry
            .get(user_id, None)
            .and_then(|handle| handle.as_v2().cloned())
        {
            return Ok(connector);
        }
        let parts = self.factory.v2_for_user(user_id).await?;
        let connector = V2Connector::new(user_id, parts, self.event_tx.clone());
        self.registry.put(
            user_id,
            SessionKey::placeholder(user_id),
            RegistryEntry::new(ConnectorHandle::V2(connector.clone()), "", ""),
        );
        Ok(connector)
    }

    /// Completes a pending request with the user's approval. Returns
    /// `Ok(None)` when the session or the pending entry is already gone,
    /// in which case nothing is signed or sent.
    pub async fn approve_request(
        &self,
        request: &SignRequest,
        signing_key: &str,
    ) -> Result<Option<ApproveOutcome>> {
        let Some(handle) = self
            .registry
            .get(&request.user_id, Some(&request.session_key))
        else {
            debug!(target: "wcb.bridge", user_id = %request.user_id, "approve for a session no longer live");
            return Ok(None);
        };
        let Some(pending) = self
            .handler
            .take_pending(&request.session_key, request.request_id)
        else {
            debug!(target: "wcb.bridge", user_id = %request.user_id, request_id = request.request_id, "approve for a request no longer pending");
            return Ok(None);
        };
        let connector = handle.as_connector();

        let (signed, success_message, failure_message) = match (&pending.kind, &pending.payload) {
            (RequestKind::SignMessage, RequestPayload::Message { text }) => (
                self.signer
                    .sign_message(&request.chain_name, signing_key, text)
                    .await,
                "Message signed",
                "Sign message error",
            ),
            (RequestKind::SignTypedData, RequestPayload::TypedData { data }) => (
                self.signer
                    .sign_typed_data(&request.chain_name, signing_key, data)
                    .await,
                "Message signed",
                "Sign message error",
            ),
            (RequestKind::SignTransaction, RequestPayload::Transaction { tx }) => (
                self.signer
                    .sign_transaction(&request.chain_name, signing_key, tx)
                    .await,
                "TX signed",
                "Sign Transaction error",
            ),
            (RequestKind::SendTransaction, RequestPayload::Transaction { tx }) => (
                self.signer
                    .send_transaction(&request.chain_name, signing_key, tx)
                    .await,
                "TX sent",
                "Transaction error",
            ),
            _ => return Ok(None),
        };

        match signed {
            Ok(data) => {
                connector
                    .approve(&request.peer_id, request.request_id, json!(data))
                    .await?;
                Ok(Some(ApproveOutcome {
                    result: true,
                    message: success_message.to_string(),
                    data: Some(data),
                }))
            }
            Err(err) => {
                debug!(target: "wcb.bridge", user_id = %request.user_id, %err, "signing failed");
                connector
                    .reject(
                        &request.peer_id,
                        request.request_id,
                        json!({ "message": failure_message }),
                    )
                    .await?;
                Ok(Some(ApproveOutcome {
                    result: false,
                    message: failure_message.to_string(),
                    data: None,
                }))
            }
        }
    }

    /// Declines a pending request. A missing session or pending entry makes
    /// this a no-op.
    pub async fn reject_request(&self, request: &SignRequest, reason: Option<&str>) -> Result<()> {
        let pending = self
            .handler
            .take_pending(&request.session_key, request.request_id);
        let Some(handle) = self
            .registry
            .get(&request.user_id, Some(&request.session_key))
        else {
            return Ok(());
        };
        if pending.is_none() {
            return Ok(());
        }
        handle
            .as_connector()
            .reject(
                &request.peer_id,
                request.request_id,
                json!({ "message": reason.unwrap_or("User rejected the request") }),
            )
            .await
    }

    /// Wallet-initiated chain move for one session.
    pub async fn switch_chain(
        &self,
        user_id: &str,
        session_key: &SessionKey,
        chain: &ChainRef,
    ) -> Result<ChainDescriptor> {
        let descriptor = self
            .directory
            .resolve_chain(chain)
            .await?
            .ok_or_else(|| Error::UnsupportedChain(chain.to_string()))?;
        let entry = self
            .entry_for(user_id, session_key)
            .ok_or_else(|| Error::UnknownSession {
                user_id: user_id.to_string(),
                key: session_key.as_str().to_string(),
            })?;

        let user = self.directory.get_user(user_id).await?;
        let address = self
            .directory
            .resolve_address(&user, &descriptor.name)
            .await?
            .ok_or_else(|| Error::AddressUnavailable {
                user_id: user_id.to_string(),
                chain: descriptor.name.clone(),
            })?;
        entry
            .handle
            .as_connector()
            .set_active_chain(&entry.peer_id, vec![address], &descriptor.chain)
            .await?;

        if let Some(mut record) = self
            .gateway
            .get_session(&SessionFilter {
                peer_id: Some(entry.peer_id.clone()),
                ..Default::default()
            })
            .await?
        {
            match &mut record.session {
                SessionState::V1(session) => session.chain_id = descriptor.chain.clone(),
                SessionState::V2(session) => session.chain_id = descriptor.chain.clone(),
            }
            record.date = now_ms();
            self.gateway.upsert_session(&record).await?;
        }
        Ok(descriptor)
    }

    /// Closes a session. Idempotent: the handler announces exactly one
    /// disconnect even when the relay echoes the teardown back.
    pub async fn disconnect(&self, user_id: &str, session_key: &SessionKey) -> Result<()> {
        let peer_id = match self.entry_for(user_id, session_key) {
            Some(entry) => {
                entry
                    .handle
                    .as_connector()
                    .disconnect(&entry.peer_id)
                    .await;
                Some(entry.peer_id)
            }
            // The session may survive only as a persisted record.
            None => self
                .gateway
                .get_session(&SessionFilter {
                    user_id: Some(user_id.to_string()),
                    key: Some(session_key.as_str().to_string()),
                    ..Default::default()
                })
                .await?
                .map(|record| record.peer_id),
        };
        if let Some(peer_id) = peer_id {
            let _ = self.event_tx.send(ConnectorEvent::Disconnected {
                user_id: user_id.to_string(),
                peer_id: Some(peer_id),
            });
        }
        Ok(())
    }

    /// Current sessions for display. v1 slots whose transport has silently
    /// died are pruned while assembling the list.
    pub async fn connect_info(&self, user_id: &str) -> Result<Vec<ConnectInfo>> {
        let mut info = Vec::new();
        for (key, entry) in self.registry.entries_for_user(user_id) {
            let connector = entry.handle.as_connector();
            if !connector.connected() {
                self.registry.remove(user_id, &key);
                continue;
            }
            let Some(session) = connector.describe_session(&key) else {
                continue;
            };
            let meta: PeerMetadata = session.peer_meta;
            info.push(ConnectInfo {
                session_key: key,
                version: session.version,
                dapp_name: meta.name,
                dapp_url: meta.url,
                chain: session.chain_id,
            });
        }
        Ok(info)
    }

    fn entry_for(&self, user_id: &str, session_key: &SessionKey) -> Option<RegistryEntry> {
        self.registry
            .entries_for_user(user_id)
            .into_iter()
            .find(|(key, _)| key == session_key)
            .map(|(_, entry)| entry)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}
