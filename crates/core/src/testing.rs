//! Test doubles for the capability traits and relay contracts.
//!
//! Kept in the library so integration tests and downstream embedders can
//! exercise the bridge without a real relay, store, or signer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::connector::{ConnectorHandle, V1Connector};
use crate::error::{Error, Result};
use crate::gateway::{
    ChainDescriptor, PersistenceGateway, SessionFilter, SigningBackend, User, WalletDirectory,
};
use crate::relay::{RelayFactory, RelaySink, RelayV1, RelayV2, V1RelayParts, V2RelayParts};
use crate::session::{SessionRecord, V1SessionData};
use wcb_protocol::{ChainRef, PeerMetadata, SettledNamespaces};

pub fn peer_meta(name: &str, url: &str) -> PeerMetadata {
    PeerMetadata {
        name: name.into(),
        url: url.into(),
        description: None,
        icons: Vec::new(),
    }
}

pub fn v1_session(peer_id: &str, url: &str, chain: ChainRef) -> V1SessionData {
    V1SessionData {
        peer_id: peer_id.into(),
        peer_meta: peer_meta("dApp", url),
        chain_id: chain,
        accounts: vec!["0xwallet".into()],
        key: format!("key-{peer_id}"),
        resume: Value::Null,
    }
}

/// Builds a live v1 connector around a mock relay, with a settled session
/// attached. Returns the relay sink so callers can keep the pump alive and
/// inject inbound traffic. Wallet-side events go nowhere.
pub fn v1_test_handle(user_id: &str, peer_id: &str) -> (ConnectorHandle, RelaySink) {
    let (handle, sink, _events) = v1_test_handle_with_events(user_id, peer_id);
    (handle, sink)
}

pub fn v1_test_handle_with_events(
    user_id: &str,
    peer_id: &str,
) -> (
    ConnectorHandle,
    RelaySink,
    mpsc::UnboundedReceiver<crate::connector::ConnectorEvent>,
) {
    let relay = Arc::new(MockRelayV1::new(format!("relay-{peer_id}")));
    relay.connected.store(true, Ordering::SeqCst);
    let (relay_tx, relay_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = V1Connector::new(
        user_id,
        V1RelayParts {
            client: relay,
            events: relay_rx,
        },
        event_tx,
    );
    connector.attach(v1_session(peer_id, "https://dapp.example", ChainRef::Id(1)));
    (ConnectorHandle::V1(connector), relay_tx, event_rx)
}

/// In-memory persistence gateway.
#[derive(Default)]
pub struct MemoryGateway {
    records: Mutex<Vec<SessionRecord>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.records.lock().clone())
    }

    async fn get_session(&self, filter: &SessionFilter) -> Result<Option<SessionRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .find(|record| filter.matches(record))
            .cloned())
    }

    async fn upsert_session(&self, record: &SessionRecord) -> Result<()> {
        let mut records = self.records.lock();
        if let Some(existing) = records.iter_mut().find(|r| r.peer_id == record.peer_id) {
            *existing = record.clone();
        } else {
            records.push(record.clone());
        }
        Ok(())
    }

    async fn delete_session(&self, peer_id: &str) -> Result<bool> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.peer_id != peer_id);
        Ok(records.len() != before)
    }

    async fn count_sessions(&self, user_id: &str) -> Result<usize> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.user_id == user_id)
            .count())
    }
}

/// Directory with a fixed chain table and address book.
#[derive(Default)]
pub struct StaticDirectory {
    chains: Vec<ChainDescriptor>,
    addresses: HashMap<(String, String), String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, name: &str, network_name: &str, chain: ChainRef) -> Self {
        self.chains.push(ChainDescriptor {
            name: name.into(),
            network_name: network_name.into(),
            chain,
        });
        self
    }

    pub fn with_address(mut self, user_id: &str, chain_name: &str, address: &str) -> Self {
        self.addresses
            .insert((user_id.into(), chain_name.into()), address.into());
        self
    }
}

#[async_trait]
impl WalletDirectory for StaticDirectory {
    async fn get_user(&self, user_id: &str) -> Result<User> {
        Ok(User {
            id: user_id.to_string(),
        })
    }

    async fn resolve_chain(&self, chain: &ChainRef) -> Result<Option<ChainDescriptor>> {
        Ok(self
            .chains
            .iter()
            .find(|descriptor| {
                descriptor.chain == *chain
                    || matches!(chain, ChainRef::Name(name) if *name == descriptor.name)
            })
            .cloned())
    }

    async fn resolve_address(&self, user: &User, chain_name: &str) -> Result<Option<String>> {
        Ok(self
            .addresses
            .get(&(user.id.clone(), chain_name.to_string()))
            .cloned())
    }
}

/// Signer that fabricates deterministic outputs, or fails on demand.
#[derive(Default)]
pub struct ScriptedSigner {
    pub calls: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl ScriptedSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn record(&self, op: &str, chain_name: &str) -> Result<String> {
        self.calls.lock().push(format!("{op}:{chain_name}"));
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Signing("scripted failure".into()));
        }
        Ok(format!("0x{op}"))
    }
}

#[async_trait]
impl SigningBackend for ScriptedSigner {
    async fn sign_message(&self, chain_name: &str, _key: &str, _message: &str) -> Result<String> {
        self.record("signed-message", chain_name)
    }

    async fn sign_typed_data(&self, chain_name: &str, _key: &str, _data: &Value) -> Result<String> {
        self.record("signed-typed-data", chain_name)
    }

    async fn sign_transaction(&self, chain_name: &str, _key: &str, _tx: &Value) -> Result<String> {
        self.record("signed-tx", chain_name)
    }

    async fn send_transaction(&self, chain_name: &str, _key: &str, _tx: &Value) -> Result<String> {
        self.record("sent-tx", chain_name)
    }
}

/// v1 relay double recording every command.
pub struct MockRelayV1 {
    key: String,
    pub connected: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    session: Mutex<Option<V1SessionData>>,
    handshake_failure: Mutex<Option<Error>>,
}

impl MockRelayV1 {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            connected: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            handshake_failure: Mutex::new(None),
        }
    }

    /// Scripts the session the next handshake settles with.
    pub fn script_session(&self, session: V1SessionData) {
        *self.session.lock() = Some(session);
    }

    /// Scripts the next handshake to fail with `err`.
    pub fn script_handshake_failure(&self, err: Error) {
        *self.handshake_failure.lock() = Some(err);
    }
}

#[async_trait]
impl RelayV1 for MockRelayV1 {
    fn key(&self) -> &str {
        &self.key
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn create_session(
        &self,
        accounts: Vec<String>,
        chain: &ChainRef,
    ) -> Result<V1SessionData> {
        self.calls.lock().push(format!("create_session:{chain}"));
        if let Some(err) = self.handshake_failure.lock().take() {
            return Err(err);
        }
        let mut session = self
            .session
            .lock()
            .clone()
            .unwrap_or_else(|| v1_session(&format!("peer-{}", self.key), "https://dapp.example", chain.clone()));
        session.accounts = accounts;
        self.connected.store(true, Ordering::SeqCst);
        Ok(session)
    }

    async fn approve_request(&self, request_id: u64, result: Value) -> Result<()> {
        self.calls
            .lock()
            .push(format!("approve:{request_id}:{result}"));
        Ok(())
    }

    async fn reject_request(&self, request_id: u64, error: Value) -> Result<()> {
        self.calls
            .lock()
            .push(format!("reject:{request_id}:{error}"));
        Ok(())
    }

    async fn update_session(&self, _accounts: Vec<String>, chain: &ChainRef) -> Result<()> {
        self.calls.lock().push(format!("update_session:{chain}"));
        Ok(())
    }

    async fn kill_session(&self) -> Result<()> {
        self.calls.lock().push("kill_session".into());
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// v2 relay double recording every command.
#[derive(Default)]
pub struct MockRelayV2 {
    pub calls: Mutex<Vec<String>>,
    topics: Mutex<VecDeque<String>>,
}

impl MockRelayV2 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the topic the next session approval returns.
    pub fn script_topic(&self, topic: impl Into<String>) {
        self.topics.lock().push_back(topic.into());
    }
}

#[async_trait]
impl RelayV2 for MockRelayV2 {
    async fn pair(&self, uri: &str) -> Result<()> {
        self.calls.lock().push(format!("pair:{uri}"));
        Ok(())
    }

    async fn approve_session(
        &self,
        proposal_id: u64,
        _namespaces: SettledNamespaces,
    ) -> Result<String> {
        self.calls
            .lock()
            .push(format!("approve_session:{proposal_id}"));
        Ok(self
            .topics
            .lock()
            .pop_front()
            .unwrap_or_else(|| format!("topic-{proposal_id}")))
    }

    async fn reject_session(
        &self,
        proposal_id: u64,
        _proposer_public_key: &str,
        reason: &str,
    ) -> Result<()> {
        self.calls
            .lock()
            .push(format!("reject_session:{proposal_id}:{reason}"));
        Ok(())
    }

    async fn approve_request(&self, topic: &str, request_id: u64, result: Value) -> Result<()> {
        self.calls
            .lock()
            .push(format!("approve:{topic}:{request_id}:{result}"));
        Ok(())
    }

    async fn reject_request(&self, topic: &str, request_id: u64, error: Value) -> Result<()> {
        self.calls
            .lock()
            .push(format!("reject:{topic}:{request_id}:{error}"));
        Ok(())
    }

    async fn disconnect(&self, topic: &str, reason: &str) -> Result<()> {
        self.calls
            .lock()
            .push(format!("disconnect:{topic}:{reason}"));
        Ok(())
    }
}

/// Relay factory handing out mock relays and retaining the sinks, so tests
/// can inject inbound traffic after the fact.
#[derive(Default)]
pub struct MockRelayFactory {
    pub v1_relays: Mutex<Vec<Arc<MockRelayV1>>>,
    pub v2_relays: Mutex<HashMap<String, Arc<MockRelayV2>>>,
    sinks: Mutex<HashMap<String, RelaySink>>,
    v1_failures: Mutex<VecDeque<Error>>,
}

impl MockRelayFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next freshly paired v1 relay to fail its handshake.
    pub fn fail_next_v1_handshake(&self, err: Error) {
        self.v1_failures.lock().push_back(err);
    }

    /// Sink for the relay created under `key`: the pairing URI for fresh v1
    /// relays, the peer id for resumed ones, the user id for v2.
    pub fn sink(&self, key: &str) -> Option<RelaySink> {
        self.sinks.lock().get(key).cloned()
    }

    pub fn v2_relay(&self, user_id: &str) -> Option<Arc<MockRelayV2>> {
        self.v2_relays.lock().get(user_id).cloned()
    }
}

#[async_trait]
impl RelayFactory for MockRelayFactory {
    async fn v1_from_uri(&self, uri: &str) -> Result<V1RelayParts> {
        let topic = wcb_protocol::parse_uri(uri)
            .map(|pairing| pairing.topic)
            .unwrap_or_else(|_| uri.to_string());
        let relay = Arc::new(MockRelayV1::new(topic));
        if let Some(err) = self.v1_failures.lock().pop_front() {
            relay.script_handshake_failure(err);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.lock().insert(uri.to_string(), tx);
        self.v1_relays.lock().push(relay.clone());
        Ok(V1RelayParts {
            client: relay,
            events: rx,
        })
    }

    async fn v1_resume(&self, session: &V1SessionData) -> Result<V1RelayParts> {
        let relay = Arc::new(MockRelayV1::new(session.key.clone()));
        relay.connected.store(true, Ordering::SeqCst);
        relay.script_session(session.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.lock().insert(session.peer_id.clone(), tx);
        self.v1_relays.lock().push(relay.clone());
        Ok(V1RelayParts {
            client: relay,
            events: rx,
        })
    }

    async fn v2_for_user(&self, user_id: &str) -> Result<V2RelayParts> {
        let relay = Arc::new(MockRelayV2::new());
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.lock().insert(user_id.to_string(), tx);
        self.v2_relays.lock().insert(user_id.to_string(), relay.clone());
        Ok(V2RelayParts {
            client: relay,
            events: rx,
        })
    }
}
