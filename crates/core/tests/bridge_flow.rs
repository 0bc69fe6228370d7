//! End-to-end bridge flows over mock relays.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::{sleep, timeout};

use wcb::testing::{
    MemoryGateway, MockRelayFactory, ScriptedSigner, StaticDirectory, peer_meta, v1_session,
};
use wcb::{
    Bridge, ConnectionStart, Error, MAX_SESSIONS_PER_USER, NoopArtifacts, PersistenceGateway,
    SessionKey, SessionRecord, SessionState, SignRequest, V2SessionData, WalletEvent, WalletEvents,
};
use wcb_protocol::{
    ChainRef, ProposalNamespace, ProtocolVersion, RelayInbound, SessionProposal,
};

struct Harness {
    bridge: Bridge,
    gateway: Arc<MemoryGateway>,
    signer: Arc<ScriptedSigner>,
    factory: Arc<MockRelayFactory>,
    events: WalletEvents,
}

fn harness() -> Harness {
    let gateway = Arc::new(MemoryGateway::new());
    let directory = Arc::new(
        StaticDirectory::new()
            .with_chain("ether", "Ethereum Mainnet", ChainRef::Id(1))
            .with_chain("polygon", "Polygon", ChainRef::Id(137))
            .with_address("alice", "ether", "0xa11ce")
            .with_address("alice", "polygon", "0xa11ce"),
    );
    let signer = Arc::new(ScriptedSigner::new());
    let factory = Arc::new(MockRelayFactory::new());
    let bridge = Bridge::new(
        gateway.clone(),
        directory,
        signer.clone(),
        factory.clone(),
        Arc::new(NoopArtifacts),
    );
    let events = bridge.events().expect("first take of the event stream");
    Harness {
        bridge,
        gateway,
        signer,
        factory,
        events,
    }
}

async fn next_event(events: &mut WalletEvents) -> WalletEvent {
    timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for a wallet event")
        .expect("event stream closed")
}

/// Collects everything emitted within a short quiet window.
async fn drain_events(events: &mut WalletEvents) -> Vec<WalletEvent> {
    let mut drained = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), events.recv()).await {
        drained.push(event);
    }
    drained
}

fn proposal(id: u64, url: &str, chains: &[&str]) -> SessionProposal {
    SessionProposal {
        id,
        pairing_topic: format!("pairing-{id}"),
        proposer: peer_meta("Demo dApp", url),
        proposer_public_key: format!("pk-{id}"),
        required_namespaces: BTreeMap::from([(
            "eip155".to_string(),
            ProposalNamespace {
                chains: chains.iter().map(|c| c.to_string()).collect(),
                methods: vec!["personal_sign".into(), "eth_sendTransaction".into()],
                events: vec!["chainChanged".into()],
            },
        )]),
    }
}

/// Drives a full v2 pairing through to a settled session and returns its key.
async fn settle_v2(h: &mut Harness, user: &str, id: u64, url: &str, topic: &str) -> SessionKey {
    h.bridge
        .create_connection(user, &format!("wc:pairing-{id}@2?relay-protocol=irn"), None)
        .await
        .expect("pairing should start");
    h.factory.v2_relay(user).unwrap().script_topic(topic);
    h.factory
        .sink(user)
        .unwrap()
        .send(RelayInbound::SessionProposal {
            proposal: proposal(id, url, &["eip155:1"]),
        })
        .unwrap();
    match next_event(&mut h.events).await {
        WalletEvent::Connected { session_key, .. } => session_key,
        other => panic!("expected connected event, got {other:?}"),
    }
}

#[tokio::test]
async fn v2_proposal_settles_session() {
    let mut h = harness();
    let key = settle_v2(&mut h, "alice", 1, "https://swap.example", "topic-1").await;

    assert_eq!(h.bridge.registry().count_for_user("alice"), 1);
    let records = h.gateway.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].peer_id, "topic-1");
    assert_eq!(records[0].session.chain_id(), &ChainRef::Id(1));
    assert_eq!(records[0].key, key.as_str());

    let info = h.bridge.connect_info("alice").await.unwrap();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].dapp_url, "https://swap.example");
    assert_eq!(info[0].version, ProtocolVersion::V2);
}

#[tokio::test]
async fn proposal_with_unsupported_chain_is_rejected_whole() {
    let mut h = harness();
    h.bridge
        .create_connection("alice", "wc:pairing-9@2?relay-protocol=irn", None)
        .await
        .unwrap();
    h.factory
        .sink("alice")
        .unwrap()
        .send(RelayInbound::SessionProposal {
            proposal: proposal(9, "https://bsc.example", &["eip155:1", "eip155:56"]),
        })
        .unwrap();

    match next_event(&mut h.events).await {
        WalletEvent::Error { .. } => {}
        other => panic!("expected error event, got {other:?}"),
    }
    assert_eq!(h.bridge.registry().count_for_user("alice"), 0);
    assert!(h.gateway.records().is_empty());
    let calls = h.factory.v2_relay("alice").unwrap().calls.lock().clone();
    assert!(calls.iter().any(|c| c.starts_with("reject_session:9:")));
}

#[tokio::test]
async fn sixth_session_evicts_oldest() {
    let mut h = harness();
    let mut keys = Vec::new();
    for i in 0..MAX_SESSIONS_PER_USER as u64 {
        keys.push(
            settle_v2(
                &mut h,
                "alice",
                i,
                &format!("https://dapp{i}.example"),
                &format!("topic-{i}"),
            )
            .await,
        );
        sleep(Duration::from_millis(10)).await;
    }

    h.bridge
        .create_connection("alice", "wc:pairing-5@2?relay-protocol=irn", None)
        .await
        .unwrap();
    h.factory.v2_relay("alice").unwrap().script_topic("topic-5");
    h.factory
        .sink("alice")
        .unwrap()
        .send(RelayInbound::SessionProposal {
            proposal: proposal(5, "https://dapp5.example", &["eip155:1"]),
        })
        .unwrap();

    match next_event(&mut h.events).await {
        WalletEvent::Disconnected {
            session_key,
            dapp_url,
            ..
        } => {
            assert_eq!(session_key, keys[0]);
            assert_eq!(dapp_url.as_deref(), Some("https://dapp0.example"));
        }
        other => panic!("expected eviction disconnect, got {other:?}"),
    }
    match next_event(&mut h.events).await {
        WalletEvent::Connected { .. } => {}
        other => panic!("expected connected event, got {other:?}"),
    }

    assert_eq!(
        h.bridge.registry().count_for_user("alice"),
        MAX_SESSIONS_PER_USER
    );
    assert!(!h.bridge.registry().contains("alice", &keys[0]));
    assert_eq!(h.gateway.records().len(), MAX_SESSIONS_PER_USER);
}

#[tokio::test]
async fn repairing_same_dapp_at_cap_replaces_without_eviction() {
    let mut h = harness();
    let mut keys = Vec::new();
    for i in 0..MAX_SESSIONS_PER_USER as u64 {
        keys.push(
            settle_v2(
                &mut h,
                "alice",
                i,
                &format!("https://dapp{i}.example"),
                &format!("topic-{i}"),
            )
            .await,
        );
        sleep(Duration::from_millis(10)).await;
    }

    // Fresh pairing to the dApp already occupying slot 2.
    let new_key = settle_v2(&mut h, "alice", 12, "https://dapp2.example", "topic-12").await;

    assert_eq!(
        h.bridge.registry().count_for_user("alice"),
        MAX_SESSIONS_PER_USER
    );
    assert!(!h.bridge.registry().contains("alice", &keys[2]));
    assert!(h.bridge.registry().contains("alice", &new_key));
    assert_eq!(h.gateway.records().len(), MAX_SESSIONS_PER_USER);
    // The displaced session went quietly; only the new connection announced.
    assert!(drain_events(&mut h.events).await.is_empty());
}

#[tokio::test]
async fn request_on_unsupported_chain_is_rejected() {
    let mut h = harness();
    settle_v2(&mut h, "alice", 1, "https://swap.example", "topic-1").await;

    h.factory
        .sink("alice")
        .unwrap()
        .send(RelayInbound::Request {
            id: 9,
            topic: Some("topic-1".into()),
            chain_id: Some("eip155:56".into()),
            method: "eth_sendTransaction".into(),
            params: json!([{ "from": "0xa11ce", "to": "0xb0b", "value": "0x1" }]),
        })
        .unwrap();

    match next_event(&mut h.events).await {
        WalletEvent::Error { message, .. } => {
            assert!(message.contains("unsupported chain"));
        }
        other => panic!("expected error event, got {other:?}"),
    }
    let calls = h.factory.v2_relay("alice").unwrap().calls.lock().clone();
    assert!(calls.iter().any(|c| c.starts_with("reject:topic-1:9")));
}

async fn inbound_sign_request(h: &mut Harness) -> SignRequest {
    h.factory
        .sink("alice")
        .unwrap()
        .send(RelayInbound::Request {
            id: 42,
            topic: Some("topic-1".into()),
            chain_id: Some("eip155:1".into()),
            method: "personal_sign".into(),
            params: json!(["0x68656c6c6f", "0xa11ce"]),
        })
        .unwrap();
    match next_event(&mut h.events).await {
        WalletEvent::SignRequest(request) => request,
        other => panic!("expected sign request, got {other:?}"),
    }
}

#[tokio::test]
async fn approving_a_request_signs_and_responds() {
    let mut h = harness();
    settle_v2(&mut h, "alice", 1, "https://swap.example", "topic-1").await;
    let request = inbound_sign_request(&mut h).await;

    assert!(request.sign_only);
    assert_eq!(request.chain_name, "ether");
    assert_eq!(request.network_name, "Ethereum Mainnet");
    assert_eq!(request.params_json, "hello");

    let outcome = h
        .bridge
        .approve_request(&request, "signing-key")
        .await
        .unwrap()
        .expect("request should still be pending");
    assert!(outcome.result);
    assert_eq!(outcome.message, "Message signed");
    assert_eq!(outcome.data.as_deref(), Some("0xsigned-message"));

    let calls = h.factory.v2_relay("alice").unwrap().calls.lock().clone();
    assert!(calls.iter().any(|c| c.starts_with("approve:topic-1:42")));

    // Settled requests are gone; a second approval is a no-op.
    assert!(
        h.bridge
            .approve_request(&request, "signing-key")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn failed_signing_rejects_toward_the_peer() {
    let mut h = harness();
    settle_v2(&mut h, "alice", 1, "https://swap.example", "topic-1").await;
    let request = inbound_sign_request(&mut h).await;

    h.signer.fail_next_calls(true);
    let outcome = h
        .bridge
        .approve_request(&request, "signing-key")
        .await
        .unwrap()
        .expect("request should still be pending");
    assert!(!outcome.result);
    assert_eq!(outcome.message, "Sign message error");
    assert!(outcome.data.is_none());

    let calls = h.factory.v2_relay("alice").unwrap().calls.lock().clone();
    assert!(calls.iter().any(|c| c.starts_with("reject:topic-1:42")));
}

#[tokio::test]
async fn rejecting_a_request_uses_default_reason() {
    let mut h = harness();
    settle_v2(&mut h, "alice", 1, "https://swap.example", "topic-1").await;
    let request = inbound_sign_request(&mut h).await;

    h.bridge.reject_request(&request, None).await.unwrap();

    let calls = h.factory.v2_relay("alice").unwrap().calls.lock().clone();
    assert!(
        calls
            .iter()
            .any(|c| c.starts_with("reject:topic-1:42") && c.contains("User rejected the request"))
    );
}

#[tokio::test]
async fn ping_carries_dapp_metadata() {
    let mut h = harness();
    let key = settle_v2(&mut h, "alice", 1, "https://swap.example", "topic-1").await;

    h.factory
        .sink("alice")
        .unwrap()
        .send(RelayInbound::Ping {
            topic: "topic-1".into(),
        })
        .unwrap();

    match next_event(&mut h.events).await {
        WalletEvent::Ping {
            user_id,
            session_key,
            dapp_name,
            dapp_url,
        } => {
            assert_eq!(user_id, "alice");
            assert_eq!(session_key, key);
            assert_eq!(dapp_name.as_deref(), Some("Demo dApp"));
            assert_eq!(dapp_url.as_deref(), Some("https://swap.example"));
        }
        other => panic!("expected ping event, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_announces_exactly_once() {
    let mut h = harness();
    let key = settle_v2(&mut h, "alice", 1, "https://swap.example", "topic-1").await;

    h.bridge.disconnect("alice", &key).await.unwrap();
    h.bridge.disconnect("alice", &key).await.unwrap();
    // Relay-side echo of the teardown.
    h.factory
        .sink("alice")
        .unwrap()
        .send(RelayInbound::Disconnected {
            topic: Some("topic-1".into()),
        })
        .unwrap();

    let drained = drain_events(&mut h.events).await;
    let disconnects = drained
        .iter()
        .filter(|e| matches!(e, WalletEvent::Disconnected { .. }))
        .count();
    assert_eq!(disconnects, 1);
    assert_eq!(h.bridge.registry().count_for_user("alice"), 0);
    assert!(h.gateway.records().is_empty());
}

#[tokio::test]
async fn v1_connection_settles_and_rescans_short_circuit() {
    let mut h = harness();
    let start = h
        .bridge
        .create_connection("alice", "wc:handshake-1@1?bridge=https%3A%2F%2Fb&key=aa", None)
        .await
        .unwrap();
    let session_key = match start {
        ConnectionStart::V1Connected { session_key } => session_key,
        other => panic!("expected settled v1 connection, got {other:?}"),
    };
    match next_event(&mut h.events).await {
        WalletEvent::Connected {
            version, session_key: announced, ..
        } => {
            assert_eq!(version, ProtocolVersion::V1);
            assert_eq!(announced, session_key);
        }
        other => panic!("expected connected event, got {other:?}"),
    }
    assert_eq!(h.gateway.records().len(), 1);

    // Scanning the same code again reports state instead of reconnecting.
    match h
        .bridge
        .create_connection("alice", "wc:handshake-1@1?bridge=https%3A%2F%2Fb&key=aa", None)
        .await
        .unwrap()
    {
        ConnectionStart::AlreadyConnected(info) => assert_eq!(info.len(), 1),
        other => panic!("expected short-circuit, got {other:?}"),
    }
}

#[tokio::test]
async fn v1_handshake_failure_propagates_to_the_caller() {
    let h = harness();

    h.factory.fail_next_v1_handshake(Error::PeerRejected);
    let err = h
        .bridge
        .create_connection("alice", "wc:handshake-3@1?bridge=b", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PeerRejected));

    h.factory
        .fail_next_v1_handshake(Error::Timeout("session request".into()));
    let err = h
        .bridge
        .create_connection("alice", "wc:handshake-4@1?bridge=b", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    // Nothing settled, nothing persisted.
    assert_eq!(h.bridge.registry().count_for_user("alice"), 0);
    assert!(h.gateway.records().is_empty());
}

#[tokio::test]
async fn v1_connection_requires_a_wallet_address() {
    let h = harness();
    let err = h
        .bridge
        .create_connection("bob", "wc:handshake-2@1?bridge=b", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AddressUnavailable { .. }));
}

#[tokio::test]
async fn recovery_restores_persisted_sessions_idempotently() {
    let h = harness();
    let v1 = v1_session("peer-legacy", "https://old.example", ChainRef::Id(1));
    h.gateway
        .upsert_session(&SessionRecord {
            user_id: "alice".into(),
            peer_id: v1.peer_id.clone(),
            url: "https://old.example".into(),
            version: ProtocolVersion::V1,
            session: SessionState::V1(v1),
            date: 1,
            key: SessionKey::derive("peer-legacy").as_str().into(),
        })
        .await
        .unwrap();
    h.gateway
        .upsert_session(&SessionRecord {
            user_id: "alice".into(),
            peer_id: "topic-old".into(),
            url: "https://swap.example".into(),
            version: ProtocolVersion::V2,
            session: SessionState::V2(V2SessionData {
                topic: "topic-old".into(),
                peer_meta: peer_meta("Swap", "https://swap.example"),
                chain_id: ChainRef::Id(1),
            }),
            date: 2,
            key: SessionKey::derive("topic-old").as_str().into(),
        })
        .await
        .unwrap();

    let report = h.bridge.recover().await.unwrap();
    assert_eq!(report.restored_v1, 1);
    assert_eq!(report.restored_v2, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(h.bridge.registry().count_for_user("alice"), 2);

    let again = h.bridge.recover().await.unwrap();
    assert_eq!(again.restored_v1, 0);
    assert_eq!(again.restored_v2, 0);
    assert_eq!(again.skipped, 2);
    assert_eq!(h.bridge.registry().count_for_user("alice"), 2);
}

#[tokio::test]
async fn wallet_switch_chain_updates_session_and_record() {
    let mut h = harness();
    let key = settle_v2(&mut h, "alice", 1, "https://swap.example", "topic-1").await;

    let descriptor = h
        .bridge
        .switch_chain("alice", &key, &ChainRef::Id(137))
        .await
        .unwrap();
    assert_eq!(descriptor.name, "polygon");

    let records = h.gateway.records();
    assert_eq!(records[0].session.chain_id(), &ChainRef::Id(137));
    let info = h.bridge.connect_info("alice").await.unwrap();
    assert_eq!(info[0].chain, ChainRef::Id(137));
}

#[tokio::test]
async fn dapp_switch_chain_on_v2_acknowledges_without_mutation() {
    let mut h = harness();
    settle_v2(&mut h, "alice", 1, "https://swap.example", "topic-1").await;

    h.factory
        .sink("alice")
        .unwrap()
        .send(RelayInbound::Request {
            id: 7,
            topic: Some("topic-1".into()),
            chain_id: None,
            method: "wallet_switchEthereumChain".into(),
            params: json!([{ "chainId": "0x89" }]),
        })
        .unwrap();

    match next_event(&mut h.events).await {
        WalletEvent::SwitchChain { chain, version, .. } => {
            assert_eq!(chain.chain, ChainRef::Id(137));
            assert_eq!(version, ProtocolVersion::V2);
        }
        other => panic!("expected switch-chain event, got {other:?}"),
    }
    let calls = h.factory.v2_relay("alice").unwrap().calls.lock().clone();
    assert!(calls.iter().any(|c| c.starts_with("approve:topic-1:7")));
    // Persisted chain stays as settled; v2 requests scope their own chain.
    assert_eq!(h.gateway.records()[0].session.chain_id(), &ChainRef::Id(1));
}
