//! Wire-shaped types shared by both protocol versions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// dApp-supplied descriptive metadata. Display-only, never authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icons: Vec<String>,
}

/// One requested namespace inside a v2 session proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalNamespace {
    /// CAIP chain identifiers the dApp wants, e.g. `eip155:1`.
    pub chains: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

/// Namespaces requested by a proposal, keyed by namespace name.
///
/// `BTreeMap` keeps iteration deterministic so account assembly and
/// rejection messages are stable across runs.
pub type ProposalNamespaces = BTreeMap<String, ProposalNamespace>;

/// One settled namespace sent back on proposal approval: the requested
/// methods/events plus the wallet accounts (`<chain>:<address>`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledNamespace {
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

pub type SettledNamespaces = BTreeMap<String, SettledNamespace>;

/// A v2 session proposal as delivered by the relay client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposal {
    /// Proposal request id, echoed back on approve/reject.
    pub id: u64,
    pub pairing_topic: String,
    pub proposer: PeerMetadata,
    /// Public key of the proposer, needed for protocol-level rejection.
    pub proposer_public_key: String,
    pub required_namespaces: ProposalNamespaces,
}

/// Inbound events surfaced by a relay client, common to both versions.
///
/// This is the bounded vocabulary a connector subscribes to; anything the
/// relay cannot express here never reaches the session core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayInbound {
    /// v2 only: a dApp proposed a session after pairing.
    SessionProposal { proposal: SessionProposal },
    /// An RPC request addressed to an established session.
    Request {
        id: u64,
        /// Session topic (v2). v1 relays omit it; the connector knows its peer.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        /// Composite or bare chain identifier the request targets, if carried.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chain_id: Option<String>,
        method: String,
        params: Value,
    },
    /// v2 keepalive.
    Ping { topic: String },
    /// Peer closed the session.
    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },
    /// Transport-level failure the relay wants surfaced.
    TransportError { message: String },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn relay_inbound_round_trips_tagged_form() {
        let event = RelayInbound::Request {
            id: 7,
            topic: Some("topic-a".into()),
            chain_id: Some("eip155:1".into()),
            method: "personal_sign".into(),
            params: json!(["0x6869"]),
        };
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains(r#""type":"request""#));
        let back: RelayInbound = serde_json::from_str(&text).unwrap();
        match back {
            RelayInbound::Request { id, method, .. } => {
                assert_eq!(id, 7);
                assert_eq!(method, "personal_sign");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn proposal_deserializes_camel_case_wire_form() {
        let raw = json!({
            "id": 42,
            "pairingTopic": "pair-1",
            "proposer": {"name": "Example dApp", "url": "https://dapp.example"},
            "proposerPublicKey": "pubkey",
            "requiredNamespaces": {
                "eip155": {"chains": ["eip155:1"], "methods": ["personal_sign"], "events": []}
            }
        });
        let proposal: SessionProposal = serde_json::from_value(raw).unwrap();
        assert_eq!(proposal.pairing_topic, "pair-1");
        assert_eq!(proposal.required_namespaces["eip155"].chains, vec!["eip155:1"]);
    }
}
