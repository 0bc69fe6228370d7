//! Wire types for the dApp-connection protocol.
//!
//! This crate contains the serde-serializable vocabulary shared by both
//! protocol versions: pairing URIs, CAIP chain identifiers, the inbound RPC
//! method catalogue, and the request normalizer that collapses every
//! protocol-specific method into one of a small set of internal event kinds.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond parsing and (de)serialization
//! - **Version-agnostic where possible**: v1/v2 differences live behind
//!   the connector layer in `wcb-core`, not here
//! - **Total at the normalization boundary**: every supported method maps to
//!   exactly one event kind, so nothing protocol-specific leaks upward

pub mod chain;
pub mod methods;
pub mod types;
pub mod uri;

pub use chain::{CaipChainId, ChainRef};
pub use methods::{NormalizedRequest, ParseError, RequestKind, RequestPayload, normalize};
pub use types::{
    PeerMetadata, ProposalNamespace, ProposalNamespaces, RelayInbound, SessionProposal,
    SettledNamespace, SettledNamespaces,
};
pub use uri::{PairingUri, ProtocolVersion, parse_uri};
