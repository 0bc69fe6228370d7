//! Wallet Bridge - dApp session connection management
//!
//! This crate manages wallet-to-dApp sessions across both versions of the
//! pairing protocol:
//!
//! - **Connectors**: one relay per v1 session, one shared relay per user
//!   for v2, all pumping into a single event queue
//! - **Events handler**: sequential dispatch of connector traffic into
//!   wallet-facing events
//! - **Registry**: live connector handles per user, with same-dApp
//!   replacement and a five-session cap enforced at admission
//! - **Recovery**: rebuilding live connectors from persisted records at
//!   startup
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐
//! │   wallet   │  UI / embedder
//! └─────┬──────┘
//!       │ Bridge operations + WalletEvent stream
//! ┌─────▼──────┐
//! │  wcb-core  │  This crate
//! │ ┌────────┐ │
//! │ │ Bridge │ │  connect / approve / reject / disconnect
//! │ └────────┘ │
//! │ ┌────────┐ │
//! │ │ Events │ │  sequential dispatch loop
//! │ └────────┘ │
//! │ ┌────────┐ │
//! │ │ Conn.  │ │  v1 / v2 connectors over relay traits
//! │ └────────┘ │
//! └─────┬──────┘
//!       │ RelayV1 / RelayV2 / RelayFactory
//! ┌─────▼──────┐
//! │   relays   │  embedder-provided transport stack
//! └────────────┘
//! ```
//!
//! # Capability seams
//!
//! The core owns no storage, key material, or transport. Embedders supply
//! [`gateway::PersistenceGateway`], [`gateway::WalletDirectory`],
//! [`gateway::SigningBackend`], [`relay::RelayFactory`], and
//! [`artifacts::TransportArtifacts`]; [`testing`] ships in-memory doubles
//! for all of them.

pub mod artifacts;
pub mod bridge;
pub mod connector;
pub mod error;
pub mod events;
pub mod gateway;
pub mod recover;
pub mod registry;
pub mod relay;
pub mod session;
pub mod testing;

pub use artifacts::{FsArtifacts, NoopArtifacts, TransportArtifacts, artifact_name};
pub use bridge::{ApproveOutcome, Bridge, ConnectInfo, ConnectionStart};
pub use connector::{
    Connector, ConnectorEvent, ConnectorHandle, EventSink, SessionInfo, V1Connector, V2Connector,
};
pub use error::{Error, Result};
pub use events::{EventsHandler, SignRequest, WalletEvent, WalletEvents};
pub use gateway::{
    ChainDescriptor, PersistenceGateway, SessionFilter, SigningBackend, User, WalletDirectory,
};
pub use recover::{RecoveryReport, recover};
pub use registry::{Admission, RegistryEntry, SessionRegistry};
pub use relay::{
    ClientMetadata, RelayEvents, RelayFactory, RelaySink, RelayV1, RelayV2, V1RelayParts,
    V2RelayParts,
};
pub use session::{
    MAX_SESSIONS_PER_USER, PendingRequest, SessionKey, SessionRecord, SessionState, UserId,
    V1SessionData, V2SessionData,
};
