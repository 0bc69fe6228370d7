//! Error types for the session core.

use thiserror::Error;

/// Result type alias for session-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the session core.
///
/// Transport-level failures during approve/reject/disconnect never surface
/// through this type to callers of the dispatch loop; connectors convert
/// them to `error` events so one broken session cannot abort the others.
#[derive(Debug, Error)]
pub enum Error {
    /// A proposal or request referenced a chain this wallet does not support.
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    /// The dApp rejected the handshake.
    #[error("peer rejected the session")]
    PeerRejected,

    /// The handshake did not complete in time.
    #[error("handshake timed out: {0}")]
    Timeout(String),

    /// Transport- or protocol-level failure reported by the relay client.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation addressed a session not present in the registry.
    #[error("unknown session: user={user_id} key={key}")]
    UnknownSession { user_id: String, key: String },

    /// No wallet address is available for the user on the given chain.
    #[error("no wallet address for user {user_id} on chain {chain}")]
    AddressUnavailable { user_id: String, chain: String },

    /// Persistence gateway failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Signing backend failure.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Connection string / chain id / method parsing failure.
    #[error(transparent)]
    Parse(#[from] wcb_protocol::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (transport artifact housekeeping).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
