//! Request normalization.
//!
//! Every inbound RPC method, regardless of protocol version or chain
//! namespace, is collapsed into one of a fixed set of event kinds with a
//! canonical payload. The mapping is total: a method either normalizes or
//! fails with [`ParseError::UnsupportedMethod`]; no protocol vocabulary
//! leaks past this boundary.
//!
//! Parameter positions per method:
//!
//! | Method | Kind | Payload position |
//! |---|---|---|
//! | `personal_sign` | sign-message | `params[0]`, hex-decoded if `0x`-prefixed |
//! | `eth_sign` | sign-message | `params[1]` |
//! | `*_signMessage` | sign-message | `params.message` |
//! | `eth_signTypedData` | sign-typed-data | `params[1]`, JSON-decoded |
//! | `eth_sendTransaction` | send-transaction | first array element / `params.transaction` / object |
//! | `eth_signTransaction`, `*_signTransaction` | sign-transaction | same as above |
//! | `wallet_switchEthereumChain` | switch-chain | `params[0].chainId` |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::chain::ChainRef;

/// Result type alias for protocol parsing.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors raised while parsing protocol input.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Connection string was not a recognizable `wc:` URI.
    #[error("malformed connection string: {0}")]
    MalformedUri(String),

    /// Connection string carried a version this wallet does not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Chain identifier did not split into `<namespace>:<reference>`.
    #[error("malformed chain identifier: {0}")]
    MalformedChainId(String),

    /// Method outside the supported catalogue.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Method recognized but its parameters were not in the documented shape.
    #[error("invalid params for {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ParseError {
    fn invalid(method: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// Internal event kind a request normalizes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    SignMessage,
    SignTypedData,
    SignTransaction,
    SendTransaction,
    SwitchChain,
}

impl RequestKind {
    /// Whether the request asks for a signature without broadcasting.
    pub fn sign_only(self) -> bool {
        matches!(
            self,
            Self::SignMessage | Self::SignTypedData | Self::SignTransaction
        )
    }
}

/// Canonical payload extracted from method-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestPayload {
    /// Human-readable message. Hex-encoded inputs are decoded; when the
    /// bytes are not valid UTF-8 the raw hex string is kept instead.
    Message { text: String },
    /// JSON-decoded typed-data object.
    TypedData { data: Value },
    /// Transaction object in the dApp's own shape.
    Transaction { tx: Value },
    /// Requested chain for a switch-chain call.
    Chain { chain: ChainRef },
}

/// A fully normalized inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub kind: RequestKind,
    pub payload: RequestPayload,
}

/// Maps an inbound RPC method and its raw parameters to a normalized request.
pub fn normalize(method: &str, params: &Value) -> Result<NormalizedRequest> {
    match method {
        "personal_sign" => {
            let raw = array_str(params, 0)
                .ok_or_else(|| ParseError::invalid(method, "missing message at params[0]"))?;
            Ok(NormalizedRequest {
                kind: RequestKind::SignMessage,
                payload: RequestPayload::Message {
                    text: decode_message(raw),
                },
            })
        }

        "eth_sign" => {
            let raw = array_str(params, 1)
                .ok_or_else(|| ParseError::invalid(method, "missing message at params[1]"))?;
            Ok(NormalizedRequest {
                kind: RequestKind::SignMessage,
                payload: RequestPayload::Message {
                    text: decode_message(raw),
                },
            })
        }

        m if m.ends_with("_signMessage") => {
            let raw = params
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| ParseError::invalid(method, "missing params.message"))?;
            Ok(NormalizedRequest {
                kind: RequestKind::SignMessage,
                payload: RequestPayload::Message {
                    text: decode_message(raw),
                },
            })
        }

        "eth_signTypedData" | "eth_signTypedData_v3" | "eth_signTypedData_v4" => {
            let raw = array_value(params, 1)
                .ok_or_else(|| ParseError::invalid(method, "missing typed data at params[1]"))?;
            let data = match raw {
                Value::String(s) => serde_json::from_str(s)?,
                other => other.clone(),
            };
            Ok(NormalizedRequest {
                kind: RequestKind::SignTypedData,
                payload: RequestPayload::TypedData { data },
            })
        }

        "eth_sendTransaction" => Ok(NormalizedRequest {
            kind: RequestKind::SendTransaction,
            payload: RequestPayload::Transaction {
                tx: extract_transaction(method, params)?,
            },
        }),

        "eth_signTransaction" => Ok(NormalizedRequest {
            kind: RequestKind::SignTransaction,
            payload: RequestPayload::Transaction {
                tx: extract_transaction(method, params)?,
            },
        }),

        m if m.ends_with("_signTransaction") => Ok(NormalizedRequest {
            kind: RequestKind::SignTransaction,
            payload: RequestPayload::Transaction {
                tx: extract_transaction(method, params)?,
            },
        }),

        "wallet_switchEthereumChain" => {
            let chain_token = array_value(params, 0)
                .and_then(|v| v.get("chainId"))
                .ok_or_else(|| ParseError::invalid(method, "missing params[0].chainId"))?;
            let chain = match chain_token {
                Value::String(s) => ChainRef::from_hex_or_coerce(s),
                Value::Number(n) => n
                    .as_u64()
                    .map(ChainRef::Id)
                    .ok_or_else(|| ParseError::invalid(method, "chainId out of range"))?,
                _ => return Err(ParseError::invalid(method, "chainId must be string or number")),
            };
            Ok(NormalizedRequest {
                kind: RequestKind::SwitchChain,
                payload: RequestPayload::Chain { chain },
            })
        }

        other => Err(ParseError::UnsupportedMethod(other.to_string())),
    }
}

/// Coalesces the three transaction parameter shapes seen in the wild:
/// an array whose first element is the transaction, an object with a
/// `transaction` field, or the transaction object itself.
fn extract_transaction(method: &str, params: &Value) -> Result<Value> {
    if let Some(first) = array_value(params, 0) {
        return Ok(first.clone());
    }
    if let Some(tx) = params.get("transaction") {
        return Ok(tx.clone());
    }
    if params.is_object() {
        return Ok(params.clone());
    }
    Err(ParseError::invalid(method, "no transaction object in params"))
}

/// Decodes a `0x`-prefixed hex message to UTF-8, keeping the raw input when
/// the bytes do not decode cleanly.
fn decode_message(raw: &str) -> String {
    let Some(hex_part) = raw.strip_prefix("0x") else {
        return raw.to_string();
    };
    match hex::decode(hex_part) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => raw.to_string(),
        },
        Err(_) => raw.to_string(),
    }
}

fn array_value(params: &Value, index: usize) -> Option<&Value> {
    params.as_array().and_then(|a| a.get(index))
}

fn array_str(params: &Value, index: usize) -> Option<&str> {
    array_value(params, index).and_then(Value::as_str)
}
