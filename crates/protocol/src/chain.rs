//! CAIP chain identifiers.
//!
//! Composite identifiers of the form `<namespace>:<reference>` (e.g.
//! `eip155:1`, `solana:mainnet`) are split on `:`. The reference is coerced
//! to a number when it parses as one, otherwise kept as a string token; EVM
//! families use numeric references, most others use names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::methods::ParseError;

/// Chain reference in either numeric (EVM) or named (non-EVM) form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainRef {
    Id(u64),
    Name(String),
}

impl ChainRef {
    /// Coerces a raw reference token: numeric when it parses, named otherwise.
    pub fn coerce(token: &str) -> Self {
        match token.parse::<u64>() {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Name(token.to_string()),
        }
    }

    /// Parses `0x`-prefixed hex chain ids as used by `wallet_switchEthereumChain`.
    pub fn from_hex_or_coerce(token: &str) -> Self {
        if let Some(hex_part) = token.strip_prefix("0x") {
            if let Ok(id) = u64::from_str_radix(hex_part, 16) {
                return Self::Id(id);
            }
        }
        Self::coerce(token)
    }

    pub fn as_id(&self) -> Option<u64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Name(_) => None,
        }
    }
}

impl fmt::Display for ChainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

impl From<u64> for ChainRef {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

/// Fully qualified `<namespace>:<reference>` chain identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaipChainId {
    pub namespace: String,
    pub reference: ChainRef,
}

impl CaipChainId {
    /// Splits a composite identifier on `:`.
    ///
    /// A bare token without a namespace is accepted and treated as a chain
    /// reference only, since v1 requests carry plain chain ids.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        match input.split_once(':') {
            Some((ns, reference)) => {
                if ns.is_empty() || reference.is_empty() {
                    return Err(ParseError::MalformedChainId(input.to_string()));
                }
                Ok(Self {
                    namespace: ns.to_string(),
                    reference: ChainRef::coerce(reference),
                })
            }
            None => {
                if input.is_empty() {
                    return Err(ParseError::MalformedChainId(input.to_string()));
                }
                Ok(Self {
                    namespace: String::new(),
                    reference: ChainRef::coerce(input),
                })
            }
        }
    }
}

impl fmt::Display for CaipChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.reference)
        } else {
            write!(f, "{}:{}", self.namespace, self.reference)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_evm_identifier_to_numeric_reference() {
        let caip = CaipChainId::parse("eip155:56").unwrap();
        assert_eq!(caip.namespace, "eip155");
        assert_eq!(caip.reference, ChainRef::Id(56));
    }

    #[test]
    fn keeps_non_numeric_reference_as_name() {
        let caip = CaipChainId::parse("solana:mainnet").unwrap();
        assert_eq!(caip.reference, ChainRef::Name("mainnet".into()));
    }

    #[test]
    fn bare_reference_has_empty_namespace() {
        let caip = CaipChainId::parse("137").unwrap();
        assert!(caip.namespace.is_empty());
        assert_eq!(caip.reference, ChainRef::Id(137));
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(CaipChainId::parse(":1").is_err());
        assert!(CaipChainId::parse("eip155:").is_err());
        assert!(CaipChainId::parse("").is_err());
    }

    #[test]
    fn hex_chain_id_coercion() {
        assert_eq!(ChainRef::from_hex_or_coerce("0x38"), ChainRef::Id(56));
        assert_eq!(ChainRef::from_hex_or_coerce("56"), ChainRef::Id(56));
        assert_eq!(
            ChainRef::from_hex_or_coerce("polkadot"),
            ChainRef::Name("polkadot".into())
        );
    }

    #[test]
    fn display_round_trip() {
        assert_eq!(CaipChainId::parse("eip155:1").unwrap().to_string(), "eip155:1");
        assert_eq!(ChainRef::Id(1).to_string(), "1");
    }
}
