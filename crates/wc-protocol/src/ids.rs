//! Ledger identifiers
//!
//! Accounts, channels and contracts are addressed by prefixed strings
//! (`ak_...`, `ch_...`, `ct_...`). The FSM id of a channel is an opaque
//! token handed out by the ledger node and only needs to be non-empty.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;

macro_rules! ledger_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Prefix every valid value starts with
            pub const PREFIX: &'static str = $prefix;

            /// Parse and validate an identifier
            pub fn parse(value: impl Into<String>) -> Result<Self, ProtocolError> {
                let value = value.into();
                match value.strip_prefix(Self::PREFIX) {
                    Some(body) if !body.is_empty() => Ok(Self(value)),
                    _ => Err(ProtocolError::InvalidIdentifier { kind: $kind, value }),
                }
            }

            /// Build an identifier from raw key bytes (hex-encoded body)
            pub fn from_bytes(bytes: &[u8]) -> Self {
                Self(format!("{}{}", Self::PREFIX, hex::encode(bytes)))
            }

            /// Get the raw identifier string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ProtocolError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

ledger_id!(
    /// Account address of a channel participant
    AccountId,
    "account",
    "ak_"
);

ledger_id!(
    /// On-ledger identity of a state channel
    ChannelId,
    "channel",
    "ch_"
);

ledger_id!(
    /// Address of a contract deployed inside a channel
    ContractAddress,
    "contract",
    "ct_"
);

/// Identifier of the channel's protocol state machine on the ledger node.
///
/// Required, together with the [`ChannelId`], to resume a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FsmId(String);

impl FsmId {
    /// Parse an FSM id; any non-empty token is accepted
    pub fn parse(value: impl Into<String>) -> Result<Self, ProtocolError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ProtocolError::InvalidIdentifier { kind: "fsm", value });
        }
        Ok(Self(value))
    }

    /// Get the raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FsmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FsmId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<FsmId> for String {
    fn from(id: FsmId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_requires_prefix() {
        assert!(AccountId::parse("ak_2swhLkgBPeeADxVTAVCJnZLY5NZtCFiM93JxsEaMuC59euuFRQ").is_ok());
        assert!(AccountId::parse("ct_2swhLkgBPeeADxVTAVCJnZLY5NZtCFiM93JxsEaMuC59euuFRQ").is_err());
        assert!(AccountId::parse("ak_").is_err());
    }

    #[test]
    fn test_from_bytes_is_hex_encoded() {
        let id = ChannelId::from_bytes(&[0xab, 0x01]);
        assert_eq!(id.as_str(), "ch_ab01");
    }

    #[test]
    fn test_deserialize_rejects_wrong_prefix() {
        let ok: Result<ContractAddress, _> = serde_json::from_str(r#""ct_abc""#);
        assert!(ok.is_ok());

        let bad: Result<ContractAddress, _> = serde_json::from_str(r#""ak_abc""#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_fsm_id_rejects_blank() {
        assert!(FsmId::parse("ba_fsm").is_ok());
        assert!(FsmId::parse("  ").is_err());
    }
}
