//! Core error types for wager channels

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use wc_protocol::{AccountId, ChannelId, GameState, ProtocolError};

use crate::session::SessionState;

/// Failure category reported by the ledger client boundary.
///
/// Lifecycle handling dispatches on this value; the message is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerErrorKind {
    /// The counterparty or node stopped answering pings
    LivenessTimeout,
    /// The ledger refused the request
    Rejected,
    /// The connection to the ledger node failed
    Transport,
    /// Unknown channel, contract or entrypoint
    NotFound,
    /// Malformed data crossed the boundary
    Protocol,
}

impl fmt::Display for LedgerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerErrorKind::LivenessTimeout => write!(f, "liveness timeout"),
            LedgerErrorKind::Rejected => write!(f, "rejected"),
            LedgerErrorKind::Transport => write!(f, "transport"),
            LedgerErrorKind::NotFound => write!(f, "not found"),
            LedgerErrorKind::Protocol => write!(f, "protocol"),
        }
    }
}

/// Error produced by a ledger client or funding source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct LedgerError {
    pub kind: LedgerErrorKind,
    pub message: String,
}

impl LedgerError {
    pub fn new(kind: LedgerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn liveness_timeout(message: impl Into<String>) -> Self {
        Self::new(LedgerErrorKind::LivenessTimeout, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(LedgerErrorKind::Rejected, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(LedgerErrorKind::Transport, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(LedgerErrorKind::NotFound, message)
    }

    pub fn is_liveness_timeout(&self) -> bool {
        self.kind == LedgerErrorKind::LivenessTimeout
    }
}

impl From<ProtocolError> for LedgerError {
    fn from(err: ProtocolError) -> Self {
        Self::new(LedgerErrorKind::Protocol, err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(LedgerErrorKind::Protocol, err.to_string())
    }
}

/// Funding-related errors
#[derive(Error, Debug)]
pub enum FundingError {
    /// The funding backend refused the account for policy reasons
    #[error("Account {0} is denylisted by the funding backend")]
    Denylisted(AccountId),

    /// Every attempt allowed by the retry budget failed
    #[error("Funding {address} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        address: AccountId,
        attempts: u32,
        last_error: String,
    },

    /// The local funding source failed
    #[error("Funding source error: {0}")]
    Source(#[from] LedgerError),
}

/// Session-level errors, shared by the bot service and the player client
#[derive(Error, Debug)]
pub enum SessionError {
    /// The channel did not report `open` within the state timeout
    #[error("Channel did not open within {0:?}")]
    ChannelOpenTimeout(Duration),

    /// Operation requires an open channel
    #[error("Channel is not open (session is {0})")]
    ChannelNotOpen(SessionState),

    /// The counterparty rejected the bet
    #[error("Bet placement rejected")]
    BetRejected,

    /// The counterparty rejected the resolution
    #[error("Game resolution rejected")]
    GameResolutionRejected,

    /// Closing requires a completed game
    #[error("Game not complete (game state is {0})")]
    GameNotComplete(GameState),

    /// The single reconnect attempt after a liveness failure failed
    #[error("Reconnect of channel {channel_id} failed: {source}")]
    ReconnectFailed {
        channel_id: ChannelId,
        #[source]
        source: LedgerError,
    },

    /// No wager contract is known for this session yet
    #[error("No wager contract attached to the session")]
    ContractMissing,

    /// Trigger not valid in the current session state
    #[error("Invalid session transition: {trigger} while {from}")]
    InvalidTransition {
        from: SessionState,
        trigger: &'static str,
    },

    /// Funding either party failed
    #[error("Funding failed: {0}")]
    Funding(#[from] FundingError),

    /// Passthrough of a ledger client failure
    #[error("Ledger call failed: {0}")]
    LedgerCallFailed(#[from] LedgerError),

    /// Malformed wire data
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Flat classification of [`SessionError`] for notices and status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    ChannelOpenTimeout,
    ChannelNotOpen,
    BetRejected,
    GameResolutionRejected,
    GameNotComplete,
    ReconnectFailed,
    ContractMissing,
    InvalidTransition,
    FundingExhausted,
    FundingDenylisted,
    FundingSource,
    LedgerCallFailed,
    Protocol,
}

impl SessionError {
    /// Classify this error
    pub fn kind(&self) -> SessionErrorKind {
        match self {
            SessionError::ChannelOpenTimeout(_) => SessionErrorKind::ChannelOpenTimeout,
            SessionError::ChannelNotOpen(_) => SessionErrorKind::ChannelNotOpen,
            SessionError::BetRejected => SessionErrorKind::BetRejected,
            SessionError::GameResolutionRejected => SessionErrorKind::GameResolutionRejected,
            SessionError::GameNotComplete(_) => SessionErrorKind::GameNotComplete,
            SessionError::ReconnectFailed { .. } => SessionErrorKind::ReconnectFailed,
            SessionError::ContractMissing => SessionErrorKind::ContractMissing,
            SessionError::InvalidTransition { .. } => SessionErrorKind::InvalidTransition,
            SessionError::Funding(FundingError::Exhausted { .. }) => {
                SessionErrorKind::FundingExhausted
            }
            SessionError::Funding(FundingError::Denylisted(_)) => {
                SessionErrorKind::FundingDenylisted
            }
            SessionError::Funding(FundingError::Source(_)) => SessionErrorKind::FundingSource,
            SessionError::LedgerCallFailed(_) => SessionErrorKind::LedgerCallFailed,
            SessionError::Protocol(_) => SessionErrorKind::Protocol,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_funding_errors_keep_their_kind() {
        let account = AccountId::parse("ak_player").unwrap();

        let denied: SessionError = FundingError::Denylisted(account.clone()).into();
        assert_eq!(denied.kind(), SessionErrorKind::FundingDenylisted);

        let exhausted: SessionError = FundingError::Exhausted {
            address: account,
            attempts: 2,
            last_error: "HTTP 503".to_string(),
        }
        .into();
        assert_eq!(exhausted.kind(), SessionErrorKind::FundingExhausted);
    }

    #[test]
    fn test_ledger_error_display() {
        let err = LedgerError::liveness_timeout("no pong within 10s");
        assert!(err.is_liveness_timeout());
        assert_eq!(err.to_string(), "liveness timeout: no pong within 10s");
    }
}
