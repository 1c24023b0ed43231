//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use wc_protocol::{BettingState, ChannelId};

use crate::error::SessionErrorKind;

/// Channel status as reported by the ledger node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Connected to the node, handshake not started
    Connected,
    /// Counterparty accepted the open request
    Accepted,
    /// Funding transaction signed by both sides
    Signed,
    /// Channel open and usable
    Open,
    /// Mutual shutdown in progress
    Closing,
    /// Channel closed on the ledger
    Closed,
    /// Connection to the node dropped
    Disconnected,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Connected => write!(f, "connected"),
            ChannelStatus::Accepted => write!(f, "accepted"),
            ChannelStatus::Signed => write!(f, "signed"),
            ChannelStatus::Open => write!(f, "open"),
            ChannelStatus::Closing => write!(f, "closing"),
            ChannelStatus::Closed => write!(f, "closed"),
            ChannelStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Session-level notices for UI and ops consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionNotice {
    /// The channel reached the open status
    ChannelOpen { channel_id: ChannelId },

    /// The channel closed
    ChannelClosed { channel_id: ChannelId },

    /// A fresh contract state snapshot was observed
    StateUpdate(BettingState),

    /// The session failed
    Error {
        kind: SessionErrorKind,
        detail: String,
    },
}
