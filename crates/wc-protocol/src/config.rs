//! Channel configuration as exchanged with the ledger and the counterparty
//!
//! A [`ChannelConfig`] is a [`Role`] plus the role-free [`ChannelTerms`].
//! The terms alone are what the initiating side hands to the counterparty as
//! its join invitation; the counterparty adds its own role before opening.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::amount::Amount;
use crate::ids::{AccountId, ChannelId, FsmId};

/// Role of a participant in a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Opens the channel and deploys the wager contract
    Initiator,
    /// Attaches to a channel opened by the initiator
    Responder,
}

/// Everything both participants must agree on before opening a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelTerms {
    /// Channel websocket endpoint of the ledger node
    pub url: String,
    pub initiator_id: AccountId,
    pub responder_id: AccountId,
    pub initiator_amount: Amount,
    pub responder_amount: Amount,
    pub push_amount: Amount,
    pub channel_reserve: Amount,
    /// Transaction time-to-live, in blocks
    pub ttl: u64,
    /// Host the responder listens on
    pub host: String,
    /// Port the responder listens on
    pub port: u16,
    /// Blocks to wait before a solo close settles
    pub lock_period: u64,
    /// How long to wait for the channel to open, in milliseconds
    pub state_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

impl ChannelTerms {
    /// Deadline for the channel to reach the open status
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout)
    }

    /// Attach a role, producing a full channel configuration
    pub fn with_role(self, role: Role) -> ChannelConfig {
        ChannelConfig { role, terms: self }
    }
}

/// Full channel configuration for one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub role: Role,
    #[serde(flatten)]
    pub terms: ChannelTerms,
}

impl ChannelConfig {
    /// Account that signs for this participant
    pub fn own_account(&self) -> &AccountId {
        match self.role {
            Role::Initiator => &self.terms.initiator_id,
            Role::Responder => &self.terms.responder_id,
        }
    }

    /// Strip the role, leaving the invitation the counterparty joins with
    pub fn into_invitation(self) -> ChannelTerms {
        self.terms
    }
}

/// Identity of an existing channel to resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeTarget {
    pub existing_channel_id: ChannelId,
    pub existing_fsm_id: FsmId,
}

/// Options handed to the ledger when opening a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
    #[serde(flatten)]
    config: ChannelConfig,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    resume: Option<ResumeTarget>,
}

impl ChannelOptions {
    /// Options for opening a brand new channel
    pub fn fresh(config: ChannelConfig) -> Self {
        Self {
            config,
            resume: None,
        }
    }

    /// Options for reattaching to an existing channel.
    ///
    /// Takes the configuration of the session being replaced so the party
    /// identities always match the resumed channel.
    pub fn resuming(config: &ChannelConfig, channel_id: ChannelId, fsm_id: FsmId) -> Self {
        Self {
            config: config.clone(),
            resume: Some(ResumeTarget {
                existing_channel_id: channel_id,
                existing_fsm_id: fsm_id,
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn resume(&self) -> Option<&ResumeTarget> {
        self.resume.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_terms() -> ChannelTerms {
        ChannelTerms {
            url: "ws://localhost:3014/channel".to_string(),
            initiator_id: AccountId::parse("ak_bot").unwrap(),
            responder_id: AccountId::parse("ak_player").unwrap(),
            initiator_amount: Amount::new(4_500_000_000_000_000_000),
            responder_amount: Amount::new(4_500_000_000_000_000_000),
            push_amount: Amount::ZERO,
            channel_reserve: Amount::new(2),
            ttl: 1000,
            host: "localhost".to_string(),
            port: 3001,
            lock_period: 10,
            state_timeout: 20_000,
            debug: None,
        }
    }

    #[test]
    fn test_config_uses_wire_field_names() {
        let config = sample_terms().with_role(Role::Initiator);
        let value = serde_json::to_value(&config).unwrap();

        for field in [
            "url",
            "role",
            "initiatorId",
            "responderId",
            "initiatorAmount",
            "responderAmount",
            "pushAmount",
            "channelReserve",
            "ttl",
            "host",
            "port",
            "lockPeriod",
            "stateTimeout",
        ] {
            assert!(value.get(field).is_some(), "missing wire field {field}");
        }
        assert_eq!(value["role"], "initiator");
        assert!(value.get("debug").is_none());
    }

    #[test]
    fn test_invitation_has_no_role() {
        let invitation = sample_terms().with_role(Role::Initiator).into_invitation();
        let value = serde_json::to_value(&invitation).unwrap();
        assert!(value.get("role").is_none());

        let joined = invitation.with_role(Role::Responder);
        assert_eq!(joined.own_account().as_str(), "ak_player");
    }

    #[test]
    fn test_resuming_keeps_identities() {
        let config = sample_terms().with_role(Role::Initiator);
        let options = ChannelOptions::resuming(
            &config,
            ChannelId::parse("ch_1").unwrap(),
            FsmId::parse("fsm_1").unwrap(),
        );

        assert!(options.resume().is_some());
        assert_eq!(options.config(), &config);

        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["existingChannelId"], "ch_1");
        assert_eq!(value["existingFsmId"], "fsm_1");
        assert_eq!(value["initiatorId"], "ak_bot");
    }

    #[test]
    fn test_fresh_options_omit_resume_fields() {
        let options = ChannelOptions::fresh(sample_terms().with_role(Role::Responder));
        let value = serde_json::to_value(&options).unwrap();
        assert!(value.get("existingChannelId").is_none());
        assert!(options.resume().is_none());
    }

    #[test]
    fn test_open_timeout_is_millis() {
        assert_eq!(sample_terms().open_timeout(), Duration::from_secs(20));
    }
}
