//! Service configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use wc_protocol::{AccountId, Amount, ChannelConfig, ChannelTerms, Role};

use super::serde_utils::duration_millis;
use crate::error::ConfigError;

/// Configuration for the coordinator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the HTTP API binds to
    pub bind_address: String,

    /// How session accounts get funded
    pub funding: FundingConfig,

    /// Terms used for every channel the service opens
    pub channel: ChannelDefaults,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            funding: FundingConfig::default(),
            channel: ChannelDefaults::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = super::default_config_path();
        let path = path.unwrap_or(&default_path);

        match super::load_config(path) {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Reject combinations that cannot work at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.funding.mode == FundingMode::Backend && self.funding.backend_url.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "funding.backend_url is required in backend mode".to_string(),
            ));
        }
        if self.channel.state_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "channel.state_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where session funds come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingMode {
    /// Spend from a pre-funded account on a local node
    Local,
    /// Ask an external faucet over HTTP
    Backend,
}

impl std::str::FromStr for FundingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(FundingMode::Local),
            "backend" => Ok(FundingMode::Backend),
            other => Err(ConfigError::Invalid(format!("unknown funding mode: {}", other))),
        }
    }
}

/// Funding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingConfig {
    pub mode: FundingMode,

    /// Faucet base URL for backend mode
    pub backend_url: String,

    /// Amount spent per account in local mode
    pub amount: Amount,

    /// Maximum number of backend attempts
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,

    /// Added to the delay after every retry
    #[serde(with = "duration_millis")]
    pub retry_increment: Duration,

    /// Timeout for a single backend request
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            mode: FundingMode::Local,
            backend_url: "https://faucet.aepps.com".to_string(),
            amount: Amount::new(10_000_000_000_000_000_000_000_000),
            max_retries: 20,
            retry_delay: Duration::from_secs(1),
            retry_increment: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Channel terms shared by every session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelDefaults {
    /// Channel websocket endpoint of the ledger node
    pub url: String,
    pub push_amount: Amount,
    pub initiator_amount: Amount,
    pub responder_amount: Amount,
    pub channel_reserve: Amount,
    pub ttl: u64,
    pub lock_period: u64,

    /// How long to wait for a channel to open
    #[serde(with = "duration_millis")]
    pub state_timeout: Duration,

    pub debug: bool,
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3014/channel".to_string(),
            push_amount: Amount::ZERO,
            initiator_amount: Amount::new(4_500_000_000_000_000_000),
            responder_amount: Amount::new(4_500_000_000_000_000_000),
            channel_reserve: Amount::new(2),
            ttl: 1000,
            lock_period: 10,
            state_timeout: Duration::from_secs(20),
            debug: false,
        }
    }
}

impl ChannelDefaults {
    /// Build a full channel configuration for one session
    pub fn build(
        &self,
        role: Role,
        initiator_id: AccountId,
        responder_id: AccountId,
        host: impl Into<String>,
        port: u16,
    ) -> ChannelConfig {
        let terms = ChannelTerms {
            url: self.url.clone(),
            initiator_id,
            responder_id,
            initiator_amount: self.initiator_amount,
            responder_amount: self.responder_amount,
            push_amount: self.push_amount,
            channel_reserve: self.channel_reserve,
            ttl: self.ttl,
            host: host.into(),
            port,
            lock_period: self.lock_period,
            state_timeout: u64::try_from(self.state_timeout.as_millis()).unwrap_or(u64::MAX),
            debug: self.debug.then_some(true),
        };
        terms.with_role(role)
    }
}
