//! wc-protocol: Wire data model for wager state channels
//!
//! This crate defines the values exchanged between the bot service, the
//! player client and the ledger: channel configuration, the join invitation,
//! contract call parameters and the betting state snapshot. Field names
//! follow the ledger's camelCase channel options.

pub mod amount;
pub mod betting;
pub mod config;
pub mod error;
pub mod ids;

pub use amount::Amount;
pub use betting::{BettingState, CallData, ContractCallParams, ContractRef, GameState};
pub use config::{ChannelConfig, ChannelOptions, ChannelTerms, ResumeTarget, Role};
pub use error::ProtocolError;
pub use ids::{AccountId, ChannelId, ContractAddress, FsmId};
