//! wc-service: Coordinator daemon for wager state channels
//!
//! The service mints an ephemeral bot identity per game, funds the bot and
//! the player, opens a channel as initiator and hands the player a join
//! invitation. One lifecycle task per channel keeps the channel pool in sync
//! with the ledger and recovers from liveness failures.

pub mod api;
pub mod channel;
pub mod funding;
pub mod orchestrator;
pub mod state;

pub use channel::ChannelPool;
pub use funding::FundingService;
pub use orchestrator::{GameSession, SessionOrchestrator};
pub use state::{ServiceEvent, ServiceState};
