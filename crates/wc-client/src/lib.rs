//! wc-client: Player-side wager channel session
//!
//! A [`ChannelSession`] drives one channel from either side: it opens the
//! channel, deploys the wager contract when it is the initiator, places and
//! resolves bets, and closes the channel once the game is complete.
//! Liveness failures get one reconnect attempt each.

pub mod contract;
pub mod session;

pub use session::ChannelSession;
