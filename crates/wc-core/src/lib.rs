//! wc-core: Core abstractions and configuration for wager channels
//!
//! This crate provides the error taxonomy, the channel session state
//! machine, the capability traits for the ledger and funding collaborators,
//! configuration structures, and an in-process devnet ledger shared by the
//! bot service, the player client and their tests.

pub mod config;
pub mod devnet;
pub mod error;
pub mod identity;
pub mod session;
pub mod traits;
pub mod types;

pub use error::{FundingError, LedgerError, LedgerErrorKind, SessionError, SessionErrorKind};
pub use identity::Signer;
pub use session::{SessionMachine, SessionState, SessionTrigger};
pub use types::{ChannelStatus, SessionNotice};
