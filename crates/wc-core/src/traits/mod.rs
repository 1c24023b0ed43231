//! Capability traits for external collaborators

mod funding;
mod ledger;

pub use funding::{BackendError, FundingBackend, FundingSource};
pub use ledger::{
    Bytecode, CallOutcome, ChannelEvent, ChannelHandle, LedgerClient, OpenedChannel, SignedTx,
};
