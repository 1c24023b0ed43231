//! Funding capabilities

use async_trait::async_trait;
use thiserror::Error;

use wc_protocol::{AccountId, Amount};

use crate::error::LedgerError;
use crate::identity::Signer;

/// Pre-funded ledger account used to fund and refund session identities
#[async_trait]
pub trait FundingSource: Send + Sync {
    /// Account that pays out and receives refunds
    fn source_account(&self) -> AccountId;

    /// Next nonce of the source account
    async fn next_nonce(&self) -> Result<u64, LedgerError>;

    /// Spend from the source account with an explicit nonce
    async fn spend(
        &self,
        recipient: &AccountId,
        amount: Amount,
        nonce: u64,
    ) -> Result<(), LedgerError>;

    /// Move the signer's whole balance back to the source account
    async fn reclaim(&self, signer: &Signer) -> Result<(), LedgerError>;
}

/// Failure answered by an external funding backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Refused for policy reasons; retrying will not help
    #[error("account is denylisted")]
    Denylisted,

    /// Backend unavailable or failing; worth retrying
    #[error("{0}")]
    Transient(String),
}

/// External service that tops up accounts on request
#[async_trait]
pub trait FundingBackend: Send + Sync {
    async fn request_funds(&self, address: &AccountId) -> Result<(), BackendError>;
}
