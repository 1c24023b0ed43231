//! Ephemeral participant identities
//!
//! The bot mints a fresh identity for every game session. Only the account
//! id ever leaves the process; the secret is handed to the ledger client,
//! which does the actual transaction signing.

use sha2::{Digest, Sha256};
use std::fmt;

use wc_protocol::AccountId;

/// Signing identity of one channel participant
#[derive(Clone)]
pub struct Signer {
    account: AccountId,
    secret: [u8; 32],
}

impl Signer {
    /// Generate a fresh random identity
    pub fn generate() -> Self {
        Self::from_secret(rand::random())
    }

    /// Rebuild an identity from its secret seed
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let public = Sha256::digest(secret);
        Self {
            account: AccountId::from_bytes(&public),
            secret,
        }
    }

    /// Account address of this identity
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Secret seed, for the ledger client's signing routine
    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identities_differ() {
        let a = Signer::generate();
        let b = Signer::generate();
        assert_ne!(a.account(), b.account());
        assert!(a.account().as_str().starts_with("ak_"));
    }

    #[test]
    fn test_identity_is_deterministic_per_secret() {
        let a = Signer::from_secret([7u8; 32]);
        let b = Signer::from_secret([7u8; 32]);
        assert_eq!(a.account(), b.account());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let signer = Signer::from_secret([1u8; 32]);
        let debug = format!("{:?}", signer);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&hex::encode([1u8; 32])));
    }
}
