//! Protocol error types

use thiserror::Error;

/// Errors raised while parsing wire values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Identifier is missing its prefix or has an empty body
    #[error("Invalid {kind} identifier: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    /// Amount is not a non-negative integer
    #[error("Invalid amount: {0:?}")]
    InvalidAmount(String),

    /// Game state discriminant outside the known range
    #[error("Unknown game state: {0}")]
    UnknownGameState(u8),
}
