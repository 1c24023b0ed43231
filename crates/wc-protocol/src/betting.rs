//! Wager contract types
//!
//! The wager contract lives inside the channel. Its state is only ever read
//! through a `get_state` query; calls mutate it on the ledger side.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::amount::Amount;
use crate::error::ProtocolError;
use crate::ids::{AccountId, ContractAddress};

/// Entrypoints of the wager contract
pub mod functions {
    pub const INIT: &str = "init";
    pub const PLACE_BET: &str = "place_bet";
    pub const RESOLVE: &str = "resolve";
    pub const GET_STATE: &str = "get_state";
}

/// Gas budget used for every in-channel contract call
pub const DEFAULT_CALL_GAS: u64 = 50_000;

/// Progress of a game, ordered along the happy path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GameState {
    AwaitingBet = 0,
    BetPlaced = 1,
    Resolving = 2,
    Complete = 3,
}

impl TryFrom<u8> for GameState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GameState::AwaitingBet),
            1 => Ok(GameState::BetPlaced),
            2 => Ok(GameState::Resolving),
            3 => Ok(GameState::Complete),
            other => Err(ProtocolError::UnknownGameState(other)),
        }
    }
}

impl From<GameState> for u8 {
    fn from(state: GameState) -> Self {
        state as u8
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameState::AwaitingBet => write!(f, "awaiting_bet"),
            GameState::BetPlaced => write!(f, "bet_placed"),
            GameState::Resolving => write!(f, "resolving"),
            GameState::Complete => write!(f, "complete"),
        }
    }
}

/// Snapshot of the wager contract state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BettingState {
    pub player1: AccountId,
    pub player2: AccountId,
    pub bet_amount: Amount,
    pub game_state: GameState,
    #[serde(default)]
    pub winner: Option<AccountId>,
}

/// Reference to a contract deployed in a channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRef {
    pub address: ContractAddress,
    pub abi_version: u16,
}

/// Encoded contract call: entrypoint plus JSON arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallData {
    pub function: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl CallData {
    pub fn new(function: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }
}

/// Parameters of one in-channel contract call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCallParams {
    pub amount: Amount,
    pub contract: ContractAddress,
    pub abi_version: u16,
    pub call_data: CallData,
    pub gas: u64,
}

impl ContractCallParams {
    /// Build call parameters against a deployed contract with the default gas budget
    pub fn new(contract: &ContractRef, call_data: CallData, amount: Amount) -> Self {
        Self {
            amount,
            contract: contract.address.clone(),
            abi_version: contract.abi_version,
            call_data,
            gas: DEFAULT_CALL_GAS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_state_is_ordered() {
        assert!(GameState::AwaitingBet < GameState::BetPlaced);
        assert!(GameState::BetPlaced < GameState::Resolving);
        assert!(GameState::Resolving < GameState::Complete);
    }

    #[test]
    fn test_betting_state_decodes_contract_result() {
        let json = r#"{
            "player1": "ak_bot",
            "player2": "ak_player",
            "bet_amount": "100000000000000000",
            "game_state": 3,
            "winner": "ak_player"
        }"#;

        let state: BettingState = serde_json::from_str(json).unwrap();
        assert_eq!(state.game_state, GameState::Complete);
        assert_eq!(state.winner.unwrap().as_str(), "ak_player");
    }

    #[test]
    fn test_unknown_game_state_is_rejected() {
        let json = r#"{"player1":"ak_a","player2":"ak_b","bet_amount":0,"game_state":7}"#;
        assert!(serde_json::from_str::<BettingState>(json).is_err());
    }
}
