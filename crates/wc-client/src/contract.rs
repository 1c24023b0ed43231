//! Wager contract source

/// Sophia source of the two-player wager contract.
///
/// `game_state` follows the wire encoding: 0 awaiting bet, 1 bet placed,
/// 2 resolving, 3 complete.
pub const WAGER_CONTRACT: &str = r#"@compiler >= 6

contract Wager =

  record state =
    { player1    : address,
      player2    : address,
      bet_amount : int,
      game_state : int,
      winner     : option(address) }

  entrypoint init(player1 : address, player2 : address) : state =
    { player1    = player1,
      player2    = player2,
      bet_amount = 0,
      game_state = 0,
      winner     = None }

  payable stateful entrypoint place_bet() =
    require(Call.caller == state.player1 || Call.caller == state.player2, "NOT_A_PLAYER")
    require(state.game_state =< 1, "BETTING_CLOSED")
    put(state{ bet_amount @ b = b + Call.value, game_state = 1 })

  stateful entrypoint resolve(winner : address) =
    require(state.game_state == 1, "NO_BET")
    require(winner == state.player1 || winner == state.player2, "NOT_A_PLAYER")
    Chain.spend(winner, Contract.balance)
    put(state{ winner = Some(winner), game_state = 3 })

  entrypoint get_state() : state = state
"#;
