//! Channel session
//!
//! Calls on a session are serialized through `&mut self`. Ledger events are
//! buffered on the channel's event stream and applied in delivery order
//! before every operation on an open session, or explicitly through
//! [`ChannelSession::process_next_event`]. An operation on a session that is
//! not open fails before any ledger traffic.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use wc_core::traits::{ChannelEvent, ChannelHandle, LedgerClient};
use wc_core::{
    ChannelStatus, LedgerError, SessionError, SessionMachine, SessionNotice, SessionState,
    SessionTrigger, Signer,
};
use wc_protocol::betting::functions;
use wc_protocol::{
    AccountId, Amount, BettingState, CallData, ChannelConfig, ChannelOptions, ContractCallParams,
    ContractRef, GameState, Role,
};

use crate::contract::WAGER_CONTRACT;

/// Buffer size of the notice stream
const NOTICE_BUFFER: usize = 64;

/// One participant's view of a wager channel
pub struct ChannelSession {
    ledger: Arc<dyn LedgerClient>,
    signer: Signer,
    config: ChannelConfig,
    machine: SessionMachine,
    handle: Option<ChannelHandle>,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    contract: Option<ContractRef>,
    betting: Option<BettingState>,
    notices: mpsc::Sender<SessionNotice>,
}

impl ChannelSession {
    /// Create a session and the stream its notices are published on
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        signer: Signer,
        config: ChannelConfig,
    ) -> (Self, mpsc::Receiver<SessionNotice>) {
        let (notices, rx) = mpsc::channel(NOTICE_BUFFER);
        let session = Self {
            ledger,
            signer,
            config,
            machine: SessionMachine::new(),
            handle: None,
            events: None,
            contract: None,
            betting: None,
            notices,
        };
        (session, rx)
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn handle(&self) -> Option<&ChannelHandle> {
        self.handle.as_ref()
    }

    pub fn contract(&self) -> Option<&ContractRef> {
        self.contract.as_ref()
    }

    /// Last contract state snapshot observed
    pub fn betting_state(&self) -> Option<&BettingState> {
        self.betting.as_ref()
    }

    /// Use a contract deployed by the other party.
    ///
    /// The responder learns the contract address out of band.
    pub fn attach_contract(&mut self, contract: ContractRef) {
        tracing::debug!("Attached wager contract {}", contract.address);
        self.contract = Some(contract);
    }

    /// Open the channel, wait for it to become usable and, as initiator,
    /// deploy the wager contract.
    pub async fn init(&mut self) -> Result<(), SessionError> {
        let options = ChannelOptions::fresh(self.config.clone());
        let opened = match self.ledger.open(&options, &self.signer).await {
            Ok(opened) => opened,
            Err(e) => return Err(self.fail(e.into())),
        };
        tracing::info!(
            "Opening channel {} as {:?}",
            opened.handle.channel_id,
            self.config.role
        );
        self.handle = Some(opened.handle);
        self.events = Some(opened.events);

        self.wait_for_open().await?;

        if self.config.role == Role::Initiator {
            self.deploy_contract().await?;
        }
        Ok(())
    }

    async fn wait_for_open(&mut self) -> Result<(), SessionError> {
        let deadline = self.config.terms.open_timeout();
        let waited = tokio::time::timeout(deadline, self.until_open()).await;
        match waited {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Channel open timeout after {:?}", deadline);
                Err(self.fail(SessionError::ChannelOpenTimeout(deadline)))
            }
        }
    }

    async fn until_open(&mut self) -> Result<(), SessionError> {
        while !self.machine.state().is_open() {
            if self.machine.state().is_terminal() {
                return Err(SessionError::ChannelNotOpen(self.machine.state()));
            }
            self.process_next_event().await?;
        }
        Ok(())
    }

    async fn deploy_contract(&mut self) -> Result<(), SessionError> {
        let handle = self.require_handle()?;
        let init = CallData::new(
            functions::INIT,
            vec![
                serde_json::json!(self.config.terms.initiator_id.as_str()),
                serde_json::json!(self.config.terms.responder_id.as_str()),
            ],
        );

        let deployed = match self.ledger.compile(WAGER_CONTRACT).await {
            Ok(bytecode) => {
                self.ledger
                    .deploy(&handle, &bytecode, &init, &self.signer)
                    .await
            }
            Err(e) => Err(e),
        };
        let contract = match deployed {
            Ok(contract) => contract,
            Err(e) => return Err(self.fail(e.into())),
        };

        tracing::info!("Deployed wager contract {}", contract.address);
        self.contract = Some(contract);
        self.refresh_state().await?;
        Ok(())
    }

    /// Place a bet of `amount`
    pub async fn place_bet(&mut self, amount: Amount) -> Result<BettingState, SessionError> {
        self.machine.require_open()?;
        self.sync().await?;
        self.machine.require_open()?;
        let (handle, contract) = self.require_contract()?;

        self.machine.apply(SessionTrigger::BetRequested)?;
        let params = ContractCallParams::new(
            &contract,
            CallData::new(functions::PLACE_BET, Vec::new()),
            amount,
        );
        let outcome = match self.ledger.call(&handle, &params, &self.signer).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(e.into())),
        };

        if !outcome.accepted {
            self.machine.apply(SessionTrigger::BetRejected)?;
            return Err(self.fail(SessionError::BetRejected));
        }

        self.machine.apply(SessionTrigger::BetAccepted)?;
        tracing::info!("Bet of {} accepted", amount);
        self.refresh_state().await
    }

    /// Resolve the game in favour of `winner`
    pub async fn resolve_game(&mut self, winner: &AccountId) -> Result<BettingState, SessionError> {
        self.machine.require_open()?;
        self.sync().await?;
        self.machine.require_open()?;
        let (handle, contract) = self.require_contract()?;

        self.machine.apply(SessionTrigger::ResolveRequested)?;
        let params = ContractCallParams::new(
            &contract,
            CallData::new(functions::RESOLVE, vec![serde_json::json!(winner.as_str())]),
            Amount::ZERO,
        );
        let outcome = match self.ledger.call(&handle, &params, &self.signer).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(e.into())),
        };

        if !outcome.accepted {
            self.machine.apply(SessionTrigger::ResolveRejected)?;
            return Err(self.fail(SessionError::GameResolutionRejected));
        }

        self.machine.apply(SessionTrigger::ResolveAccepted)?;
        tracing::info!("Game resolved, winner {}", winner);
        self.refresh_state().await
    }

    /// Mutually close the channel. Only allowed once the game is complete.
    pub async fn close_channel(&mut self) -> Result<(), SessionError> {
        self.require_closable()?;
        self.sync().await?;
        self.require_closable()?;
        let handle = self.require_handle()?;

        // Without a contract no game was ever started
        let game_state = match self.contract {
            Some(_) => self.query_state().await?.game_state,
            None => GameState::AwaitingBet,
        };
        if game_state != GameState::Complete {
            return Err(SessionError::GameNotComplete(game_state));
        }

        self.machine.apply(SessionTrigger::CloseRequested)?;
        if let Err(e) = self.ledger.shutdown(&handle, &self.signer).await {
            return Err(self.fail(e.into()));
        }
        self.machine.apply(SessionTrigger::ShutdownSigned)?;

        tracing::info!("Channel {} closed", handle.channel_id);
        self.notify(SessionNotice::ChannelClosed {
            channel_id: handle.channel_id,
        });
        Ok(())
    }

    /// Reattach to the same channel after a liveness failure.
    ///
    /// Exactly one attempt is made; failure leaves the session errored.
    pub async fn reconnect(&mut self) -> Result<(), SessionError> {
        let handle = self.require_handle()?;
        self.machine.apply(SessionTrigger::LivenessLost)?;
        tracing::warn!("Reconnecting to channel {}", handle.channel_id);

        let options = ChannelOptions::resuming(
            &self.config,
            handle.channel_id.clone(),
            handle.fsm_id.clone(),
        );
        let source = match self.ledger.open(&options, &self.signer).await {
            Ok(opened) if opened.handle == handle => {
                self.events = Some(opened.events);
                let state = self.machine.apply(SessionTrigger::Reconnected)?;
                tracing::info!("Channel {} reconnected ({})", handle.channel_id, state);
                return Ok(());
            }
            Ok(opened) => LedgerError::new(
                wc_core::LedgerErrorKind::Protocol,
                format!(
                    "ledger resumed {} / {} instead",
                    opened.handle.channel_id, opened.handle.fsm_id
                ),
            ),
            Err(e) => e,
        };

        Err(self.fail(SessionError::ReconnectFailed {
            channel_id: handle.channel_id,
            source,
        }))
    }

    /// Apply every event already delivered, without waiting.
    ///
    /// State changes are coalesced into a single contract query, made only
    /// if the channel is still open once the buffer is drained.
    pub async fn sync(&mut self) -> Result<(), SessionError> {
        let mut stale = false;
        loop {
            let event = match self.events.as_mut() {
                Some(events) => match events.try_recv() {
                    Ok(event) => event,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.stream_ended()?;
                        break;
                    }
                },
                None => break,
            };
            stale |= self.apply_event(event).await?;
        }
        if stale {
            self.refresh_if_open().await?;
        }
        Ok(())
    }

    /// Wait for the next ledger event and apply it
    pub async fn process_next_event(&mut self) -> Result<(), SessionError> {
        let event = match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => return Err(SessionError::ChannelNotOpen(self.machine.state())),
        };
        match event {
            Some(event) => {
                if self.apply_event(event).await? {
                    self.refresh_if_open().await?;
                }
                Ok(())
            }
            None => self.stream_ended(),
        }
    }

    /// Apply one event. Returns `true` when the contract state may have moved.
    async fn apply_event(&mut self, event: ChannelEvent) -> Result<bool, SessionError> {
        match event {
            ChannelEvent::StatusChanged(status) => {
                self.on_status(status)?;
                Ok(false)
            }
            ChannelEvent::StateChanged { signed_tx } => {
                tracing::debug!("Channel state changed: {}", signed_tx.0);
                Ok(true)
            }
            ChannelEvent::Error(err) if self.machine.state().is_terminal() => {
                tracing::debug!("Ignoring error on finished session: {}", err);
                Ok(false)
            }
            ChannelEvent::Error(err) if err.is_liveness_timeout() => {
                tracing::warn!("Channel liveness lost: {}", err);
                self.reconnect().await?;
                Ok(false)
            }
            ChannelEvent::Error(err) => Err(self.fail(err.into())),
        }
    }

    async fn refresh_if_open(&mut self) -> Result<(), SessionError> {
        if self.contract.is_some() && self.machine.state().is_open() {
            self.refresh_state().await?;
        }
        Ok(())
    }

    fn on_status(&mut self, status: ChannelStatus) -> Result<(), SessionError> {
        tracing::debug!("Channel status: {}", status);
        let state = self.machine.state();
        match status {
            ChannelStatus::Open if state == SessionState::Initializing => {
                self.machine.apply(SessionTrigger::ChannelOpened)?;
                if let Some(handle) = &self.handle {
                    self.notify(SessionNotice::ChannelOpen {
                        channel_id: handle.channel_id.clone(),
                    });
                }
            }
            ChannelStatus::Closed if !state.is_terminal() => {
                self.machine.apply(SessionTrigger::RemoteClosed)?;
                if let Some(handle) = &self.handle {
                    self.notify(SessionNotice::ChannelClosed {
                        channel_id: handle.channel_id.clone(),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn stream_ended(&mut self) -> Result<(), SessionError> {
        if self.machine.state().is_terminal() {
            return Ok(());
        }
        Err(self.fail(LedgerError::transport("channel event stream ended").into()))
    }

    /// Query the contract and record the snapshot
    async fn refresh_state(&mut self) -> Result<BettingState, SessionError> {
        let snapshot = self.query_state().await?;
        self.record_snapshot(snapshot.clone());
        Ok(snapshot)
    }

    async fn query_state(&self) -> Result<BettingState, SessionError> {
        let contract = self.contract.as_ref().ok_or(SessionError::ContractMissing)?;
        let value = self
            .ledger
            .query(contract, functions::GET_STATE, &[])
            .await?;
        let state = serde_json::from_value(value).map_err(LedgerError::from)?;
        Ok(state)
    }

    /// Keep the snapshot unless it is older than the one already seen
    fn record_snapshot(&mut self, snapshot: BettingState) {
        if let Some(current) = &self.betting {
            if snapshot.game_state < current.game_state {
                tracing::warn!(
                    "Ignoring stale contract state {} (already at {})",
                    snapshot.game_state,
                    current.game_state
                );
                return;
            }
        }
        self.notify(SessionNotice::StateUpdate(snapshot.clone()));
        self.betting = Some(snapshot);
    }

    /// Closing needs an open channel, with or without a game result
    fn require_closable(&self) -> Result<(), SessionError> {
        match self.machine.state() {
            SessionState::Open | SessionState::Complete => Ok(()),
            other => Err(SessionError::ChannelNotOpen(other)),
        }
    }

    fn require_handle(&self) -> Result<ChannelHandle, SessionError> {
        self.handle
            .clone()
            .ok_or(SessionError::ChannelNotOpen(self.machine.state()))
    }

    fn require_contract(&self) -> Result<(ChannelHandle, ContractRef), SessionError> {
        let handle = self.require_handle()?;
        let contract = self.contract.clone().ok_or(SessionError::ContractMissing)?;
        Ok((handle, contract))
    }

    /// Move to `Errored` and publish the error
    fn fail(&mut self, err: SessionError) -> SessionError {
        if !self.machine.state().is_terminal() {
            let _ = self.machine.apply(SessionTrigger::Failed);
        }
        tracing::error!("Channel session failed: {}", err);
        self.notify(SessionNotice::Error {
            kind: err.kind(),
            detail: err.to_string(),
        });
        err
    }

    fn notify(&self, notice: SessionNotice) {
        if let Err(e) = self.notices.try_send(notice) {
            tracing::debug!("Dropping session notice: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wc_core::devnet::DevnetLedger;
    use wc_protocol::ChannelTerms;

    fn session() -> (ChannelSession, mpsc::Receiver<SessionNotice>) {
        let bot = Signer::generate();
        let player = Signer::generate();
        let config = ChannelTerms {
            url: "ws://localhost:3014/channel".to_string(),
            initiator_id: bot.account().clone(),
            responder_id: player.account().clone(),
            initiator_amount: Amount::new(100),
            responder_amount: Amount::new(100),
            push_amount: Amount::ZERO,
            channel_reserve: Amount::new(2),
            ttl: 1000,
            host: "localhost".to_string(),
            port: 3001,
            lock_period: 10,
            state_timeout: 1000,
            debug: None,
        }
        .with_role(Role::Initiator);
        ChannelSession::new(Arc::new(DevnetLedger::new()), bot, config)
    }

    fn snapshot(session: &ChannelSession, game_state: GameState) -> BettingState {
        BettingState {
            player1: session.config.terms.initiator_id.clone(),
            player2: session.config.terms.responder_id.clone(),
            bet_amount: Amount::new(10),
            game_state,
            winner: None,
        }
    }

    #[test]
    fn test_stale_snapshot_is_ignored() {
        let (mut session, mut notices) = session();

        session.record_snapshot(snapshot(&session, GameState::BetPlaced));
        session.record_snapshot(snapshot(&session, GameState::AwaitingBet));

        assert_eq!(
            session.betting_state().unwrap().game_state,
            GameState::BetPlaced
        );
        assert!(matches!(
            notices.try_recv(),
            Ok(SessionNotice::StateUpdate(_))
        ));
        assert!(notices.try_recv().is_err());
    }

    #[test]
    fn test_equal_snapshot_replaces_current() {
        let (mut session, _notices) = session();

        session.record_snapshot(snapshot(&session, GameState::BetPlaced));
        let mut bigger = snapshot(&session, GameState::BetPlaced);
        bigger.bet_amount = Amount::new(20);
        session.record_snapshot(bigger);

        assert_eq!(session.betting_state().unwrap().bet_amount, Amount::new(20));
    }

    #[test]
    fn test_fail_publishes_error_notice() {
        let (mut session, mut notices) = session();

        let err = session.fail(SessionError::BetRejected);
        assert!(matches!(err, SessionError::BetRejected));
        assert_eq!(session.state(), SessionState::Errored);

        match notices.try_recv().unwrap() {
            SessionNotice::Error { kind, .. } => {
                assert_eq!(kind, wc_core::SessionErrorKind::BetRejected)
            }
            other => panic!("unexpected notice: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_operations_before_init() {
        let (mut session, _notices) = session();

        assert!(matches!(
            session.place_bet(Amount::new(1)).await,
            Err(SessionError::ChannelNotOpen(SessionState::Initializing))
        ));
        assert!(matches!(
            session.close_channel().await,
            Err(SessionError::ChannelNotOpen(SessionState::Initializing))
        ));
        assert!(matches!(
            session.process_next_event().await,
            Err(SessionError::ChannelNotOpen(_))
        ));
    }
}
