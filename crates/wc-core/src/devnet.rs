//! In-process devnet ledger
//!
//! [`DevnetLedger`] plays the role a local ledger node plays during
//! development: it opens channels between two parties, runs the wager
//! contract, and pays session accounts out of a pre-funded faucet account.
//! Every fault the lifecycle code has to survive can be injected by hand.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

use wc_protocol::betting::functions;
use wc_protocol::{
    AccountId, Amount, BettingState, CallData, ChannelId, ChannelOptions, ContractAddress,
    ContractCallParams, ContractRef, FsmId, GameState, Role,
};

use crate::error::LedgerError;
use crate::identity::Signer;
use crate::traits::{
    Bytecode, CallOutcome, ChannelEvent, ChannelHandle, FundingSource, LedgerClient,
    OpenedChannel, SignedTx,
};
use crate::types::ChannelStatus;

/// Buffer size of each per-participant event stream
const EVENT_BUFFER: usize = 64;

/// ABI version reported for contracts deployed on the devnet
const DEVNET_ABI_VERSION: u16 = 3;

/// How the devnet answers a fresh open request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenBehavior {
    /// Walk the status sequence up to `Open` right away
    #[default]
    Immediate,
    /// Connect, then never report `Open`
    Silent,
    /// Refuse the request outright
    Refuse,
}

struct DevnetChannel {
    handle: ChannelHandle,
    initiator: AccountId,
    responder: AccountId,
    status: ChannelStatus,
    round: u64,
    subscribers: HashMap<Role, mpsc::Sender<ChannelEvent>>,
}

impl DevnetChannel {
    fn broadcast(&self, event: ChannelEvent) {
        for (role, tx) in &self.subscribers {
            if let Err(e) = tx.try_send(event.clone()) {
                tracing::debug!(
                    "Dropping devnet event for {:?} on {}: {}",
                    role,
                    self.handle.channel_id,
                    e
                );
            }
        }
    }

    fn is_party(&self, account: &AccountId) -> bool {
        &self.initiator == account || &self.responder == account
    }
}

struct DevnetContract {
    channel_id: ChannelId,
    state: BettingState,
}

#[derive(Default)]
struct DevnetState {
    nonce: u64,
    balances: HashMap<AccountId, Amount>,
    channels: HashMap<ChannelId, DevnetChannel>,
    contracts: HashMap<ContractAddress, DevnetContract>,
    open_behavior: OpenBehavior,
    rejected_functions: HashSet<String>,
    fail_reconnects: bool,
    fail_reclaims: bool,
    opens: usize,
    resumes: usize,
    calls: usize,
    spends: Vec<(AccountId, Amount)>,
    reclaimed: Vec<AccountId>,
}

/// In-process ledger implementing both [`LedgerClient`] and [`FundingSource`]
pub struct DevnetLedger {
    faucet: Signer,
    state: Mutex<DevnetState>,
}

impl Default for DevnetLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl DevnetLedger {
    pub fn new() -> Self {
        Self {
            faucet: Signer::from_secret(Sha256::digest(b"wager-channel devnet faucet").into()),
            state: Mutex::new(DevnetState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, DevnetState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- fault injection ---

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        self.state().open_behavior = behavior;
    }

    /// Make the counterparty refuse every call to `function`
    pub fn reject_function(&self, function: &str) {
        self.state().rejected_functions.insert(function.to_string());
    }

    pub fn fail_reconnects(&self, fail: bool) {
        self.state().fail_reconnects = fail;
    }

    pub fn fail_reclaims(&self, fail: bool) {
        self.state().fail_reclaims = fail;
    }

    /// Push an arbitrary event to every participant of a channel
    pub fn emit(&self, channel_id: &ChannelId, event: ChannelEvent) {
        if let Some(channel) = self.state().channels.get(channel_id) {
            channel.broadcast(event);
        }
    }

    /// Report a ping timeout on a channel
    pub fn drop_liveness(&self, channel_id: &ChannelId) {
        self.emit(
            channel_id,
            ChannelEvent::Error(LedgerError::liveness_timeout("ping timed out")),
        );
    }

    /// Close a channel from the counterparty side
    pub fn close_remote(&self, channel_id: &ChannelId) {
        let mut state = self.state();
        if let Some(channel) = state.channels.get_mut(channel_id) {
            channel.status = ChannelStatus::Closed;
            channel.broadcast(ChannelEvent::StatusChanged(ChannelStatus::Closed));
        }
    }

    // --- inspection ---

    /// Account the devnet faucet pays from
    pub fn faucet_account(&self) -> &AccountId {
        self.faucet.account()
    }

    pub fn open_count(&self) -> usize {
        self.state().opens
    }

    /// Resume attempts, failed ones included
    pub fn resume_count(&self) -> usize {
        self.state().resumes
    }

    pub fn call_count(&self) -> usize {
        self.state().calls
    }

    /// Every faucet payout, in order
    pub fn spends(&self) -> Vec<(AccountId, Amount)> {
        self.state().spends.clone()
    }

    /// Every account whose balance went back to the faucet, in order
    pub fn reclaimed(&self) -> Vec<AccountId> {
        self.state().reclaimed.clone()
    }

    pub fn balance(&self, account: &AccountId) -> Amount {
        self.state()
            .balances
            .get(account)
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    pub fn channel_status(&self, channel_id: &ChannelId) -> Option<ChannelStatus> {
        self.state().channels.get(channel_id).map(|c| c.status)
    }

    /// Current contract state, bypassing the query path
    pub fn contract_state(&self, address: &ContractAddress) -> Option<BettingState> {
        self.state()
            .contracts
            .get(address)
            .map(|c| c.state.clone())
    }

    fn new_handle() -> Result<ChannelHandle, LedgerError> {
        let channel_id = ChannelId::from_bytes(Uuid::new_v4().as_bytes());
        let fsm_id = FsmId::parse(format!("fsm_{}", Uuid::new_v4().simple()))?;
        Ok(ChannelHandle { channel_id, fsm_id })
    }

    fn signed_tx(handle: &ChannelHandle, round: u64) -> SignedTx {
        let digest = Sha256::digest(format!("{}:{}", handle.channel_id, round));
        SignedTx(format!("tx_{}", hex::encode(digest)))
    }
}

/// Run one wager contract entrypoint against `state`.
///
/// Returns `false` when the call is not valid in the current game state.
fn execute(state: &mut BettingState, caller: &AccountId, params: &ContractCallParams) -> bool {
    let is_player = caller == &state.player1 || caller == &state.player2;
    match params.call_data.function.as_str() {
        functions::PLACE_BET if is_player => match state.game_state {
            GameState::AwaitingBet => {
                state.bet_amount = params.amount;
                state.game_state = GameState::BetPlaced;
                true
            }
            GameState::BetPlaced => {
                state.bet_amount = state.bet_amount.saturating_add(params.amount);
                true
            }
            _ => false,
        },
        functions::RESOLVE if state.game_state == GameState::BetPlaced => {
            let winner = params
                .call_data
                .args
                .first()
                .and_then(|v| v.as_str())
                .and_then(|s| AccountId::parse(s).ok());
            match winner {
                Some(w) if w == state.player1 || w == state.player2 => {
                    state.winner = Some(w);
                    state.game_state = GameState::Complete;
                    true
                }
                _ => false,
            }
        }
        functions::GET_STATE => true,
        _ => false,
    }
}

#[async_trait]
impl LedgerClient for DevnetLedger {
    async fn open(
        &self,
        options: &ChannelOptions,
        signer: &Signer,
    ) -> Result<OpenedChannel, LedgerError> {
        let config = options.config();
        if config.own_account() != signer.account() {
            return Err(LedgerError::rejected(format!(
                "signer {} does not match the {:?} account",
                signer.account(),
                config.role
            )));
        }

        let mut state = self.state();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        if let Some(resume) = options.resume() {
            state.resumes += 1;
            if state.fail_reconnects {
                return Err(LedgerError::transport("node unreachable"));
            }
            let channel = state
                .channels
                .get_mut(&resume.existing_channel_id)
                .filter(|c| c.handle.fsm_id == resume.existing_fsm_id)
                .ok_or_else(|| {
                    LedgerError::not_found(format!(
                        "no channel {} with fsm {}",
                        resume.existing_channel_id, resume.existing_fsm_id
                    ))
                })?;
            if channel.status == ChannelStatus::Closed {
                return Err(LedgerError::rejected(format!(
                    "channel {} is closed",
                    resume.existing_channel_id
                )));
            }

            channel.status = ChannelStatus::Open;
            channel.subscribers.insert(config.role, tx.clone());
            let handle = channel.handle.clone();
            // Resumed channels come straight back as open
            let _ = tx.try_send(ChannelEvent::StatusChanged(ChannelStatus::Open));
            tracing::debug!("Devnet resumed channel {}", handle.channel_id);
            return Ok(OpenedChannel { handle, events: rx });
        }

        match state.open_behavior {
            OpenBehavior::Refuse => {
                return Err(LedgerError::rejected("open request refused by node"));
            }
            OpenBehavior::Immediate | OpenBehavior::Silent => {}
        }
        state.opens += 1;

        let terms = &config.terms;
        // Join a half-open channel between the same parties if there is one
        let existing = state
            .channels
            .values()
            .find(|c| {
                c.initiator == terms.initiator_id
                    && c.responder == terms.responder_id
                    && c.status != ChannelStatus::Closed
                    && !c.subscribers.contains_key(&config.role)
            })
            .map(|c| c.handle.channel_id.clone());

        let channel_id = match existing {
            Some(id) => id,
            None => {
                let handle = Self::new_handle()?;
                let id = handle.channel_id.clone();
                state.channels.insert(
                    id.clone(),
                    DevnetChannel {
                        handle,
                        initiator: terms.initiator_id.clone(),
                        responder: terms.responder_id.clone(),
                        status: ChannelStatus::Connected,
                        round: 0,
                        subscribers: HashMap::new(),
                    },
                );
                id
            }
        };

        let behavior = state.open_behavior;
        let channel = state
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| LedgerError::not_found(format!("channel {} vanished", channel_id)))?;
        channel.subscribers.insert(config.role, tx.clone());

        let _ = tx.try_send(ChannelEvent::StatusChanged(ChannelStatus::Connected));
        if behavior == OpenBehavior::Immediate {
            channel.status = ChannelStatus::Open;
            for status in [
                ChannelStatus::Accepted,
                ChannelStatus::Signed,
                ChannelStatus::Open,
            ] {
                let _ = tx.try_send(ChannelEvent::StatusChanged(status));
            }
        }

        tracing::debug!(
            "Devnet opened channel {} for {:?}",
            channel.handle.channel_id,
            config.role
        );
        Ok(OpenedChannel {
            handle: channel.handle.clone(),
            events: rx,
        })
    }

    async fn call(
        &self,
        channel: &ChannelHandle,
        params: &ContractCallParams,
        signer: &Signer,
    ) -> Result<CallOutcome, LedgerError> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.calls += 1;

        let open = state
            .channels
            .get_mut(&channel.channel_id)
            .ok_or_else(|| LedgerError::not_found(format!("no channel {}", channel.channel_id)))?;
        if open.status != ChannelStatus::Open {
            return Err(LedgerError::rejected(format!(
                "channel {} is {}",
                channel.channel_id, open.status
            )));
        }
        if !open.is_party(signer.account()) {
            return Err(LedgerError::rejected("signer is not a channel participant"));
        }

        let contract = state
            .contracts
            .get_mut(&params.contract)
            .filter(|c| c.channel_id == channel.channel_id)
            .ok_or_else(|| LedgerError::not_found(format!("no contract {}", params.contract)))?;

        if state.rejected_functions.contains(&params.call_data.function)
            || !execute(&mut contract.state, signer.account(), params)
        {
            tracing::debug!("Devnet rejected call to {}", params.call_data.function);
            return Ok(CallOutcome {
                accepted: false,
                signed_tx: None,
            });
        }

        open.round += 1;
        let signed_tx = Self::signed_tx(&open.handle, open.round);
        open.broadcast(ChannelEvent::StateChanged {
            signed_tx: signed_tx.clone(),
        });

        Ok(CallOutcome {
            accepted: true,
            signed_tx: Some(signed_tx),
        })
    }

    async fn shutdown(&self, channel: &ChannelHandle, signer: &Signer) -> Result<(), LedgerError> {
        let mut state = self.state();
        let open = state
            .channels
            .get_mut(&channel.channel_id)
            .ok_or_else(|| LedgerError::not_found(format!("no channel {}", channel.channel_id)))?;
        if !open.is_party(signer.account()) {
            return Err(LedgerError::rejected("signer is not a channel participant"));
        }
        if open.status == ChannelStatus::Closed {
            return Err(LedgerError::rejected(format!(
                "channel {} is already closed",
                channel.channel_id
            )));
        }

        open.status = ChannelStatus::Closed;
        open.broadcast(ChannelEvent::StatusChanged(ChannelStatus::Closing));
        open.broadcast(ChannelEvent::StatusChanged(ChannelStatus::Closed));
        Ok(())
    }

    async fn compile(&self, source: &str) -> Result<Bytecode, LedgerError> {
        if source.trim().is_empty() {
            return Err(LedgerError::rejected("empty contract source"));
        }
        Ok(Bytecode(format!("cb_{}", hex::encode(Sha256::digest(source)))))
    }

    async fn deploy(
        &self,
        channel: &ChannelHandle,
        bytecode: &Bytecode,
        init: &CallData,
        signer: &Signer,
    ) -> Result<ContractRef, LedgerError> {
        if !bytecode.0.starts_with("cb_") {
            return Err(LedgerError::rejected("not a compiled contract"));
        }
        if init.function != functions::INIT {
            return Err(LedgerError::rejected(format!(
                "deploy must call {}, got {}",
                functions::INIT,
                init.function
            )));
        }

        let mut guard = self.state();
        let state = &mut *guard;
        let open = state
            .channels
            .get_mut(&channel.channel_id)
            .ok_or_else(|| LedgerError::not_found(format!("no channel {}", channel.channel_id)))?;
        if open.status != ChannelStatus::Open {
            return Err(LedgerError::rejected(format!(
                "channel {} is {}",
                channel.channel_id, open.status
            )));
        }
        if !open.is_party(signer.account()) {
            return Err(LedgerError::rejected("signer is not a channel participant"));
        }

        let address = ContractAddress::from_bytes(Uuid::new_v4().as_bytes());
        state.contracts.insert(
            address.clone(),
            DevnetContract {
                channel_id: channel.channel_id.clone(),
                state: BettingState {
                    player1: open.initiator.clone(),
                    player2: open.responder.clone(),
                    bet_amount: Amount::ZERO,
                    game_state: GameState::AwaitingBet,
                    winner: None,
                },
            },
        );

        open.round += 1;
        let signed_tx = Self::signed_tx(&open.handle, open.round);
        open.broadcast(ChannelEvent::StateChanged { signed_tx });

        Ok(ContractRef {
            address,
            abi_version: DEVNET_ABI_VERSION,
        })
    }

    async fn query(
        &self,
        contract: &ContractRef,
        function: &str,
        _args: &[serde_json::Value],
    ) -> Result<serde_json::Value, LedgerError> {
        let state = self.state();
        let deployed = state
            .contracts
            .get(&contract.address)
            .ok_or_else(|| LedgerError::not_found(format!("no contract {}", contract.address)))?;

        match function {
            functions::GET_STATE => Ok(serde_json::to_value(&deployed.state)?),
            other => Err(LedgerError::not_found(format!(
                "no read-only entrypoint {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl FundingSource for DevnetLedger {
    fn source_account(&self) -> AccountId {
        self.faucet.account().clone()
    }

    async fn next_nonce(&self) -> Result<u64, LedgerError> {
        Ok(self.state().nonce + 1)
    }

    async fn spend(
        &self,
        recipient: &AccountId,
        amount: Amount,
        nonce: u64,
    ) -> Result<(), LedgerError> {
        let mut state = self.state();
        if nonce != state.nonce + 1 {
            return Err(LedgerError::rejected(format!(
                "nonce {} is not the next nonce {}",
                nonce,
                state.nonce + 1
            )));
        }

        state.nonce = nonce;
        let balance = state.balances.entry(recipient.clone()).or_default();
        *balance = balance.saturating_add(amount);
        state.spends.push((recipient.clone(), amount));
        Ok(())
    }

    async fn reclaim(&self, signer: &Signer) -> Result<(), LedgerError> {
        let mut state = self.state();
        if state.fail_reclaims {
            return Err(LedgerError::transport("node unreachable"));
        }

        state.balances.remove(signer.account());
        state.reclaimed.push(signer.account().clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wc_protocol::ChannelTerms;

    fn terms(initiator: &Signer, responder: &Signer) -> ChannelTerms {
        ChannelTerms {
            url: "ws://localhost:3014/channel".to_string(),
            initiator_id: initiator.account().clone(),
            responder_id: responder.account().clone(),
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
    }

    async fn statuses(events: &mut mpsc::Receiver<ChannelEvent>) -> Vec<ChannelStatus> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ChannelEvent::StatusChanged(status) = event {
                seen.push(status);
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_open_walks_to_open() {
        let ledger = DevnetLedger::new();
        let (bot, player) = (Signer::generate(), Signer::generate());
        let options = ChannelOptions::fresh(terms(&bot, &player).with_role(Role::Initiator));

        let mut opened = ledger.open(&options, &bot).await.unwrap();
        assert_eq!(
            statuses(&mut opened.events).await,
            vec![
                ChannelStatus::Connected,
                ChannelStatus::Accepted,
                ChannelStatus::Signed,
                ChannelStatus::Open
            ]
        );
        assert_eq!(ledger.open_count(), 1);
    }

    #[tokio::test]
    async fn test_responder_joins_initiator_channel() {
        let ledger = DevnetLedger::new();
        let (bot, player) = (Signer::generate(), Signer::generate());
        let t = terms(&bot, &player);

        let a = ledger
            .open(&ChannelOptions::fresh(t.clone().with_role(Role::Initiator)), &bot)
            .await
            .unwrap();
        let b = ledger
            .open(&ChannelOptions::fresh(t.with_role(Role::Responder)), &player)
            .await
            .unwrap();
        assert_eq!(a.handle, b.handle);
    }

    #[tokio::test]
    async fn test_open_rejects_foreign_signer() {
        let ledger = DevnetLedger::new();
        let (bot, player) = (Signer::generate(), Signer::generate());
        let options = ChannelOptions::fresh(terms(&bot, &player).with_role(Role::Initiator));

        let err = ledger.open(&options, &player).await.unwrap_err();
        assert_eq!(err.kind, crate::error::LedgerErrorKind::Rejected);
    }

    #[tokio::test]
    async fn test_wager_contract_flow() {
        let ledger = DevnetLedger::new();
        let (bot, player) = (Signer::generate(), Signer::generate());
        let options = ChannelOptions::fresh(terms(&bot, &player).with_role(Role::Initiator));
        let opened = ledger.open(&options, &bot).await.unwrap();

        let bytecode = ledger.compile("contract Wager = ...").await.unwrap();
        let contract = ledger
            .deploy(
                &opened.handle,
                &bytecode,
                &CallData::new(functions::INIT, vec![]),
                &bot,
            )
            .await
            .unwrap();

        let bet = ContractCallParams::new(
            &contract,
            CallData::new(functions::PLACE_BET, vec![]),
            Amount::new(10),
        );
        assert!(ledger.call(&opened.handle, &bet, &bot).await.unwrap().accepted);

        let resolve = ContractCallParams::new(
            &contract,
            CallData::new(functions::RESOLVE, vec![json!(player.account().as_str())]),
            Amount::ZERO,
        );
        assert!(ledger.call(&opened.handle, &resolve, &bot).await.unwrap().accepted);

        let value = ledger
            .query(&contract, functions::GET_STATE, &[])
            .await
            .unwrap();
        let state: BettingState = serde_json::from_value(value).unwrap();
        assert_eq!(state.game_state, GameState::Complete);
        assert_eq!(state.winner.as_ref(), Some(player.account()));
        assert_eq!(state.bet_amount, Amount::new(10));

        // A finished game takes no more bets
        assert!(!ledger.call(&opened.handle, &bet, &bot).await.unwrap().accepted);
    }

    #[tokio::test]
    async fn test_resume_requires_matching_fsm() {
        let ledger = DevnetLedger::new();
        let (bot, player) = (Signer::generate(), Signer::generate());
        let config = terms(&bot, &player).with_role(Role::Initiator);
        let opened = ledger
            .open(&ChannelOptions::fresh(config.clone()), &bot)
            .await
            .unwrap();

        let wrong = ChannelOptions::resuming(
            &config,
            opened.handle.channel_id.clone(),
            FsmId::parse("fsm_other").unwrap(),
        );
        assert!(ledger.open(&wrong, &bot).await.is_err());

        let right = ChannelOptions::resuming(
            &config,
            opened.handle.channel_id.clone(),
            opened.handle.fsm_id.clone(),
        );
        let resumed = ledger.open(&right, &bot).await.unwrap();
        assert_eq!(resumed.handle, opened.handle);
        assert_eq!(ledger.resume_count(), 2);
        assert_eq!(ledger.open_count(), 1);
    }

    #[tokio::test]
    async fn test_spend_checks_nonce() {
        let ledger = DevnetLedger::new();
        let player = Signer::generate();

        let nonce = ledger.next_nonce().await.unwrap();
        ledger
            .spend(player.account(), Amount::new(5), nonce)
            .await
            .unwrap();
        assert!(ledger
            .spend(player.account(), Amount::new(5), nonce)
            .await
            .is_err());
        assert_eq!(ledger.balance(player.account()), Amount::new(5));

        ledger.reclaim(&player).await.unwrap();
        assert_eq!(ledger.balance(player.account()), Amount::ZERO);
        assert_eq!(ledger.reclaimed(), vec![player.account().clone()]);
    }

    #[tokio::test]
    async fn test_shutdown_broadcasts_close() {
        let ledger = DevnetLedger::new();
        let (bot, player) = (Signer::generate(), Signer::generate());
        let options = ChannelOptions::fresh(terms(&bot, &player).with_role(Role::Initiator));
        let mut opened = ledger.open(&options, &bot).await.unwrap();
        statuses(&mut opened.events).await;

        ledger.shutdown(&opened.handle, &bot).await.unwrap();
        assert_eq!(
            statuses(&mut opened.events).await,
            vec![ChannelStatus::Closing, ChannelStatus::Closed]
        );
        assert!(ledger.shutdown(&opened.handle, &bot).await.is_err());
    }
}
