//! Per-channel lifecycle task
//!
//! One task per channel consumes the ledger's event stream in delivery
//! order and drives the bot's [`SessionMachine`] for that channel. It keeps
//! the pool in step with the channel status, returns the bot's funds when
//! the channel closes, and gives every liveness failure a single reconnect
//! attempt.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wc_core::traits::{ChannelEvent, ChannelHandle, OpenedChannel};
use wc_core::{
    ChannelStatus, LedgerError, LedgerErrorKind, SessionError, SessionMachine, SessionState,
    SessionTrigger, Signer,
};
use wc_protocol::{ChannelConfig, ChannelOptions};

use crate::state::{ServiceEvent, ServiceState};

/// Owner of one open channel on the service side
pub struct SessionLifecycle {
    state: Arc<ServiceState>,
    config: ChannelConfig,
    bot: Signer,
    handle: ChannelHandle,
    events: mpsc::Receiver<ChannelEvent>,
    machine: SessionMachine,
}

impl SessionLifecycle {
    pub fn new(
        state: Arc<ServiceState>,
        config: ChannelConfig,
        bot: Signer,
        opened: OpenedChannel,
    ) -> Self {
        Self {
            state,
            config,
            bot,
            handle: opened.handle,
            events: opened.events,
            machine: SessionMachine::new(),
        }
    }

    /// State of the bot's side of the channel
    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    /// Run the lifecycle on its own task.
    ///
    /// The task ends with `Ok` once the channel closes or the service shuts
    /// down, and with the session error otherwise.
    pub fn spawn(mut self) -> JoinHandle<Result<(), SessionError>> {
        tokio::spawn(async move { self.run().await })
    }

    /// Consume events until the channel is finished
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let cancel = self.state.cancel.clone();
        tracing::debug!("Lifecycle started for channel {}", self.handle.channel_id);

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Lifecycle for {} stopped by shutdown", self.handle.channel_id);
                    return Ok(());
                }
                event = self.events.recv() => event,
            };

            match event {
                Some(ChannelEvent::StatusChanged(status)) => {
                    if self.on_status(status).await {
                        return Ok(());
                    }
                }
                Some(ChannelEvent::StateChanged { signed_tx }) => {
                    tracing::trace!("Channel {} state changed: {}", self.handle.channel_id, signed_tx.0);
                }
                Some(ChannelEvent::Error(err)) if err.is_liveness_timeout() => {
                    self.reconnect(err).await?;
                }
                Some(ChannelEvent::Error(err)) => {
                    return Err(self.fail(SessionError::LedgerCallFailed(err)).await);
                }
                None => {
                    let err = LedgerError::new(LedgerErrorKind::Transport, "event stream ended");
                    return Err(self.fail(SessionError::LedgerCallFailed(err)).await);
                }
            }
        }
    }

    /// Handle a status change. Returns `true` when the channel is finished.
    async fn on_status(&mut self, status: ChannelStatus) -> bool {
        tracing::debug!("Channel {} status: {}", self.handle.channel_id, status);
        match status {
            ChannelStatus::Open => {
                self.transition(SessionTrigger::ChannelOpened);
                if self.state.pool.add(self.handle.clone()) {
                    self.state.publish(ServiceEvent::ChannelOpened {
                        channel_id: self.handle.channel_id.clone(),
                    });
                }
                false
            }
            ChannelStatus::Closed => {
                self.transition(SessionTrigger::RemoteClosed);
                self.return_funds().await;
                self.state.pool.remove(&self.handle.channel_id);
                self.state.publish(ServiceEvent::ChannelClosed {
                    channel_id: self.handle.channel_id.clone(),
                });
                true
            }
            _ => false,
        }
    }

    /// Single reconnect attempt for one liveness failure
    async fn reconnect(&mut self, cause: LedgerError) -> Result<(), SessionError> {
        let channel_id = self.handle.channel_id.clone();
        tracing::warn!("Channel {} lost liveness ({}), reconnecting", channel_id, cause);
        self.transition(SessionTrigger::LivenessLost);

        let options = ChannelOptions::resuming(
            &self.config,
            self.handle.channel_id.clone(),
            self.handle.fsm_id.clone(),
        );
        let source = match self.state.ledger.open(&options, &self.bot).await {
            Ok(opened) if opened.handle == self.handle => {
                // The old stream is dropped with whatever it still buffered
                self.events = opened.events;
                self.transition(SessionTrigger::Reconnected);
                tracing::info!("Channel {} reconnected", channel_id);
                self.state
                    .publish(ServiceEvent::ChannelReconnected { channel_id });
                return Ok(());
            }
            Ok(opened) => LedgerError::new(
                LedgerErrorKind::Protocol,
                format!(
                    "ledger resumed {} / {} instead",
                    opened.handle.channel_id, opened.handle.fsm_id
                ),
            ),
            Err(e) => e,
        };

        let err = SessionError::ReconnectFailed { channel_id, source };
        tracing::error!("{}", err);
        self.transition(SessionTrigger::Failed);
        self.state.pool.remove(&self.handle.channel_id);
        self.report(&err);
        Err(err)
    }

    /// Fatal failure: shut the channel down best effort and leave the pool.
    ///
    /// The lifecycle ends here, so the `closed` status the shutdown produces
    /// is never read; funds are returned directly after a successful shutdown.
    async fn fail(&mut self, err: SessionError) -> SessionError {
        tracing::error!("Channel {} failed: {}", self.handle.channel_id, err);
        self.transition(SessionTrigger::Failed);

        match self.state.ledger.shutdown(&self.handle, &self.bot).await {
            Ok(()) => self.return_funds().await,
            Err(e) => {
                tracing::warn!("Shutdown of channel {} failed: {}", self.handle.channel_id, e)
            }
        }
        self.state.pool.remove(&self.handle.channel_id);
        self.report(&err);
        err
    }

    /// Best-effort refund of the bot's balance
    async fn return_funds(&self) {
        if let Err(e) = self.state.funding.return_funds(&self.bot).await {
            tracing::warn!(
                "Failed to return funds of {} to the funding source: {}",
                self.bot.account(),
                e
            );
        }
    }

    fn transition(&mut self, trigger: SessionTrigger) {
        if let Err(e) = self.machine.apply(trigger) {
            tracing::debug!("Channel {}: {}", self.handle.channel_id, e);
        }
    }

    fn report(&self, err: &SessionError) {
        self.state.publish(ServiceEvent::SessionFailed {
            channel_id: self.handle.channel_id.clone(),
            kind: err.kind(),
            detail: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funding::FundingService;
    use wc_core::config::ServiceConfig;
    use wc_core::devnet::DevnetLedger;
    use wc_core::traits::LedgerClient;
    use wc_protocol::{AccountId, Role};

    async fn open_lifecycle() -> (Arc<DevnetLedger>, SessionLifecycle, AccountId) {
        let config = ServiceConfig::default();
        let ledger = Arc::new(DevnetLedger::new());
        let funding = FundingService::new(config.funding.clone(), ledger.clone());
        let (tx, _rx) = mpsc::channel(64);
        let state = Arc::new(ServiceState::new(
            config,
            ledger.clone(),
            Arc::new(funding),
            tx,
        ));

        let bot = Signer::generate();
        let player = Signer::generate();
        let channel = state.config.channel.build(
            Role::Initiator,
            bot.account().clone(),
            player.account().clone(),
            "localhost",
            3001,
        );
        let opened = ledger
            .open(&ChannelOptions::fresh(channel.clone()), &bot)
            .await
            .unwrap();
        let account = bot.account().clone();
        (ledger, SessionLifecycle::new(state, channel, bot, opened), account)
    }

    #[tokio::test]
    async fn test_remote_close_ends_closed() {
        let (ledger, mut lifecycle, bot) = open_lifecycle().await;
        assert_eq!(lifecycle.state(), SessionState::Initializing);

        ledger.close_remote(&lifecycle.handle.channel_id);
        lifecycle.run().await.unwrap();

        assert_eq!(lifecycle.state(), SessionState::Closed);
        assert_eq!(ledger.reclaimed(), vec![bot]);
        assert!(lifecycle.state.pool.is_empty());
    }

    #[tokio::test]
    async fn test_fatal_error_shuts_down_and_returns_funds() {
        let (ledger, mut lifecycle, bot) = open_lifecycle().await;
        let channel_id = lifecycle.handle.channel_id.clone();

        ledger.emit(
            &channel_id,
            ChannelEvent::Error(LedgerError::rejected("counterparty misbehaved")),
        );
        let err = lifecycle.run().await.unwrap_err();

        assert!(matches!(err, SessionError::LedgerCallFailed(_)));
        assert_eq!(lifecycle.state(), SessionState::Errored);
        assert_eq!(ledger.channel_status(&channel_id), Some(ChannelStatus::Closed));
        assert_eq!(ledger.reclaimed(), vec![bot]);
        assert!(!lifecycle.state.pool.contains(&channel_id));
    }

    #[tokio::test]
    async fn test_failed_reconnect_ends_errored() {
        let (ledger, mut lifecycle, _bot) = open_lifecycle().await;
        let channel_id = lifecycle.handle.channel_id.clone();

        ledger.fail_reconnects(true);
        ledger.drop_liveness(&channel_id);
        let err = lifecycle.run().await.unwrap_err();

        assert!(matches!(err, SessionError::ReconnectFailed { .. }));
        assert_eq!(lifecycle.state(), SessionState::Errored);
        assert_eq!(ledger.resume_count(), 1);
        assert!(!lifecycle.state.pool.contains(&channel_id));
    }
}
