//! Game session setup
//!
//! The orchestrator is the single entry point for starting a game: it mints
//! the bot identity, funds both parties, opens the channel as initiator and
//! spawns the channel's lifecycle task.

use std::sync::Arc;
use tokio::task::JoinHandle;

use wc_core::traits::ChannelHandle;
use wc_core::{SessionError, Signer};
use wc_protocol::{AccountId, ChannelOptions, ChannelTerms, Role};

use crate::channel::SessionLifecycle;
use crate::state::ServiceState;

/// A game session handed back to the caller
#[derive(Debug)]
pub struct GameSession {
    /// Terms the player joins with, as responder
    pub invitation: ChannelTerms,
    /// Channel opened by the bot
    pub channel: ChannelHandle,
    /// Lifecycle task of the channel
    pub lifecycle: JoinHandle<Result<(), SessionError>>,
}

/// Sets up game sessions against the ledger
pub struct SessionOrchestrator {
    state: Arc<ServiceState>,
}

impl SessionOrchestrator {
    pub fn new(state: Arc<ServiceState>) -> Self {
        Self { state }
    }

    /// Fund a fresh bot and the player, then open a channel between them.
    ///
    /// Nothing is opened when funding either party fails.
    pub async fn generate_game_session(
        &self,
        player: AccountId,
        host: impl Into<String>,
        port: u16,
    ) -> Result<GameSession, SessionError> {
        let bot = Signer::generate();
        let host = host.into();
        tracing::info!(
            "Generating game session: bot {} vs player {} at {}:{}",
            bot.account(),
            player,
            host,
            port
        );

        let funding = &self.state.funding;
        futures::try_join!(funding.fund(bot.account()), funding.fund(&player))?;

        let config = self.state.config.channel.build(
            Role::Initiator,
            bot.account().clone(),
            player,
            host,
            port,
        );
        let opened = self
            .state
            .ledger
            .open(&ChannelOptions::fresh(config.clone()), &bot)
            .await?;
        let channel = opened.handle.clone();
        tracing::info!("Opened channel {} as initiator", channel.channel_id);

        let lifecycle =
            SessionLifecycle::new(Arc::clone(&self.state), config.clone(), bot, opened).spawn();

        Ok(GameSession {
            invitation: config.into_invitation(),
            channel,
            lifecycle,
        })
    }
}
