//! Channel session state machine
//!
//! Both the bot service and the player client drive one [`SessionMachine`]
//! per channel. The machine only validates and records transitions; the
//! side effects (ledger calls, pool bookkeeping, notices) belong to the
//! owner.
//!
//! ```text
//! Initializing -> Open -> {BetPlacing, Resolving} -> Complete -> Closing -> Closed
//!        \________ any non-terminal ________/
//!                 |                \
//!            Reconnecting        Errored
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SessionError;

/// Lifecycle state of a channel session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for the channel to report `open`
    Initializing,
    /// Channel open, no call outstanding
    Open,
    /// Bet call outstanding
    BetPlacing,
    /// Resolution call outstanding
    Resolving,
    /// Game resolved, channel may be closed
    Complete,
    /// Mutual shutdown in progress
    Closing,
    /// Channel closed
    Closed,
    /// Resuming after a liveness failure
    Reconnecting,
    /// Unrecoverable failure
    Errored,
}

impl SessionState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }

    /// Whether the channel is open (with or without a game result)
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            SessionState::Open
                | SessionState::BetPlacing
                | SessionState::Resolving
                | SessionState::Complete
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Initializing => "initializing",
            SessionState::Open => "open",
            SessionState::BetPlacing => "bet_placing",
            SessionState::Resolving => "resolving",
            SessionState::Complete => "complete",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Something that moves a session between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTrigger {
    /// Ledger reported status `open`
    ChannelOpened,
    BetRequested,
    BetAccepted,
    BetRejected,
    ResolveRequested,
    ResolveAccepted,
    ResolveRejected,
    CloseRequested,
    /// Mutual shutdown transaction signed by both sides
    ShutdownSigned,
    /// Ledger reported status `closed` without a local close request
    RemoteClosed,
    /// Ping to the counterparty timed out
    LivenessLost,
    Reconnected,
    /// Unrecoverable failure of any kind
    Failed,
}

impl SessionTrigger {
    fn name(&self) -> &'static str {
        match self {
            SessionTrigger::ChannelOpened => "channel_opened",
            SessionTrigger::BetRequested => "bet_requested",
            SessionTrigger::BetAccepted => "bet_accepted",
            SessionTrigger::BetRejected => "bet_rejected",
            SessionTrigger::ResolveRequested => "resolve_requested",
            SessionTrigger::ResolveAccepted => "resolve_accepted",
            SessionTrigger::ResolveRejected => "resolve_rejected",
            SessionTrigger::CloseRequested => "close_requested",
            SessionTrigger::ShutdownSigned => "shutdown_signed",
            SessionTrigger::RemoteClosed => "remote_closed",
            SessionTrigger::LivenessLost => "liveness_lost",
            SessionTrigger::Reconnected => "reconnected",
            SessionTrigger::Failed => "failed",
        }
    }
}

/// Transition validator for one channel session
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    /// State interrupted by a liveness failure, restored on reconnect
    interrupted: Option<SessionState>,
}

impl SessionMachine {
    /// Create a machine in the `Initializing` state
    pub fn new() -> Self {
        Self {
            state: SessionState::Initializing,
            interrupted: None,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Fail with `ChannelNotOpen` unless the session is `Open`
    pub fn require_open(&self) -> Result<(), SessionError> {
        if self.state == SessionState::Open {
            Ok(())
        } else {
            Err(SessionError::ChannelNotOpen(self.state))
        }
    }

    /// Apply a trigger, returning the new state
    pub fn apply(&mut self, trigger: SessionTrigger) -> Result<SessionState, SessionError> {
        use SessionState as S;
        use SessionTrigger as T;

        let from = self.state;
        if from.is_terminal() {
            return Err(self.invalid(trigger));
        }

        let next = match (from, trigger) {
            (S::Initializing, T::ChannelOpened) => S::Open,
            // Duplicate open notifications leave an open session untouched
            (s, T::ChannelOpened) if s.is_open() => s,

            (S::Open, T::BetRequested) => S::BetPlacing,
            (S::BetPlacing, T::BetAccepted) => S::Open,
            (S::BetPlacing, T::BetRejected) => S::Errored,

            (S::Open, T::ResolveRequested) => S::Resolving,
            (S::Resolving, T::ResolveAccepted) => S::Complete,
            (S::Resolving, T::ResolveRejected) => S::Errored,

            (S::Open | S::Complete, T::CloseRequested) => S::Closing,
            (S::Closing, T::ShutdownSigned) => S::Closed,
            (_, T::RemoteClosed) => S::Closed,

            (S::Reconnecting, T::LivenessLost) => return Err(self.invalid(trigger)),
            (s, T::LivenessLost) => {
                self.interrupted = Some(s);
                S::Reconnecting
            }
            (S::Reconnecting, T::Reconnected) => {
                self.interrupted.take().unwrap_or(S::Initializing)
            }

            (_, T::Failed) => S::Errored,

            (s, T::BetRequested | T::ResolveRequested | T::CloseRequested) => {
                return Err(SessionError::ChannelNotOpen(s));
            }
            _ => return Err(self.invalid(trigger)),
        };

        if next != from {
            tracing::trace!("Session transition {} -> {} ({})", from, next, trigger.name());
        }
        self.state = next;
        Ok(next)
    }

    fn invalid(&self, trigger: SessionTrigger) -> SessionError {
        SessionError::InvalidTransition {
            from: self.state,
            trigger: trigger.name(),
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}
