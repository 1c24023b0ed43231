//! Global service state

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wc_core::config::ServiceConfig;
use wc_core::traits::LedgerClient;
use wc_core::SessionErrorKind;
use wc_protocol::ChannelId;

use crate::channel::ChannelPool;
use crate::funding::FundingService;

/// Events reported by lifecycle tasks
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    /// A channel reached the open status and was pooled
    ChannelOpened { channel_id: ChannelId },

    /// A channel closed and left the pool
    ChannelClosed { channel_id: ChannelId },

    /// A channel recovered from a liveness failure
    ChannelReconnected { channel_id: ChannelId },

    /// A session ended with an error
    SessionFailed {
        channel_id: ChannelId,
        kind: SessionErrorKind,
        detail: String,
    },
}

/// Global state for the coordinator daemon
pub struct ServiceState {
    /// Configuration
    pub config: ServiceConfig,
    /// Ledger node client
    pub ledger: Arc<dyn LedgerClient>,
    /// Account funding
    pub funding: Arc<FundingService>,
    /// Channels currently open
    pub pool: Arc<ChannelPool>,
    /// Stops lifecycle tasks and the API server
    pub cancel: CancellationToken,
    events: mpsc::Sender<ServiceEvent>,
}

impl ServiceState {
    pub fn new(
        config: ServiceConfig,
        ledger: Arc<dyn LedgerClient>,
        funding: Arc<FundingService>,
        events: mpsc::Sender<ServiceEvent>,
    ) -> Self {
        Self {
            config,
            ledger,
            funding,
            pool: Arc::new(ChannelPool::new()),
            cancel: CancellationToken::new(),
            events,
        }
    }

    /// Publish a service event without waiting on a slow consumer
    pub fn publish(&self, event: ServiceEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::warn!("Failed to publish service event: {}", e);
        }
    }
}
