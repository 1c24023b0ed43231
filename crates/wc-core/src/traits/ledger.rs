//! Ledger client capability

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use wc_protocol::{CallData, ChannelId, ChannelOptions, ContractCallParams, ContractRef, FsmId};

use crate::error::LedgerError;
use crate::identity::Signer;
use crate::types::ChannelStatus;

/// Identity of an open channel on the ledger node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelHandle {
    pub channel_id: ChannelId,
    pub fsm_id: FsmId,
}

/// Signed off-chain transaction, opaque to this crate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx(pub String);

/// Compiled contract bytecode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bytecode(pub String);

/// Event delivered by the ledger for one channel, in delivery order
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The channel status changed
    StatusChanged(ChannelStatus),
    /// A new off-chain state was co-signed
    StateChanged { signed_tx: SignedTx },
    /// The channel reported a failure
    Error(LedgerError),
}

/// A freshly opened (or resumed) channel and its event stream
#[derive(Debug)]
pub struct OpenedChannel {
    pub handle: ChannelHandle,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Result of an in-channel contract call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// Whether the counterparty co-signed the call
    pub accepted: bool,
    pub signed_tx: Option<SignedTx>,
}

/// Capability over the ledger node: channel management and contract calls.
///
/// Implementations sign with the given [`Signer`]; the handshake and the
/// transport to the node are entirely their concern.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Open a channel, or resume one when the options carry a resume target
    async fn open(
        &self,
        options: &ChannelOptions,
        signer: &Signer,
    ) -> Result<OpenedChannel, LedgerError>;

    /// Call a contract inside the channel
    async fn call(
        &self,
        channel: &ChannelHandle,
        params: &ContractCallParams,
        signer: &Signer,
    ) -> Result<CallOutcome, LedgerError>;

    /// Start a mutual shutdown of the channel
    async fn shutdown(&self, channel: &ChannelHandle, signer: &Signer) -> Result<(), LedgerError>;

    /// Compile contract source to bytecode
    async fn compile(&self, source: &str) -> Result<Bytecode, LedgerError>;

    /// Deploy compiled bytecode inside the channel
    async fn deploy(
        &self,
        channel: &ChannelHandle,
        bytecode: &Bytecode,
        init: &CallData,
        signer: &Signer,
    ) -> Result<ContractRef, LedgerError>;

    /// Dry-run a read-only entrypoint and return its decoded result
    async fn query(
        &self,
        contract: &ContractRef,
        function: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, LedgerError>;
}
