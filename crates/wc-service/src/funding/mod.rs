//! Account funding
//!
//! Session accounts are funded either straight from a pre-funded source
//! account on a local node, or by asking an external faucet. The faucet is
//! flaky by nature, so backend requests retry with a linear backoff; a
//! denylisted account is never retried.

mod backoff;
mod faucet;

pub use backoff::LinearBackoff;
pub use faucet::FaucetClient;

use std::sync::Arc;
use tokio::sync::Mutex;

use wc_core::config::{FundingConfig, FundingMode};
use wc_core::traits::{BackendError, FundingBackend, FundingSource};
use wc_core::{FundingError, LedgerError, Signer};
use wc_protocol::AccountId;

/// Funds session accounts and takes unspent balances back
pub struct FundingService {
    config: FundingConfig,
    source: Arc<dyn FundingSource>,
    backend: Option<Arc<dyn FundingBackend>>,
    /// Serializes nonce lookup and spend on the source account
    spend_lock: Mutex<()>,
}

impl FundingService {
    /// Funding service without an external backend
    pub fn new(config: FundingConfig, source: Arc<dyn FundingSource>) -> Self {
        Self {
            config,
            source,
            backend: None,
            spend_lock: Mutex::new(()),
        }
    }

    /// Attach the backend used in backend mode
    pub fn with_backend(mut self, backend: Arc<dyn FundingBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn mode(&self) -> FundingMode {
        self.config.mode
    }

    /// Fund an account according to the configured mode
    pub async fn fund(&self, address: &AccountId) -> Result<(), FundingError> {
        match (self.config.mode, &self.backend) {
            (FundingMode::Local, _) => self.fund_from_source(address).await,
            (FundingMode::Backend, Some(backend)) => {
                self.fund_through_backend(backend.as_ref(), address).await
            }
            (FundingMode::Backend, None) => Err(FundingError::Source(LedgerError::rejected(
                "backend funding mode without a funding backend",
            ))),
        }
    }

    async fn fund_from_source(&self, address: &AccountId) -> Result<(), FundingError> {
        let _guard = self.spend_lock.lock().await;

        let nonce = self.source.next_nonce().await?;
        self.source.spend(address, self.config.amount, nonce).await?;

        tracing::info!(
            "Funded account {} with {} from {}",
            address,
            self.config.amount,
            self.source.source_account()
        );
        Ok(())
    }

    async fn fund_through_backend(
        &self,
        backend: &dyn FundingBackend,
        address: &AccountId,
    ) -> Result<(), FundingError> {
        let budget = self.config.max_retries.max(1);
        let mut backoff = LinearBackoff::from_config(&self.config);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match backend.request_funds(address).await {
                Ok(()) => {
                    tracing::info!("Funded account {} through faucet", address);
                    return Ok(());
                }
                Err(BackendError::Denylisted) => {
                    tracing::error!("Account {} is denylisted by the faucet", address);
                    return Err(FundingError::Denylisted(address.clone()));
                }
                Err(BackendError::Transient(reason)) => {
                    if attempts >= budget {
                        tracing::error!(
                            "Failed to fund account {} through faucet: {}",
                            address,
                            reason
                        );
                        return Err(FundingError::Exhausted {
                            address: address.clone(),
                            attempts,
                            last_error: reason,
                        });
                    }

                    let delay = backoff.next_delay();
                    tracing::warn!(
                        "Faucet is currently unavailable ({}). Retrying at most {} more times in {:?}",
                        reason,
                        budget - attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Move a finished session's unspent balance back to the source account
    pub async fn return_funds(&self, signer: &Signer) -> Result<(), FundingError> {
        self.source.reclaim(signer).await?;
        tracing::info!(
            "{} has returned funds to {}",
            signer.account(),
            self.source.source_account()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::Instant;
    use wc_core::devnet::DevnetLedger;
    use wc_protocol::Amount;

    /// Backend answering from a script and recording when it was asked
    struct ScriptedBackend {
        answers: StdMutex<VecDeque<Result<(), BackendError>>>,
        calls: StdMutex<Vec<Instant>>,
    }

    impl ScriptedBackend {
        fn new(answers: Vec<Result<(), BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: StdMutex::new(answers.into()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FundingBackend for ScriptedBackend {
        async fn request_funds(&self, _address: &AccountId) -> Result<(), BackendError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Transient("script exhausted".into())))
        }
    }

    fn backend_config(max_retries: u32) -> FundingConfig {
        FundingConfig {
            mode: FundingMode::Backend,
            max_retries,
            ..FundingConfig::default()
        }
    }

    fn service(config: FundingConfig, backend: Arc<ScriptedBackend>) -> FundingService {
        FundingService::new(config, Arc::new(DevnetLedger::new())).with_backend(backend)
    }

    fn player() -> AccountId {
        AccountId::parse("ak_player").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_denylisted_fails_fast() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Denylisted)]);
        let funding = service(backend_config(1), backend.clone());

        let start = Instant::now();
        let err = funding.fund(&player()).await.unwrap_err();

        assert!(matches!(err, FundingError::Denylisted(ref a) if a == &player()));
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denylisted_is_never_retried() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::Transient("busy".into())),
            Err(BackendError::Denylisted),
            Ok(()),
        ]);
        let funding = service(backend_config(20), backend.clone());

        let err = funding.fund(&player()).await.unwrap_err();
        assert!(matches!(err, FundingError::Denylisted(_)));
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_budget() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::Transient("busy".into())),
            Err(BackendError::Transient("still busy".into())),
        ]);
        let funding = service(backend_config(2), backend.clone());

        let start = Instant::now();
        let err = funding.fund(&player()).await.unwrap_err();

        match err {
            FundingError::Exhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, "still busy");
            }
            other => panic!("unexpected error: {other}"),
        }

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        // First attempt goes out immediately, the second after the initial delay
        assert_eq!(calls[0] - start, Duration::ZERO);
        assert!(calls[1] - calls[0] > calls[0] - start);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delays_grow() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::Transient("busy".into())),
            Err(BackendError::Transient("busy".into())),
            Err(BackendError::Transient("busy".into())),
            Ok(()),
        ]);
        let funding = service(backend_config(20), backend.clone());

        funding.fund(&player()).await.unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<_> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_makes_one_attempt() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Transient("busy".into()))]);
        let funding = service(backend_config(0), backend.clone());

        let err = funding.fund(&player()).await.unwrap_err();
        assert!(matches!(err, FundingError::Exhausted { attempts: 1, .. }));
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_mode_requires_backend() {
        let funding = FundingService::new(backend_config(1), Arc::new(DevnetLedger::new()));
        assert!(matches!(
            funding.fund(&player()).await,
            Err(FundingError::Source(_))
        ));
    }

    #[tokio::test]
    async fn test_local_funding_spends_configured_amount() {
        let ledger = Arc::new(DevnetLedger::new());
        let config = FundingConfig {
            amount: Amount::new(1_000),
            ..FundingConfig::default()
        };
        let funding = FundingService::new(config, ledger.clone());

        funding.fund(&player()).await.unwrap();
        assert_eq!(ledger.balance(&player()), Amount::new(1_000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_local_spends_use_distinct_nonces() {
        let ledger = Arc::new(DevnetLedger::new());
        let funding = Arc::new(FundingService::new(FundingConfig::default(), ledger.clone()));

        let accounts: Vec<_> = (0..8).map(|_| Signer::generate()).collect();
        let tasks: Vec<_> = accounts
            .iter()
            .map(|signer| {
                let funding = Arc::clone(&funding);
                let address = signer.account().clone();
                tokio::spawn(async move { funding.fund(&address).await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(ledger.spends().len(), 8);
    }

    #[tokio::test]
    async fn test_return_funds() {
        let ledger = Arc::new(DevnetLedger::new());
        let funding = FundingService::new(FundingConfig::default(), ledger.clone());
        let bot = Signer::generate();

        funding.fund(bot.account()).await.unwrap();
        funding.return_funds(&bot).await.unwrap();
        assert_eq!(ledger.reclaimed(), vec![bot.account().clone()]);

        ledger.fail_reclaims(true);
        assert!(funding.return_funds(&bot).await.is_err());
    }
}
