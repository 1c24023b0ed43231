//! HTTP faucet client

use async_trait::async_trait;
use std::time::Duration;

use wc_core::traits::{BackendError, FundingBackend};
use wc_protocol::AccountId;

/// Status the faucet answers with for greylisted accounts
const DENYLISTED_STATUS: u16 = 425;

/// Funding backend talking to a public faucet over HTTP
pub struct FaucetClient {
    base_url: String,
    http: reqwest::Client,
}

impl FaucetClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn account_url(&self, address: &AccountId) -> String {
        format!("{}/account/{}", self.base_url, address)
    }
}

#[async_trait]
impl FundingBackend for FaucetClient {
    async fn request_funds(&self, address: &AccountId) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.account_url(address))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == DENYLISTED_STATUS {
            return Err(BackendError::Denylisted);
        }
        if !status.is_success() {
            return Err(BackendError::Transient(format!("faucet answered HTTP {}", status)));
        }

        tracing::debug!("Faucet accepted funding request for {}", address);
        Ok(())
    }
}
