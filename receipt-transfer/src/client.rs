//! Fetches one miner's receipt page over HTTP. A 404 means the page has
//! no receipts yet and is treated as empty, not an error (SPEC_FULL.md
//! §4-add).

use std::time::Duration;

use async_trait::async_trait;
use compute_validator_common::ids::Hotkey;
use reqwest::Client;

use crate::error::{ReceiptTransferError, ReceiptTransferResult};
use crate::page::Page;

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Raw newline-delimited signed-receipt body for `(miner, page)`, or
    /// `None` if the miner has nothing for that page.
    async fn fetch_page(&self, miner: &Hotkey, page: Page) -> ReceiptTransferResult<Option<String>>;
}

/// Each miner exposes its receipts at `{base_url}/receipts/page/{page}`
/// (spec.md §6, SPEC_FULL.md §4.6-add), mirroring the teacher's plain-JSON
/// HTTP client pattern (`ai_miner::daemon_client::DaemonClient`).
pub struct HttpPageFetcher {
    client: Client,
    miner_base_url: Box<dyn Fn(&Hotkey) -> String + Send + Sync>,
}

impl HttpPageFetcher {
    pub fn new(
        request_timeout: Duration,
        miner_base_url: impl Fn(&Hotkey) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(request_timeout)
                .build()
                .expect("reqwest client configuration is always valid"),
            miner_base_url: Box::new(miner_base_url),
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, miner: &Hotkey, page: Page) -> ReceiptTransferResult<Option<String>> {
        let url = format!("{}/receipts/page/{page}", (self.miner_base_url)(miner));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ReceiptTransferError::Timeout
                } else {
                    ReceiptTransferError::Transport(err.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ReceiptTransferError::Transport(format!(
                "miner returned status {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|err| ReceiptTransferError::Transport(err.to_string()))?;
        Ok(Some(body))
    }
}
