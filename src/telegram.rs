//! Telegram bot notifier
//!
//! Sends the configured message to a chat when a detection starts. The end of
//! an alert is not reported.

use crate::config::TelegramConfig;
use crate::notifier::{Notifier, NotifierError};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, PartialEq)]
struct SendMessage {
    chat_id: String,
    text: String,
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    url: String,
    message: SendMessage,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self, NotifierError> {
        Self::with_base_url(config, API_BASE)
    }

    /// Notifier targeting another Bot API server
    pub fn with_base_url(config: TelegramConfig, base_url: &str) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            url: format!(
                "{}/bot{}/sendMessage",
                base_url.trim_end_matches('/'),
                config.api_token
            ),
            message: SendMessage {
                chat_id: config.chat_id,
                text: config.message,
            },
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, state: bool) -> Result<(), NotifierError> {
        if !state {
            return Ok(());
        }

        let response = self.client.post(&self.url).json(&self.message).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifierError::Status(status.as_u16()));
        }

        debug!("Notified detection");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "telegram"
    }
}
