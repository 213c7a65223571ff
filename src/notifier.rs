//! Notifier capability
//!
//! A notifier turns a detection state change into an observable event. The
//! concrete notifier is picked from the tagged `[notifier]` configuration.

use crate::config::NotifierConfig;
use crate::home_assistant::HomeAssistantNotifier;
use crate::telegram::TelegramNotifier;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("Broker handshake failed: {0}")]
    Handshake(String),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response status: {0}")]
    Status(u16),

    #[error("Payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Sink for detection state changes.
///
/// Must tolerate repeated calls with the same state. Failures are reported to
/// the caller, which logs them; they never stop detection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, state: bool) -> Result<(), NotifierError>;

    /// Short name used in logs
    fn kind(&self) -> &'static str;
}

/// Notifier that only logs state changes
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, state: bool) -> Result<(), NotifierError> {
        info!("Notified state changed: {}", if state { "ON" } else { "OFF" });
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "log"
    }
}

/// Build the notifier described by `config`.
///
/// Transports that need a handshake (MQTT) complete it here, so a failure is
/// reported before detection starts.
pub async fn build_notifier(config: &NotifierConfig) -> Result<Box<dyn Notifier>, NotifierError> {
    let notifier: Box<dyn Notifier> = match config {
        NotifierConfig::HomeAssistant(ha) => {
            Box::new(HomeAssistantNotifier::connect(ha.clone()).await?)
        }
        NotifierConfig::Telegram(telegram) => Box::new(TelegramNotifier::new(telegram.clone())?),
        NotifierConfig::Log => Box::new(LogNotifier),
    };

    info!("Using {} notifier", notifier.kind());
    Ok(notifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramConfig;

    #[tokio::test]
    async fn test_log_notifier() {
        let notifier = LogNotifier;
        assert!(notifier.notify(true).await.is_ok());
        assert!(notifier.notify(true).await.is_ok());
        assert!(notifier.notify(false).await.is_ok());
        assert_eq!(notifier.kind(), "log");
    }

    #[tokio::test]
    async fn test_build_from_config() {
        let log = build_notifier(&NotifierConfig::Log).await.unwrap();
        assert_eq!(log.kind(), "log");

        let telegram = build_notifier(&NotifierConfig::Telegram(TelegramConfig {
            api_token: "123:abc".to_string(),
            chat_id: "42".to_string(),
            message: "Ring!".to_string(),
        }))
        .await
        .unwrap();
        assert_eq!(telegram.kind(), "telegram");
    }
}
