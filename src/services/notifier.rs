// src/services/notifier.rs

//! Alert delivery.
//!
//! One alert fans out to every destination concurrently. A failing
//! destination never affects the others; callers get one report each.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::NotifierConfig;

/// Outcome of delivering one alert to one destination.
#[derive(Debug)]
pub struct DeliveryReport {
    pub destination: String,
    pub result: Result<()>,
}

impl DeliveryReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Delivers alert text to external destinations.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` to a single destination.
    async fn deliver(&self, text: &str, destination: &str) -> Result<()>;

    /// Deliver `text` to every destination in parallel.
    async fn send(&self, text: &str, destinations: &[String]) -> Vec<DeliveryReport> {
        join_all(destinations.iter().map(|destination| async move {
            DeliveryReport {
                destination: destination.clone(),
                result: self.deliver(text, destination).await,
            }
        }))
        .await
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// Telegram Bot API adapter; destinations are chat ids.
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
}

impl TelegramNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(AppError::config("notifier.bot_token is empty"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
        })
    }
}

impl std::fmt::Debug for TelegramNotifier {
    // The endpoint embeds the bot token.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier").finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, text: &str, destination: &str) -> Result<()> {
        let body = SendMessage {
            chat_id: destination,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::delivery(destination, e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::delivery(
                destination,
                format!("Telegram API returned {}: {}", status, detail.trim()),
            ));
        }

        log::debug!("Alert delivered to {}", destination);
        Ok(())
    }
}
