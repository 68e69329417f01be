//! Telegram Bot API sink
//!
//! Sends plain-text messages with `sendMessage`.
//! Documentation: https://core.telegram.org/bots/api#sendmessage

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AlertError, AlertResult};
use crate::sink::NotificationSink;

/// Public Bot API host
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram credentials and client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather
    pub bot_token: String,

    /// Target chat id (user, group or channel)
    pub chat_id: String,

    /// API host, overridable for tests and proxies
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// HTTP timeout in seconds
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

fn default_api_base() -> String {
    TELEGRAM_API_BASE.to_string()
}

fn default_timeout_sec() -> u64 {
    10
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_base: default_api_base(),
            timeout_sec: default_timeout_sec(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

/// Sink posting to a Telegram chat
pub struct TelegramSink {
    config: TelegramConfig,
    client: Client,
}

impl TelegramSink {
    /// Create a new Telegram sink
    pub fn new(config: TelegramConfig) -> AlertResult<Self> {
        if config.bot_token.trim().is_empty() || config.chat_id.trim().is_empty() {
            return Err(AlertError::ConfigError(
                "Telegram bot token and chat id are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_sec))
            .build()
            .map_err(|e| AlertError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, text: &str) -> AlertResult<()> {
        let request = SendMessageRequest {
            chat_id: &self.config.chat_id,
            text,
        };

        let response = self
            .client
            .post(self.send_message_url())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AlertError::SinkRejected {
                sink: self.name().to_string(),
                message: error_text,
                code: Some(status.as_u16()),
            });
        }

        let body: ApiResponse = response.json().await?;
        if !body.ok {
            return Err(AlertError::SinkRejected {
                sink: self.name().to_string(),
                message: body.description.unwrap_or_else(|| "ok=false".to_string()),
                code: body.error_code,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sink_for(server: &MockServer) -> TelegramSink {
        TelegramSink::new(TelegramConfig::new("123:ABC", "42").with_api_base(server.uri())).unwrap()
    }

    #[test]
    fn test_requires_credentials() {
        assert!(TelegramSink::new(TelegramConfig::new("", "42")).is_err());
        assert!(TelegramSink::new(TelegramConfig::new("123:ABC", " ")).is_err());
    }

    #[tokio::test]
    async fn test_send_posts_chat_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:ABC/sendMessage"))
            .and(body_json(serde_json::json!({ "chat_id": "42", "text": "R_100 UPTREND BUY" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": { "message_id": 7 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        sink_for(&server).send("R_100 UPTREND BUY").await.unwrap();
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        match sink_for(&server).send("hello").await {
            Err(AlertError::SinkRejected { code, message, .. }) => {
                assert_eq!(code, Some(429));
                assert!(message.contains("Too Many Requests"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ok_false_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let err = sink_for(&server).send("hello").await.unwrap_err();
        assert!(matches!(err, AlertError::SinkRejected { code: Some(400), .. }));
        assert!(!err.is_retryable());
    }
}
