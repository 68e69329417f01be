use anyhow::{Context, Result};
use sentinel_alerts::{DispatcherConfig, TelegramConfig};
use sentinel_analysis::{EngineSettings, SymbolConfigTable};
use sentinel_feed::FeedConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const ENV_ENDPOINT: &str = "SENTINEL_ENDPOINT";
pub const ENV_TELEGRAM_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_TELEGRAM_CHAT: &str = "TELEGRAM_CHAT_ID";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub analysis: SymbolConfigTable,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub alerts: DispatcherConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents).context("Invalid config YAML")?;
        config
            .analysis
            .validate()
            .context("Invalid analysis section")?;
        Ok(config)
    }

    /// Overlay endpoint and Telegram credentials from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()));
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.feed.endpoint = endpoint;
        }

        let token = lookup(ENV_TELEGRAM_TOKEN);
        let chat = lookup(ENV_TELEGRAM_CHAT);
        match self.telegram.as_mut() {
            Some(telegram) => {
                if let Some(token) = token {
                    telegram.bot_token = token;
                }
                if let Some(chat) = chat {
                    telegram.chat_id = chat;
                }
            }
            None => {
                if let (Some(token), Some(chat)) = (token, chat) {
                    self.telegram = Some(TelegramConfig::new(token, chat));
                }
            }
        }
    }
}
