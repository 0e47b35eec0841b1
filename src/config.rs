use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::BotError;
use crate::handlers::texts::Texts;

/// How inbound events reach the bot. Fixed for the lifetime of the process.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Polling,
    Webhook,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Polling => write!(f, "polling"),
            DeliveryMode::Webhook => write!(f, "webhook"),
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "poll" => Ok(DeliveryMode::Polling),
            "webhook" => Ok(DeliveryMode::Webhook),
            other => anyhow::bail!("Unknown delivery mode '{}' (expected polling or webhook)", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub texts: Texts,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Destination for startup/shutdown notices, fault alerts and media forwards.
    #[serde(default)]
    pub admin_chat_id: Option<i64>,
    #[serde(default)]
    pub mode: DeliveryMode,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL the platform pushes updates to (webhook mode only).
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_media_dir")]
    pub directory: PathBuf,
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    100
}

fn default_backoff_secs() -> u64 {
    5
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("media")
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            admin_chat_id: None,
            mode: DeliveryMode::default(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_poll_timeout_secs(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_url: None,
            webhook_path: default_webhook_path(),
            webhook_secret: None,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            directory: default_media_dir(),
        }
    }
}

impl PollingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Config {
    /// Load the TOML file at `path` (all defaults if it does not exist), then
    /// apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `KEY=value` overrides. Bad values are logged and ignored; an
    /// unparsable admin id disables the admin channel.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = var("TELEGRAM_API_KEY") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(raw) = var("ADMIN_CHAT_ID") {
            match raw.trim().parse::<i64>() {
                Ok(id) => self.telegram.admin_chat_id = Some(id),
                Err(_) => {
                    warn!("ADMIN_CHAT_ID '{}' is not a chat id, admin notifications disabled", raw);
                    self.telegram.admin_chat_id = None;
                }
            }
        }
        if let Some(raw) = var("BOT_MODE") {
            match raw.parse() {
                Ok(mode) => self.telegram.mode = mode,
                Err(e) => warn!("{}; staying in {} mode", e, self.telegram.mode),
            }
        }
        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(raw) = var("PORT") {
            match raw.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Invalid PORT '{}', using {}", raw, self.server.port),
            }
        }
        if let Some(url) = var("WEBHOOK_URL") {
            self.server.webhook_url = Some(url);
        }
        if let Some(path) = var("WEBHOOK_PATH") {
            self.server.webhook_path = path;
        }
        if let Some(secret) = var("WEBHOOK_SECRET") {
            self.server.webhook_secret = Some(secret);
        }
        if let Some(dir) = var("MEDIA_DIR") {
            self.media.directory = PathBuf::from(dir);
        }
    }

    /// The bot token, or `CredentialMissing` when it is unset or blank.
    pub fn bot_token(&self) -> Result<&str, BotError> {
        self.telegram
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(BotError::CredentialMissing)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
