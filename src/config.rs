use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub line: LineConfig,
    pub openai: OpenAiConfig,
    pub news: NewsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LineConfig {
    pub channel_access_token: String,
    pub channel_secret: String,
    pub api_base: String,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_access_token: String::new(),
            channel_secret: String::new(),
            api_base: "https://api.line.me/v2/bot".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Chat-completions model used for per-article news analysis.
    pub chat_model: String,
    /// Legacy text-completions model used for freeform replies.
    pub completion_model: String,
    pub analysis_max_tokens: u32,
    pub reply_max_tokens: u32,
    pub reply_temperature: f32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4".to_string(),
            completion_model: "gpt-3.5-turbo-instruct".to_string(),
            analysis_max_tokens: 2000,
            reply_max_tokens: 500,
            reply_temperature: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NewsConfig {
    pub source_url: String,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            source_url: "https://tw.stock.yahoo.com/tw-market".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5000 }
    }
}

impl Config {
    /// Loads the config file if it exists, then applies environment
    /// overrides. Secrets are normally supplied through the environment
    /// (`CHANNEL_ACCESS_TOKEN`, `CHANNEL_SECRET`, `OPENAI_API_KEY`), so a
    /// missing file is fine.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        if let Ok(token) = std::env::var("CHANNEL_ACCESS_TOKEN") {
            config.line.channel_access_token = token;
        }
        if let Ok(secret) = std::env::var("CHANNEL_SECRET") {
            config.line.channel_secret = secret;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.openai.api_key = key;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port.parse().context("PORT must be a port number")?;
        }

        Ok(config)
    }
}
