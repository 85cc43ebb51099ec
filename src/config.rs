use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_analyst_config")]
    pub analyst: AnalystConfig,
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalystConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl AnalystConfig {
    /// Base URL without trailing slashes, ready for path concatenation.
    pub fn effective_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on the platform drain when a termination signal arrives.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bot_token: String::new(),
            allowed_user_ids: Vec::new(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_enabled() -> bool {
    true
}

fn default_analyst_config() -> AnalystConfig {
    AnalystConfig {
        base_url: default_base_url(),
        request_timeout_ms: default_request_timeout_ms(),
    }
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        port: default_port(),
        shutdown_timeout_secs: default_shutdown_timeout_secs(),
    }
}

/// Parse a comma-separated list of numeric user IDs, e.g. `"123, 456"`.
pub fn parse_user_ids(raw: &str) -> Result<Vec<u64>> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .with_context(|| format!("Invalid user ID in whitelist: {}", s))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ids)
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Unset or blank values
    /// fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = get("ANALYST_SERVICE_URL").unwrap_or_else(default_base_url);
        let request_timeout_ms = match get("REQUEST_TIMEOUT") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("Invalid REQUEST_TIMEOUT: {}", v))?,
            None => default_request_timeout_ms(),
        };
        let port = match get("PORT") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT: {}", v))?,
            None => default_port(),
        };
        let shutdown_timeout_secs = match get("SHUTDOWN_TIMEOUT_SECS") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("Invalid SHUTDOWN_TIMEOUT_SECS: {}", v))?,
            None => default_shutdown_timeout_secs(),
        };

        // Anything but a literal "false" keeps Telegram on.
        let enabled = get("TELEGRAM_ENABLED")
            .map(|v| v.trim() != "false")
            .unwrap_or(true);
        let allowed_user_ids = match get("TELEGRAM_WHITELISTED_USER_IDS") {
            Some(v) => parse_user_ids(&v).context("Invalid TELEGRAM_WHITELISTED_USER_IDS")?,
            None => Vec::new(),
        };

        let config = Config {
            analyst: AnalystConfig {
                base_url,
                request_timeout_ms,
            },
            server: ServerConfig {
                port,
                shutdown_timeout_secs,
            },
            telegram: TelegramConfig {
                enabled,
                bot_token: get("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
                allowed_user_ids,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.analyst.base_url.trim().is_empty() {
            bail!("Analyst service base URL must not be empty");
        }
        if self.analyst.request_timeout_ms == 0 {
            bail!("Request timeout must be greater than zero");
        }
        if self.telegram.enabled {
            if self.telegram.bot_token.trim().is_empty() {
                bail!("Telegram bot token is required when Telegram is enabled");
            }
            if self.telegram.allowed_user_ids.is_empty() {
                bail!("At least one whitelisted Telegram user ID is required");
            }
        }
        Ok(())
    }
}
