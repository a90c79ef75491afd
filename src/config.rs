use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

const TOKEN_PLACEHOLDER: &str = "PASTE_YOUR_BOT_TOKEN_HERE";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL the webhook is registered under. Usually supplied via
    /// the PUBLIC_URL environment variable on hosted platforms.
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForwardConfig {
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_port() -> u16 {
    8010
}

fn default_token_file() -> PathBuf {
    PathBuf::from("relaybot_token.txt")
}

fn default_rules_path() -> PathBuf {
    PathBuf::from("relaybot_rules.json")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("relaybot_forward.log")
}

fn default_send_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            rules_path: default_rules_path(),
            log_path: default_log_path(),
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist.
    /// PORT and PUBLIC_URL environment variables override the file either way.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "No config file at {}, using built-in defaults",
                    path.display()
                );
                Config::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(url) = std::env::var("PUBLIC_URL") {
            if !url.trim().is_empty() {
                self.server.public_url = Some(url);
            }
        }
    }
}

/// Read the one-line bot token file. If the file is missing, a placeholder is
/// written so the operator knows exactly where the token belongs, and startup
/// fails with instructions.
pub fn load_token(path: &Path) -> Result<String> {
    if !path.exists() {
        std::fs::write(path, TOKEN_PLACEHOLDER)
            .with_context(|| format!("Failed to create token file: {}", path.display()))?;
        bail!(
            "Paste your Telegram bot token into {} and restart",
            path.display()
        );
    }

    let token = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file: {}", path.display()))?
        .trim()
        .to_string();

    if token.is_empty() || token == TOKEN_PLACEHOLDER {
        bail!(
            "Token file {} does not contain a real token yet",
            path.display()
        );
    }
    Ok(token)
}
