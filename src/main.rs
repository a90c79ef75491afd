mod activity;
mod config;
mod matcher;
mod pipeline;
mod rules;
mod sender;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::activity::ActivityLog;
use crate::config::Config;
use crate::pipeline::Context;
use crate::rules::RuleStore;
use crate::sender::TelegramSender;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded");
    info!("  Port: {}", config.server.port);
    info!("  Rules: {}", config.storage.rules_path.display());
    info!("  Log: {}", config.storage.log_path.display());

    let token = config::load_token(&config.telegram.token_file)?;
    let bot = Bot::new(token);
    let me = bot
        .get_me()
        .await
        .context("Failed to reach the Telegram API")?;
    info!("Authorized as @{}", me.username());

    // Register the webhook so Telegram delivers updates to this process.
    if let Some(base) = config.server.public_url.as_deref() {
        let webhook_url: url::Url = format!("{}/webhook", base.trim_end_matches('/'))
            .parse()
            .with_context(|| format!("Invalid public URL: {base}"))?;
        bot.set_webhook(webhook_url.clone())
            .drop_pending_updates(true)
            .await
            .context("Failed to register webhook")?;
        info!("Webhook registered: {webhook_url}");
    } else {
        warn!("PUBLIC_URL not set; webhook not registered, updates will not arrive");
    }

    // First load is the corruption gate: a malformed rule file stops startup
    // instead of running with an ambiguous rule set.
    let rules = RuleStore::new(&config.storage.rules_path);
    rules.load().await.context("Failed to load rule set")?;

    let ctx = Arc::new(Context {
        sender: Arc::new(TelegramSender::new(
            bot,
            Duration::from_secs(config.forward.send_timeout_secs),
        )),
        rules,
        log: ActivityLog::new(&config.storage.log_path),
        bot_id: me.user.id.0 as i64,
    });

    info!("Forwarder is starting...");
    server::run(ctx, config.server.port).await
}
