use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;

use crate::pipeline::{SendError, Sender};

/// Sender backed by the Telegram Bot API. Every send is bounded by a timeout;
/// a timed-out send reports a failure like any other.
pub struct TelegramSender {
    bot: Bot,
    timeout: Duration,
}

impl TelegramSender {
    pub fn new(bot: Bot, timeout: Duration) -> Self {
        Self { bot, timeout }
    }
}

#[async_trait]
impl Sender for TelegramSender {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        let request = self.bot.send_message(ChatId(chat_id), text);
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(SendError::new(e.to_string())),
            Err(_) => Err(SendError::new(format!(
                "send to chat {chat_id} timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}
