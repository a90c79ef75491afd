use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::activity::{ActivityLog, LogEntry};
use crate::matcher::{self, MatchOutcome};
use crate::rules::RuleStore;

/// Failure detail from an outbound send. Sends either succeed or carry a
/// human-readable reason; the pipeline branches on this value instead of on
/// propagated faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendError {
    pub detail: String,
}

impl SendError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.detail)
    }
}

impl std::error::Error for SendError {}

/// Capability to deliver one message to one chat.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), SendError>;
}

/// One decoded inbound event, stripped down to what the pipeline needs.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    pub text: Option<String>,
    /// User ids just added to the chat, when the event reports a join.
    pub new_member_ids: Vec<i64>,
}

/// Everything the pipeline touches: the send capability, the rule store and
/// the activity log. Passed explicitly into every entry point; there is no
/// module-level bot state.
pub struct Context {
    pub sender: Arc<dyn Sender>,
    pub rules: RuleStore,
    pub log: ActivityLog,
    /// The bot's own user id, for detecting that it was added to a chat.
    pub bot_id: i64,
}

/// Handle one inbound event to its terminal state in a single pass.
///
/// No retries anywhere: a forward is attempted exactly once, its outcome is
/// recorded, and the originating chat is told what happened. Unmatched
/// ordinary traffic is ignored without logging.
pub async fn handle_event(ctx: &Context, event: InboundEvent) -> Result<()> {
    // Join greeting: disclose the chat id so operators can configure rules.
    // Independent of the rule store and matcher.
    if event.new_member_ids.contains(&ctx.bot_id) {
        let greeting = format!(
            "✅ I was added to this chat!\nChat id: {}",
            event.chat_id
        );
        reply(ctx, event.chat_id, &greeting).await;
        return Ok(());
    }

    let Some(text) = event.text.as_deref() else {
        // Text-less events (stickers, membership churn, ...) need no action.
        return Ok(());
    };

    debug!(
        chat_id = event.chat_id,
        sender_id = ?event.sender_id,
        text,
        "inbound message"
    );

    let rules = ctx.rules.load().await?;

    match matcher::match_message(&rules, event.chat_id, text) {
        MatchOutcome::NoMatch => Ok(()),
        MatchOutcome::MissingPayload { command } => {
            debug!(command, "command without payload");
            reply(ctx, event.chat_id, "The command must be followed by text!").await;
            Ok(())
        }
        MatchOutcome::Matched {
            command,
            target_chat_id,
            payload,
        } => {
            forward(ctx, &event, &command, target_chat_id, &payload).await
        }
    }
}

/// Attempt the forward, record the outcome, and acknowledge the sender.
async fn forward(
    ctx: &Context,
    event: &InboundEvent,
    command: &str,
    target_chat_id: i64,
    payload: &str,
) -> Result<()> {
    // The destination sees the same command context as the source.
    let forwarded = format!("{command} {payload}");

    match ctx.sender.send(target_chat_id, &forwarded).await {
        Ok(()) => {
            info!(command, from = event.chat_id, to = target_chat_id, "forwarded");
            ctx.log
                .append(&LogEntry::success(command, event.chat_id, payload, target_chat_id))
                .await?;
            reply(ctx, event.chat_id, "✅ Forwarded!").await;
        }
        Err(e) => {
            warn!(command, from = event.chat_id, to = target_chat_id, error = %e, "forward failed");
            ctx.log
                .append(&LogEntry::failure(
                    command,
                    event.chat_id,
                    payload,
                    target_chat_id,
                    &e.detail,
                ))
                .await?;
            reply(ctx, event.chat_id, &format!("Forwarding error: {e}")).await;
        }
    }
    Ok(())
}

/// Best-effort reply to the originating chat; a failed acknowledgment never
/// fails the pipeline.
async fn reply(ctx: &Context, chat_id: i64, text: &str) {
    if let Err(e) = ctx.sender.send(chat_id, text).await {
        warn!(chat_id, error = %e, "failed to reply to originating chat");
    }
}
