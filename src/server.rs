use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, Redirect};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use teloxide::types::{Update, UpdateKind};
use tracing::{error, info};

use crate::activity::LogEntry;
use crate::pipeline::{self, Context, InboundEvent};
use crate::rules::RuleSet;

/// Admin panel page, embedded at compile time. The panel is plain glue over
/// the JSON state endpoint and the form endpoints below.
const PANEL_HTML: &str = include_str!("../assets/panel.html");

/// How many log entries the panel state endpoint returns.
const PANEL_LOG_LIMIT: usize = 100;

/// Serve the webhook ingress and the admin surface until the process exits.
pub async fn run(ctx: Arc<Context>, port: u16) -> Result<()> {
    let app = router(ctx);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Listening on {addr}");
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn router(ctx: Arc<Context>) -> Router {
    Router::new()
        .route("/", get(serve_panel))
        .route("/api/state", get(api_state))
        .route("/set_chat", post(set_chat))
        .route("/add_command", post(add_command))
        .route("/delete_command", post(delete_command))
        .route("/webhook", post(webhook))
        .with_state(ctx)
}

async fn serve_panel() -> Html<&'static str> {
    Html(PANEL_HTML)
}

// ── Webhook ingress ────────────────────────────────────────────────────────

/// Acknowledge immediately and run the pipeline as an independent task, so a
/// slow forward can never make Telegram retry-storm the endpoint.
async fn webhook(
    State(ctx): State<Arc<Context>>,
    Json(update): Json<Update>,
) -> Json<serde_json::Value> {
    if let Some(event) = decode_update(update) {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = pipeline::handle_event(&ctx, event).await {
                error!("Pipeline error: {:#}", e);
            }
        });
    }
    Json(serde_json::json!({ "ok": true }))
}

/// Strip a Telegram update down to the pipeline's event shape. Updates that
/// are not messages carry nothing to route.
fn decode_update(update: Update) -> Option<InboundEvent> {
    let UpdateKind::Message(msg) = update.kind else {
        return None;
    };
    Some(InboundEvent {
        chat_id: msg.chat.id.0,
        sender_id: msg.from.as_ref().map(|u| u.id.0 as i64),
        text: msg.text().map(str::to_string),
        new_member_ids: msg
            .new_chat_members()
            .map(|users| users.iter().map(|u| u.id.0 as i64).collect())
            .unwrap_or_default(),
    })
}

// ── Administrative surface ─────────────────────────────────────────────────

#[derive(Serialize)]
struct PanelState {
    rules: RuleSet,
    log: Vec<LogEntry>,
}

async fn api_state(State(ctx): State<Arc<Context>>) -> Result<Json<PanelState>, StatusCode> {
    let rules = ctx.rules.load().await.map_err(internal_error)?;
    let log = ctx
        .log
        .recent(PANEL_LOG_LIMIT)
        .await
        .map_err(internal_error)?;
    Ok(Json(PanelState { rules, log }))
}

#[derive(Deserialize)]
struct SetChatForm {
    command: String,
    source_chat_ids: String,
    target_chat_id: i64,
    #[serde(default)]
    title: String,
}

async fn set_chat(
    State(ctx): State<Arc<Context>>,
    Form(form): Form<SetChatForm>,
) -> Result<Redirect, StatusCode> {
    let source_chat_ids =
        parse_chat_ids(&form.source_chat_ids).map_err(|_| StatusCode::BAD_REQUEST)?;
    ctx.rules
        .upsert_rule(
            &form.command,
            source_chat_ids,
            Some(form.target_chat_id),
            &form.title,
        )
        .await
        .map_err(internal_error)?;
    Ok(Redirect::to("/"))
}

#[derive(Deserialize)]
struct CommandForm {
    command: String,
}

async fn add_command(
    State(ctx): State<Arc<Context>>,
    Form(form): Form<CommandForm>,
) -> Result<Redirect, StatusCode> {
    ctx.rules
        .add_command(&form.command)
        .await
        .map_err(internal_error)?;
    Ok(Redirect::to("/"))
}

async fn delete_command(
    State(ctx): State<Arc<Context>>,
    Form(form): Form<CommandForm>,
) -> Result<Redirect, StatusCode> {
    ctx.rules
        .delete_command(&form.command)
        .await
        .map_err(internal_error)?;
    Ok(Redirect::to("/"))
}

/// Parse a comma-separated chat-id list as the panel submits it.
fn parse_chat_ids(raw: &str) -> Result<std::collections::BTreeSet<i64>, std::num::ParseIntError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    error!("Admin request failed: {:#}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
