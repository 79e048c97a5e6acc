//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - validates the sender against the allow-list
//! - downloads documents to the path the workflow hands out
//! - calls into the `csvbot-core` workflow and replies

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use csvbot_core::{
    domain::{ChatId, UserId},
    workflow::GREETING,
};

use crate::router::AppState;

mod commands;
mod document;

/// Send a text reply through the workflow's messenger; failures are only logged.
pub(super) async fn reply(state: &AppState, chat_id: ChatId, text: &str) {
    if let Err(e) = state.workflow.messenger().send_text(chat_id, text).await {
        tracing::warn!("failed to reply in chat {chat_id}: {e}");
    }
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = ChatId(msg.chat.id.0);
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    if !state.workflow.admit(chat_id, user_id).await {
        return Ok(());
    }

    // Unit sessions are per user, so a user's updates are handled one at a
    // time even when they come from different chats.
    let _guard = state
        .user_locks
        .lock(user_id.map_or(chat_id.0, |u| u.0))
        .await;

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(msg, state).await;
        }
        reply(&state, chat_id, GREETING).await;
        return Ok(());
    }

    if msg.document().is_some() {
        return document::handle_document(bot, msg, state).await;
    }

    reply(&state, chat_id, "Пришлите CSV файл или команду /help.").await;
    Ok(())
}
