use std::path::Path;

use async_trait::async_trait;

use crate::{domain::ChatId, Result};

/// Outbound side of the bot: plain text replies and file attachments.
///
/// Telegram is the only implementation; tests use an in-memory recorder.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()>;

    /// Send the file at `path` as a document. The attachment is named after the
    /// file's own name.
    async fn send_document(&self, chat_id: ChatId, path: &Path) -> Result<()>;
}
