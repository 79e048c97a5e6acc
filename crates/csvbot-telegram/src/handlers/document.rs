use std::{path::Path, sync::Arc};

use teloxide::{net::Download, prelude::*};
use tokio::io::AsyncWriteExt;

use csvbot_core::{
    domain::{ChatId, UserId},
    workflow::DocumentRoute,
};

use super::reply;
use crate::router::AppState;

fn too_large_message(max_bytes: u64) -> String {
    let mb = max_bytes as f64 / (1024.0 * 1024.0);
    format!("❌ Файл слишком большой. Максимальный размер: {mb:.0} МБ.")
}

async fn download_document(bot: &Bot, file_id: &str, dest: &Path) -> anyhow::Result<()> {
    let file = bot.get_file(file_id.to_string()).await?;
    let mut dst = tokio::fs::File::create(dest).await?;
    bot.download_file(&file.path, &mut dst).await?;
    dst.flush().await?;
    Ok(())
}

pub async fn handle_document(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(doc) = msg.document() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);

    // File size gate.
    let size = doc.file.size as u64;
    if size > state.cfg.max_file_size {
        reply(&state, chat_id, &too_large_message(state.cfg.max_file_size)).await;
        return Ok(());
    }

    let file_name = doc
        .file_name
        .clone()
        .unwrap_or_else(|| "document".to_string());

    let route = match state.workflow.route_document(user_id, &file_name).await {
        Ok(route) => route,
        Err(e) => {
            tracing::warn!("cannot accept {file_name} from user {user_id}: {e}");
            reply(&state, chat_id, &format!("❌ Не удалось принять файл: {e}")).await;
            return Ok(());
        }
    };

    let dest = match &route {
        DocumentRoute::Rejected(text) => {
            reply(&state, chat_id, text).await;
            return Ok(());
        }
        DocumentRoute::Csv { dest } | DocumentRoute::UnitFile { dest } => dest.clone(),
    };

    if let Err(e) = download_document(&bot, &doc.file.id, &dest).await {
        tracing::warn!("download of {file_name} failed: {e}");
        state.workflow.abandon_upload(user_id, &route).await;
        reply(
            &state,
            chat_id,
            &format!(
                "❌ Не удалось скачать файл: {}",
                e.to_string().chars().take(100).collect::<String>()
            ),
        )
        .await;
        return Ok(());
    }

    let res = match route {
        DocumentRoute::Csv { dest } => {
            state
                .workflow
                .handle_csv(chat_id, user_id, &dest, &file_name)
                .await
        }
        DocumentRoute::UnitFile { dest } => {
            state
                .workflow
                .handle_unit_file(chat_id, user_id, dest)
                .await
        }
        DocumentRoute::Rejected(_) => Ok(()),
    };

    if let Err(e) = res {
        tracing::error!("handling {file_name} for user {user_id} failed: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_message_is_in_megabytes() {
        assert_eq!(
            too_large_message(20 * 1024 * 1024),
            "❌ Файл слишком большой. Максимальный размер: 20 МБ."
        );
    }
}
