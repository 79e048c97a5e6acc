use std::sync::Arc;

use teloxide::prelude::*;

use csvbot_core::{
    domain::{ChatId, UserId},
    workflow::{GREETING, HELP},
};

use super::reply;
use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);
    let (cmd, args) = parse_command(text);
    let workflow = &state.workflow;

    let answer = match cmd.as_str() {
        "start" => GREETING.to_string(),
        "help" => HELP.to_string(),
        "day" => workflow.day_command(user_id, &args).await,
        "unit" => workflow.unit_command(user_id, &args).await,
        "cancel" => workflow.cancel_command(user_id).await,
        other => format!("Неизвестная команда /{other}. Список команд: /help"),
    };

    reply(&state, chat_id, &answer).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_command() {
        assert_eq!(parse_command("/day 99"), ("day".to_string(), "99".to_string()));
        assert_eq!(parse_command("/unit"), ("unit".to_string(), String::new()));
    }

    #[test]
    fn strips_bot_mention_and_case() {
        assert_eq!(
            parse_command("/Day@csv_sort_bot   12 "),
            ("day".to_string(), "12".to_string())
        );
    }

    #[test]
    fn keeps_raw_argument_for_validation() {
        assert_eq!(
            parse_command("/day twelve days"),
            ("day".to_string(), "twelve days".to_string())
        );
    }
}
