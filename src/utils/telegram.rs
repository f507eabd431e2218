use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatAction;
use tokio::task::JoinHandle;
use tracing::warn;

const TYPING_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(4);

/// Keeps the "typing…" indicator alive until dropped.
pub struct TypingIndicator {
    task_handle: Option<JoinHandle<()>>,
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

pub fn start_typing(bot: Bot, chat_id: ChatId) -> TypingIndicator {
    let task_handle = tokio::spawn(async move {
        loop {
            if let Err(err) = bot.send_chat_action(chat_id, ChatAction::Typing).await {
                warn!("send_chat_action failed: {err}");
            }
            tokio::time::sleep(TYPING_HEARTBEAT_INTERVAL).await;
        }
    });

    TypingIndicator {
        task_handle: Some(task_handle),
    }
}

pub fn message_user_id(message: &Message) -> i64 {
    message
        .from
        .as_ref()
        .and_then(|user| i64::try_from(user.id.0).ok())
        .unwrap_or(message.chat.id.0)
}

pub fn message_text(message: &Message) -> &str {
    message.text().or_else(|| message.caption()).unwrap_or("")
}
