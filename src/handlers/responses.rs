use std::time::Duration;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode, ReplyParameters};
use teloxide::{ApiError, RequestError};
use tracing::{debug, warn};

use crate::config::CONFIG;

pub const TECHNICAL_ERROR_MESSAGE: &str =
    "⚠️ A technical error occurred while talking to the model, please ask again 🙏.";

const TRUNCATION_NOTE: &str = "...\n\n(Response was truncated due to length)";
const STREAMING_SUFFIX: &str = " …";

/// Cuts `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_for_telegram(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_NOTE.chars().count());
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_NOTE);
    truncated
}

/// Partial answer shown while the stream is still running.
pub fn streaming_preview(text: &str, max_chars: usize) -> String {
    let keep = max_chars.saturating_sub(STREAMING_SUFFIX.chars().count());
    let mut preview: String = text.trim_end().chars().take(keep).collect();
    preview.push_str(STREAMING_SUFFIX);
    preview
}

/// Rejected Markdown fails the same way every time, so it goes straight to the fallback.
fn is_retryable_edit_error(err: &RequestError) -> bool {
    !matches!(err, RequestError::Api(ApiError::CantParseEntities(_)))
}

async fn edit_text_with_retry(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    text: &str,
    parse_mode: Option<ParseMode>,
) -> Result<()> {
    let mut delay = Duration::from_secs_f32(1.5);
    for attempt in 0..3 {
        let request = bot.edit_message_text(chat_id, message_id, text.to_string());
        let request = if let Some(mode) = parse_mode {
            request.parse_mode(mode)
        } else {
            request
        };

        match request.await {
            Ok(_) => return Ok(()),
            Err(err) => {
                if attempt == 2 || !is_retryable_edit_error(&err) {
                    return Err(err.into());
                }
                warn!("edit_message_text failed: {err}");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }

    Ok(())
}

/// Final render of an answer into the placeholder message.
#[allow(deprecated)]
pub async fn send_response(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    response: &str,
) -> Result<()> {
    let text = truncate_for_telegram(response, CONFIG.telegram_max_length);

    if let Err(err) =
        edit_text_with_retry(bot, chat_id, message_id, &text, Some(ParseMode::Markdown)).await
    {
        warn!("Failed to send formatted response, retrying as plain text: {err}");
        edit_text_with_retry(bot, chat_id, message_id, &text, None).await?;
    }

    Ok(())
}

/// Single best-effort edit used while streaming.
pub async fn show_partial(bot: &Bot, chat_id: ChatId, message_id: MessageId, text: &str) {
    let preview = streaming_preview(text, CONFIG.telegram_max_length);
    if let Err(err) = bot.edit_message_text(chat_id, message_id, preview).await {
        debug!("Skipped streaming edit: {err}");
    }
}

pub async fn reply_text(bot: &Bot, message: &Message, text: &str) -> Result<Message> {
    let sent = bot
        .send_message(message.chat.id, text)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(sent)
}

pub async fn reply_markdown(bot: &Bot, message: &Message, text: &str) -> Result<Message> {
    #[allow(deprecated)]
    let formatted = bot
        .send_message(message.chat.id, text)
        .parse_mode(ParseMode::Markdown)
        .reply_parameters(ReplyParameters::new(message.id))
        .await;
    match formatted {
        Ok(sent) => Ok(sent),
        Err(err) => {
            warn!("Failed to send formatted reply, retrying as plain text: {err}");
            reply_text(bot, message, text).await
        }
    }
}
