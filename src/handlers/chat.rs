use std::time::Instant;

use anyhow::{anyhow, Result};
use teloxide::prelude::*;
use teloxide::types::MessageId;
use tracing::{error, info, warn};

use crate::classification::ClassificationResult;
use crate::config::CONFIG;
use crate::handlers::access::is_rate_limited;
use crate::handlers::media::{collect_image, has_image};
use crate::handlers::responses::{
    reply_markdown, reply_text, send_response, show_partial, TECHNICAL_ERROR_MESSAGE,
};
use crate::handlers::safety::{blocking_category, RiskMatch};
use crate::llm::{ChatRequest, ImageFile};
use crate::roles::UserRole;
use crate::state::AppState;
use crate::utils::language::reply_language_hint;
use crate::utils::telegram::{message_text, message_user_id, start_typing};
use crate::utils::timing::start_turn_timer;

const PLACEHOLDER_TEXT: &str = "🍄 …";
const RATE_LIMIT_TEXT: &str =
    "You're sending messages too quickly. Please wait a moment before trying again.";

/// What happens to a question before any model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnPlan {
    Refuse(RiskMatch),
    Answer,
}

fn plan_turn(text: &str, role: UserRole) -> TurnPlan {
    match blocking_category(text, role) {
        Some(found) => TurnPlan::Refuse(found),
        None => TurnPlan::Answer,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnswerPlan {
    Summary,
    Stream,
}

/// An image with no question is answered by its identification, when there is one.
fn plan_answer(text: &str, classification: Option<&ClassificationResult>) -> AnswerPlan {
    match classification {
        Some(result) if text.trim().is_empty() && !result.is_empty() => AnswerPlan::Summary,
        _ => AnswerPlan::Stream,
    }
}

/// Text that ends up in the placeholder once the stream is over.
fn final_answer(outcome: &Result<String>) -> Option<&str> {
    match outcome {
        Ok(answer) if !answer.trim().is_empty() => Some(answer.as_str()),
        _ => None,
    }
}

async fn classify(state: &AppState, chat_id: ChatId, image: &ImageFile) -> Option<ClassificationResult> {
    match state.gemini.classify_image(image).await {
        Ok(result) if result.is_empty() => {
            warn!(chat_id = chat_id.0, "Structured classification came back empty");
            None
        }
        Ok(result) => {
            info!(
                chat_id = chat_id.0,
                classification = %result.to_pretty_json(),
                "Structured mushroom info"
            );
            state.remember_classification(chat_id.0, result.clone());
            Some(result)
        }
        Err(err) => {
            warn!(chat_id = chat_id.0, "Structured classification failed: {err}");
            None
        }
    }
}

async fn stream_answer(
    bot: &Bot,
    state: &AppState,
    request: &ChatRequest,
    chat_id: ChatId,
    message_id: MessageId,
) -> Result<String> {
    let mut stream = state.gemini.stream_chat(request).await?;
    let interval = CONFIG.stream_edit_interval();
    let mut answer = String::new();
    let mut shown_len = 0usize;
    let mut last_edit = Instant::now();

    while let Some(delta) = stream.next_delta().await {
        answer.push_str(&delta?);
        if last_edit.elapsed() >= interval && answer.len() != shown_len {
            show_partial(bot, chat_id, message_id, &answer).await;
            shown_len = answer.len();
            last_edit = Instant::now();
        }
    }

    if answer.trim().is_empty() {
        return Err(anyhow!("Gemini returned an empty answer"));
    }
    Ok(answer)
}

/// One chat turn: safety filter, optional classification, streamed answer.
pub async fn handle_chat_message(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let text = message_text(&message).trim().to_string();
    let image_attached = has_image(&message);
    if text.is_empty() && !image_attached {
        return Ok(());
    }

    let chat_id = message.chat.id;
    let user_id = message_user_id(&message);
    let mut timer = start_turn_timer("chat", &message, image_attached);

    if is_rate_limited(user_id) {
        reply_text(&bot, &message, RATE_LIMIT_TEXT).await?;
        timer.complete("rate_limited", None);
        return Ok(());
    }

    let role = state.role_for(user_id);

    if let TurnPlan::Refuse(found) = plan_turn(&text, role) {
        info!(
            chat_id = chat_id.0,
            user_id,
            category = found.category.name(),
            language = found.language.name(),
            role = %role,
            "Answered risky question with a fixed warning"
        );
        reply_markdown(&bot, &message, found.warning()).await?;
        timer.complete("refused", Some(found.category.name().to_string()));
        return Ok(());
    }

    let _typing = start_typing(bot.clone(), chat_id);

    let image = match collect_image(&bot, &message).await {
        Ok(image) => image,
        Err(rejection) => {
            warn!(chat_id = chat_id.0, "Image rejected: {rejection}");
            reply_text(&bot, &message, &rejection.user_message()).await?;
            timer.complete("image_rejected", Some(rejection.to_string()));
            return Ok(());
        }
    };

    let classification = match &image {
        Some(image) => classify(&state, chat_id, image).await,
        None => None,
    };

    if let (AnswerPlan::Summary, Some(result)) =
        (plan_answer(&text, classification.as_ref()), &classification)
    {
        reply_text(&bot, &message, &result.render_summary()).await?;
        timer.complete("summary", None);
        return Ok(());
    }

    let language = reply_language_hint(&text);
    let request = ChatRequest::new(&text, image, role, language.as_deref());
    let placeholder = reply_text(&bot, &message, PLACEHOLDER_TEXT).await?;

    let outcome = stream_answer(&bot, &state, &request, chat_id, placeholder.id).await;
    let final_text = match final_answer(&outcome) {
        Some(answer) => {
            timer.complete("success", None);
            answer
        }
        None => {
            let detail = match &outcome {
                Err(err) => format!("{err:#}"),
                Ok(_) => "empty answer".to_string(),
            };
            error!(chat_id = chat_id.0, "Streaming answer failed: {detail}");
            timer.complete("error", Some(detail));
            TECHNICAL_ERROR_MESSAGE
        }
    };

    if let Err(err) = send_response(&bot, chat_id, placeholder.id, final_text).await {
        error!(chat_id = chat_id.0, "Failed to deliver the final answer: {err:#}");
    }

    Ok(())
}
