use anyhow::Result;
use teloxide::prelude::*;

use crate::classification::ClassificationRecord;
use crate::handlers::responses::{reply_markdown, reply_text};
use crate::roles::{is_verified_mycologist, UserRole};
use crate::state::AppState;
use crate::utils::telegram::message_user_id;

const HELP_TEXT: &str = "
*Mushroom Expert Commands*

Send a photo of a mushroom to get a suggested species, visible traits and the model's confidence.
Add a caption or send a text message to ask a question about it.

/role - Show or change how detailed answers are
Usage: `/role student`, `/role forager` or `/role mycologist`

/last - Show the last identification made in this chat

⚠️ Never eat a mushroom based only on this chat. Always consult local experts or literature.
";

fn role_overview(current: UserRole) -> String {
    let available = UserRole::ALL
        .iter()
        .map(|role| role.name())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Your role: {}\nAvailable roles: {}\nUse /role <name> to change it.",
        current, available
    )
}

fn render_last_classification(record: &ClassificationRecord) -> String {
    format!(
        "{}\n\nRaw JSON:\n{}\n\nRecorded at {}",
        record.result.render_summary(),
        record.result.to_pretty_json(),
        record.recorded_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

pub async fn start_handler(bot: Bot, message: Message) -> Result<()> {
    reply_text(
        &bot,
        &message,
        "🍄 Hello! I am your mushroom expert. Send me a photo or a question about mushrooms. Use /help to see commands.",
    )
    .await?;
    Ok(())
}

pub async fn help_handler(bot: Bot, message: Message) -> Result<()> {
    reply_markdown(&bot, &message, HELP_TEXT.trim()).await?;
    Ok(())
}

pub async fn role_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    arg: Option<String>,
) -> Result<()> {
    let user_id = message_user_id(&message);
    let Some(arg) = arg else {
        reply_text(&bot, &message, &role_overview(state.role_for(user_id))).await?;
        return Ok(());
    };

    let role = match arg.parse::<UserRole>() {
        Ok(role) => role,
        Err(err) => {
            let text = format!("{}.\n{}", err, role_overview(state.role_for(user_id)));
            reply_text(&bot, &message, &text).await?;
            return Ok(());
        }
    };

    if role.requires_verification() && !is_verified_mycologist(user_id) {
        reply_text(
            &bot,
            &message,
            "The mycologist role is limited to verified mycologists. Please contact the administrator.",
        )
        .await?;
        return Ok(());
    }

    state.set_role(user_id, role);
    tracing::info!(user_id, role = %role, "Role changed");
    reply_text(&bot, &message, &format!("Role set to {}.", role)).await?;
    Ok(())
}

pub async fn last_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let text = match state.last_classification(message.chat.id.0) {
        Some(record) => render_last_classification(&record),
        None => "No identification yet. Send me a photo of a mushroom first.".to_string(),
    };
    reply_text(&bot, &message, &text).await?;
    Ok(())
}
