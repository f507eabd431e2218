use std::error::Error;

use dotenvy::dotenv;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

mod classification;
mod config;
mod handlers;
mod llm;
mod roles;
mod state;
mod utils;

use config::{Config, CONFIG};
use handlers::{chat, commands};
use llm::{GeminiClient, GeminiSettings};
use state::AppState;
use utils::logging::init_logging;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Role(String),
    Last,
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();

    // Validate before CONFIG is first touched.
    if let Err(err) = Config::load() {
        eprintln!("Configuration error: {err:#}");
        return Err(err.into());
    }
    let _guards = init_logging(&CONFIG.log_level);

    let bot = Bot::new(CONFIG.bot_token.clone());
    info!(
        chat_model = %CONFIG.gemini_chat_model,
        classify_model = %CONFIG.gemini_classify_model,
        "Starting mushroom expert bot"
    );

    let gemini = GeminiClient::new(GeminiSettings::from_config(&CONFIG));
    let state = AppState::new(gemini);

    roles::load_mycologists();

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(
            dptree::filter(|msg: Message| {
                msg.text().is_some()
                    || msg.caption().is_some()
                    || msg.photo().is_some()
                    || msg.document().is_some()
            })
            .endpoint(handle_chat),
        )
        .endpoint(ignore_message);

    Dispatcher::builder(bot, message_handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    match command {
        Command::Start => commands::start_handler(bot, message).await?,
        Command::Help => commands::help_handler(bot, message).await?,
        Command::Role(arg) => {
            let arg = Some(arg.trim().to_string()).filter(|value| !value.is_empty());
            commands::role_handler(bot, state, message, arg).await?
        }
        Command::Last => commands::last_handler(bot, state, message).await?,
    }
    Ok(())
}

async fn handle_chat(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    if message
        .text()
        .is_some_and(|text| text.trim_start().starts_with('/'))
    {
        return Ok(());
    }

    tokio::spawn(async move {
        if let Err(err) = chat::handle_chat_message(bot, state, message).await {
            error!("chat handler failed: {err:#}");
        }
    });
    Ok(())
}

async fn ignore_message(_message: Message) -> HandlerResult {
    Ok(())
}
