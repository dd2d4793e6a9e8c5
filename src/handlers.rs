use crate::callback::parse_callback;
use crate::error::AppError;
use crate::orchestrator::Orchestrator;
use crate::texts;
use std::sync::Arc;
use teloxide::{dispatching::DpHandlerDescription, prelude::*, utils::command::BotCommands};
use tracing::{debug, instrument, Instrument};

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Show the welcome message")]
    Start,
    #[command(description = "Show usage help")]
    Help,
    #[command(description = "Cancel the active download")]
    Cancel,
}

#[derive(Clone)]
pub struct AppServices {
    orchestrator: Arc<Orchestrator>,
}

impl AppServices {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub fn build_handler() -> Handler<'static, DependencyMap, Result<(), AppError>, DpHandlerDescription> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_message().filter_map(extract_text).endpoint(handle_text))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
}

/// Plain text that is not a command. Unknown commands fall through here
/// and are dropped.
fn extract_text(msg: Message) -> Option<String> {
    let text = msg.text()?.trim();
    if text.is_empty() || text.starts_with('/') {
        None
    } else {
        Some(text.to_string())
    }
}

#[instrument(skip(services, msg), fields(chat_id = msg.chat.id.0))]
async fn handle_command(services: AppServices, msg: Message, cmd: Command) -> Result<(), AppError> {
    let orchestrator = &services.orchestrator;
    let chat_id = msg.chat.id;
    let settings = orchestrator.settings();
    let audio_label = settings.audio_format.label();
    match cmd {
        Command::Start => {
            orchestrator
                .send_text(chat_id, &texts::welcome(settings.max_file_size, &audio_label))
                .await
        }
        Command::Help => {
            orchestrator
                .send_text(chat_id, &texts::help(settings.max_file_size, &audio_label))
                .await
        }
        Command::Cancel => orchestrator.cancel_active(chat_id).await,
    }
}

#[instrument(skip(services, msg, text), fields(chat_id = msg.chat.id.0))]
async fn handle_text(services: AppServices, msg: Message, text: String) -> Result<(), AppError> {
    services.orchestrator.handle_text(msg.chat.id, &text).await
}

async fn handle_callback(bot: Bot, services: AppServices, q: CallbackQuery) -> Result<(), AppError> {
    let data = q.data.clone().unwrap_or_default();
    let Some(message) = q.message.as_ref() else {
        debug!(event = "callback_without_message", callback_id = %q.id);
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };
    let chat_id = message.chat.id;

    let admitted = services
        .orchestrator
        .handle_control(chat_id, message.id, &q.id, parse_callback(&data))
        .await?;

    if let Some(admitted) = admitted {
        debug!(event = "job_spawned", job_id = %admitted.job().id, chat_id = chat_id.0);
        let orchestrator = services.orchestrator.clone();
        tokio::spawn(
            async move {
                orchestrator.run_job(admitted).await;
            }
            .in_current_span(),
        );
    }
    Ok(())
}
