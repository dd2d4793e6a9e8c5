use crate::error::AppError;
use async_trait::async_trait;
use rand::Rng;
use std::{path::Path, time::Duration};
use teloxide::{
    prelude::*,
    types::{InlineKeyboardMarkup, InputFile, MessageId},
    ApiError, RequestError,
};
use tokio::time;
use tracing::{debug, warn};

const UPLOAD_MAX_RETRIES: usize = 3;
const UPLOAD_RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
const UPLOAD_RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Audio tags attached to an uploaded audio file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AudioTags {
    pub title: String,
    pub performer: String,
}

/// The chat operations the bot needs, kept narrow so the orchestration logic
/// can run against an in-memory double.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<MessageId, AppError>;

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<(), AppError>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), AppError>;

    async fn send_video_file(&self, chat_id: ChatId, path: &Path, caption: &str) -> Result<(), AppError>;

    async fn send_audio_file(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption: &str,
        tags: &AudioTags,
    ) -> Result<(), AppError>;

    async fn answer_control_event(&self, callback_id: &str, text: Option<&str>) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<MessageId, AppError> {
        let mut request = self.bot.send_message(chat_id, text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard);
        }
        Ok(request.await?.id)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<(), AppError> {
        let mut request = self.bot.edit_message_text(chat_id, message_id, text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard);
        }
        match request.await {
            Ok(_) => Ok(()),
            Err(err) if is_message_not_modified(&err) => {
                debug!(event = "edit_not_modified", message_id = message_id.0);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), AppError> {
        self.bot.delete_message(chat_id, message_id).await?;
        Ok(())
    }

    async fn send_video_file(&self, chat_id: ChatId, path: &Path, caption: &str) -> Result<(), AppError> {
        send_with_retry(|| {
            self.bot
                .send_video(chat_id, InputFile::file(path.to_path_buf()))
                .caption(caption.to_string())
                .supports_streaming(true)
        })
        .await
    }

    async fn send_audio_file(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption: &str,
        tags: &AudioTags,
    ) -> Result<(), AppError> {
        send_with_retry(|| {
            self.bot
                .send_audio(chat_id, InputFile::file(path.to_path_buf()))
                .caption(caption.to_string())
                .title(tags.title.clone())
                .performer(tags.performer.clone())
        })
        .await
    }

    async fn answer_control_event(&self, callback_id: &str, text: Option<&str>) -> Result<(), AppError> {
        let mut request = self.bot.answer_callback_query(callback_id.to_string());
        if let Some(text) = text {
            request = request.text(text.to_string());
        }
        request.await?;
        Ok(())
    }
}

async fn send_with_retry<F, R>(make_request: F) -> Result<(), AppError>
where
    F: Fn() -> R,
    R: std::future::IntoFuture<Output = Result<Message, RequestError>>,
{
    let mut attempt = 1;
    loop {
        match make_request().await {
            Ok(_) => return Ok(()),
            Err(err) => {
                let Some(delay) = retry_delay_for_upload(&err, attempt) else {
                    return Err(err.into());
                };
                if attempt == UPLOAD_MAX_RETRIES {
                    return Err(err.into());
                }
                warn!("Upload attempt {attempt} failed; retrying in {delay:?}: {err}");
                time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn retry_delay_for_upload(err: &RequestError, attempt: usize) -> Option<Duration> {
    match err {
        RequestError::RetryAfter(delay) => Some(*delay),
        RequestError::Network(net) if net.is_timeout() || net.is_connect() => {
            Some(backoff_delay(attempt) + Duration::from_millis(rand::thread_rng().gen_range(0..=500)))
        }
        _ => None,
    }
}

fn backoff_delay(attempt: usize) -> Duration {
    let base_ms = UPLOAD_RETRY_BASE_DELAY.as_millis() as u64;
    let factor = 1u64 << (attempt.saturating_sub(1)).min(16);
    let max_ms = UPLOAD_RETRY_MAX_DELAY.as_millis() as u64;
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

fn is_message_not_modified(err: &RequestError) -> bool {
    matches!(err, RequestError::Api(ApiError::MessageNotModified))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn retry_after_waits_the_requested_time() {
        let err = RequestError::RetryAfter(Duration::from_secs(7));
        assert_eq!(retry_delay_for_upload(&err, 1), Some(Duration::from_secs(7)));
        assert_eq!(retry_delay_for_upload(&err, 3), Some(Duration::from_secs(7)));
    }

    #[test]
    fn api_errors_are_not_retried() {
        let err = RequestError::Api(ApiError::MessageNotModified);
        assert!(retry_delay_for_upload(&err, 1).is_none());
        assert!(is_message_not_modified(&err));
    }
}
