use crate::{
    callback::{build_dismiss_callback, build_select_callback, build_stop_callback, ControlAction},
    error::AppError,
    ffmpeg::{AudioFormat, Transcoder},
    jobs::{FailureReason, Job, JobGuard, JobId, JobRegistry, JobState, MediaFormat},
    texts,
    transport::{AudioTags, ChatTransport},
    url_cache::UrlCache,
    util::{is_valid_youtube_url, sanitize_filename},
    yt_dlp::{MediaFetcher, VideoMetadata},
};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};
use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

const FETCH_CONTAINER: &str = "mp4";
const PROGRESS_STEP: u8 = 10;

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub download_dir: PathBuf,
    pub max_file_size: u64,
    pub audio_format: AudioFormat,
}

/// A job that holds its chat's registry slot. Dropping it frees the slot.
pub struct AdmittedJob {
    job: Job,
    guard: JobGuard,
}

impl AdmittedJob {
    pub fn job(&self) -> &Job {
        &self.job
    }
}

/// Keeps only the first report in each new 10% band.
struct ProgressThrottle {
    last_step: AtomicU8,
}

impl ProgressThrottle {
    fn new() -> Self {
        Self {
            last_step: AtomicU8::new(0),
        }
    }

    fn advance(&self, percent: u8) -> Option<u8> {
        let step = percent.min(100) / PROGRESS_STEP;
        let previous = self.last_step.fetch_max(step, Ordering::SeqCst);
        (step > previous).then_some(step * PROGRESS_STEP)
    }
}

pub struct Orchestrator {
    registry: JobRegistry,
    urls: UrlCache,
    fetcher: Arc<dyn MediaFetcher>,
    transcoder: Arc<dyn Transcoder>,
    transport: Arc<dyn ChatTransport>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        transcoder: Arc<dyn Transcoder>,
        transport: Arc<dyn ChatTransport>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry: JobRegistry::new(),
            urls: UrlCache::new(),
            fetcher,
            transcoder,
            transport,
            settings,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn urls(&self) -> &UrlCache {
        &self.urls
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<(), AppError> {
        self.transport.send_message(chat_id, text, None).await?;
        Ok(())
    }

    /// Handles a free-text message: validates it as a video URL, looks up
    /// the metadata and shows the format prompt.
    pub async fn handle_text(&self, chat_id: ChatId, text: &str) -> Result<(), AppError> {
        let url = text.trim();
        if !is_valid_youtube_url(url) {
            debug!(event = "invalid_url", chat_id = chat_id.0);
            self.transport
                .send_message(chat_id, texts::INVALID_URL, None)
                .await?;
            return Ok(());
        }

        let token = self.urls.put(url);
        let loading = self
            .transport
            .send_message(chat_id, texts::ANALYZING, None)
            .await?;

        let metadata = match self.fetcher.fetch_metadata(url).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(event = "metadata_unavailable", chat_id = chat_id.0, url, error = %err);
                self.replace_status(chat_id, loading, texts::METADATA_UNAVAILABLE)
                    .await;
                return Ok(());
            }
        };

        if let Err(err) = self.transport.delete_message(chat_id, loading).await {
            debug!(event = "delete_loading_failed", error = %err);
        }
        self.transport
            .send_message(
                chat_id,
                &texts::video_found(&metadata),
                Some(self.format_keyboard(&token)),
            )
            .await?;
        info!(event = "format_prompt_shown", chat_id = chat_id.0, title = %metadata.title);
        Ok(())
    }

    fn format_keyboard(&self, token: &str) -> InlineKeyboardMarkup {
        let audio_label = self.settings.audio_format.label();
        InlineKeyboardMarkup::new(vec![
            vec![
                InlineKeyboardButton::callback(
                    texts::VIDEO_BUTTON,
                    build_select_callback(MediaFormat::Video, token),
                ),
                InlineKeyboardButton::callback(
                    texts::audio_button(&audio_label),
                    build_select_callback(MediaFormat::Audio, token),
                ),
            ],
            vec![InlineKeyboardButton::callback(
                texts::CANCEL_BUTTON,
                build_dismiss_callback(token),
            )],
        ])
    }

    fn stop_keyboard(job_id: &JobId) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
            texts::STOP_BUTTON,
            build_stop_callback(job_id),
        )]])
    }

    /// Handles an inline button press. Every press is answered exactly once.
    /// Returns the admitted job when the press started one; the caller is
    /// expected to drive it with [`Orchestrator::run_job`].
    pub async fn handle_control(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        callback_id: &str,
        action: Option<ControlAction>,
    ) -> Result<Option<AdmittedJob>, AppError> {
        match action {
            None => {
                self.answer(callback_id, Some(texts::UNKNOWN_ACTION)).await;
                Ok(None)
            }
            Some(ControlAction::Select { format, token }) => {
                self.answer(callback_id, None).await;
                self.select_format(chat_id, message_id, format, &token).await
            }
            Some(ControlAction::Dismiss { .. }) => {
                self.answer(callback_id, None).await;
                if self.registry.release(chat_id) {
                    info!(event = "job_cancelled_from_prompt", chat_id = chat_id.0);
                }
                self.transport
                    .edit_message(chat_id, message_id, texts::PROMPT_DISMISSED, None)
                    .await?;
                Ok(None)
            }
            Some(ControlAction::Stop { job_id }) => {
                if self.registry.release_job(chat_id, &job_id) {
                    info!(event = "job_stop_requested", chat_id = chat_id.0, job_id = %job_id);
                    self.answer(callback_id, None).await;
                    self.transport
                        .edit_message(chat_id, message_id, texts::STOPPED_BY_USER, None)
                        .await?;
                } else {
                    self.answer(callback_id, Some(texts::STOP_NOT_ACTIVE)).await;
                }
                Ok(None)
            }
        }
    }

    /// `AwaitingFormat -> Starting`. Resolves the URL behind `token` and
    /// claims the chat's slot; returns `None` when the session expired or
    /// another job is already running for this chat.
    pub async fn select_format(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        format: MediaFormat,
        token: &str,
    ) -> Result<Option<AdmittedJob>, AppError> {
        let Some(url) = self.urls.get(token) else {
            info!(event = "session_expired", chat_id = chat_id.0);
            self.transport
                .edit_message(chat_id, message_id, texts::SESSION_EXPIRED, None)
                .await?;
            return Ok(None);
        };

        let job_id = JobId::new(chat_id);
        if !self.registry.try_acquire(chat_id, &job_id) {
            info!(event = "job_rejected_active", chat_id = chat_id.0);
            self.transport
                .send_message(chat_id, texts::ALREADY_ACTIVE, None)
                .await?;
            return Ok(None);
        }

        info!(event = "job_admitted", chat_id = chat_id.0, job_id = %job_id, format = ?format);
        let guard = self.registry.guard(chat_id, job_id.clone());
        Ok(Some(AdmittedJob {
            job: Job::new(job_id, chat_id, message_id, url, format),
            guard,
        }))
    }

    /// `/cancel`: drops the chat's active job, if any.
    pub async fn cancel_active(&self, chat_id: ChatId) -> Result<(), AppError> {
        let text = if self.registry.release(chat_id) {
            info!(event = "job_cancelled_by_command", chat_id = chat_id.0);
            texts::CANCELLED_ACTIVE
        } else {
            texts::NOTHING_TO_CANCEL
        };
        self.transport.send_message(chat_id, text, None).await?;
        Ok(())
    }

    /// Drives an admitted job to a terminal state. Working files are removed
    /// and the registry slot released on every path.
    pub async fn run_job(&self, admitted: AdmittedJob) -> JobState {
        let AdmittedJob { mut job, guard } = admitted;
        let span = tracing::info_span!("job", job_id = %job.id, chat_id = job.chat_id.0);

        let state = async {
            let state = match self.drive(&mut job).await {
                Ok(state) => state,
                Err(err) if !self.registry.is_active(job.chat_id, &job.id) => {
                    info!(event = "job_failed_after_cancel", state = job.state.name(), error = %err);
                    JobState::Cancelled
                }
                Err(err) => {
                    error!(event = "job_failed", state = job.state.name(), error = %err);
                    self.replace_status(job.chat_id, job.message_id, texts::FAILED)
                        .await;
                    JobState::Failed(FailureReason::Adapter)
                }
            };
            if let Some(path) = job.working_file.take() {
                remove_quietly(&path).await;
            }
            debug_assert!(state.is_terminal());
            job.transition(state.clone());
            info!(event = "job_finished", state = state.name());
            state
        }
        .instrument(span)
        .await;

        drop(guard);
        state
    }

    async fn drive(&self, job: &mut Job) -> Result<JobState, AppError> {
        let stop_keyboard = Self::stop_keyboard(&job.id);
        self.transport
            .edit_message(
                job.chat_id,
                job.message_id,
                texts::STARTING,
                Some(stop_keyboard.clone()),
            )
            .await?;

        if !self.still_active(job) {
            return Ok(JobState::Cancelled);
        }
        job.transition(JobState::FetchingMedia);

        let metadata = self.fetcher.fetch_metadata(&job.source_url).await?;
        if !self.still_active(job) {
            return Ok(JobState::Cancelled);
        }
        let stem = working_stem(&metadata.title, &job.id);

        if job.format == MediaFormat::Audio {
            self.transport
                .edit_message(
                    job.chat_id,
                    job.message_id,
                    texts::DOWNLOADING_FOR_CONVERSION,
                    Some(stop_keyboard.clone()),
                )
                .await?;
            if !self.still_active(job) {
                return Ok(JobState::Cancelled);
            }
        }

        let fetched = self.fetch_with_progress(job, &stem, &stop_keyboard).await?;
        job.working_file = Some(fetched.clone());

        if job.format == MediaFormat::Audio {
            if !self.still_active(job) {
                return Ok(JobState::Cancelled);
            }
            job.transition(JobState::Converting);
            let audio_format = self.settings.audio_format;
            self.transport
                .edit_message(
                    job.chat_id,
                    job.message_id,
                    &texts::converting(&audio_format.label()),
                    Some(stop_keyboard),
                )
                .await?;
            let converted = self
                .transcoder
                .transcode(&fetched, &self.settings.download_dir, &stem, audio_format)
                .await;
            remove_quietly(&fetched).await;
            job.working_file = None;
            let converted = converted?;
            job.working_file = Some(converted);
        }

        if !self.still_active(job) {
            return Ok(JobState::Cancelled);
        }
        job.transition(JobState::CheckingSize);

        let path = job
            .working_file
            .clone()
            .ok_or_else(|| AppError::Internal("no working file after fetch".to_string()))?;
        let size = tokio::fs::metadata(&path).await?.len();
        let limit = self.settings.max_file_size;
        if size > limit {
            info!(event = "file_too_large", size, limit);
            self.replace_status(job.chat_id, job.message_id, &texts::too_large(size, limit))
                .await;
            return Ok(JobState::Failed(FailureReason::TooLarge { size, limit }));
        }

        job.transition(JobState::Uploading);
        self.transport
            .edit_message(job.chat_id, job.message_id, texts::UPLOADING, None)
            .await?;
        self.deliver(job, &path, &metadata, size).await?;

        if let Err(err) = self
            .transport
            .delete_message(job.chat_id, job.message_id)
            .await
        {
            debug!(event = "delete_progress_failed", error = %err);
        }
        Ok(JobState::Done)
    }

    async fn fetch_with_progress(
        &self,
        job: &Job,
        stem: &str,
        stop_keyboard: &InlineKeyboardMarkup,
    ) -> Result<PathBuf, AppError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let throttle = ProgressThrottle::new();
        let registry = self.registry.clone();
        let (chat_id, job_id) = (job.chat_id, job.id.clone());
        let on_progress = move |percent: u8| {
            if !registry.is_active(chat_id, &job_id) {
                return;
            }
            if let Some(step) = throttle.advance(percent) {
                let _ = tx.send(step);
            }
        };

        let transport = self.transport.clone();
        let registry = self.registry.clone();
        let (message_id, job_id) = (job.message_id, job.id.clone());
        let keyboard = stop_keyboard.clone();
        let pump = tokio::spawn(
            async move {
                while let Some(percent) = rx.recv().await {
                    if !registry.is_active(chat_id, &job_id) {
                        continue;
                    }
                    if let Err(err) = transport
                        .edit_message(
                            chat_id,
                            message_id,
                            &texts::downloading(percent),
                            Some(keyboard.clone()),
                        )
                        .await
                    {
                        debug!(event = "progress_edit_failed", percent, error = %err);
                    }
                }
            }
            .in_current_span(),
        );

        let result = self
            .fetcher
            .fetch_media(
                &job.source_url,
                &self.settings.download_dir,
                stem,
                FETCH_CONTAINER,
                &on_progress,
            )
            .await;
        drop(on_progress);
        if let Err(err) = pump.await {
            warn!(event = "progress_pump_join_failed", error = %err);
        }
        result
    }

    async fn deliver(
        &self,
        job: &Job,
        path: &Path,
        metadata: &VideoMetadata,
        size: u64,
    ) -> Result<(), AppError> {
        let caption = texts::caption(&metadata.title, size);
        match job.format {
            MediaFormat::Video => {
                self.transport
                    .send_video_file(job.chat_id, path, &caption)
                    .await
            }
            MediaFormat::Audio => {
                let tags = AudioTags {
                    title: metadata.title.clone(),
                    performer: metadata.author.clone(),
                };
                self.transport
                    .send_audio_file(job.chat_id, path, &caption, &tags)
                    .await
            }
        }?;
        info!(event = "file_delivered", path = %path.display(), size);
        Ok(())
    }

    fn still_active(&self, job: &Job) -> bool {
        let active = self.registry.is_active(job.chat_id, &job.id);
        if !active {
            info!(event = "job_checkpoint_cancelled", state = job.state.name());
        }
        active
    }

    async fn answer(&self, callback_id: &str, text: Option<&str>) {
        if let Err(err) = self.transport.answer_control_event(callback_id, text).await {
            debug!(event = "answer_callback_failed", error = %err);
        }
    }

    /// Edits a status message in place, falling back to a fresh message.
    async fn replace_status(&self, chat_id: ChatId, message_id: MessageId, text: &str) {
        if self
            .transport
            .edit_message(chat_id, message_id, text, None)
            .await
            .is_ok()
        {
            return;
        }
        if let Err(err) = self.transport.send_message(chat_id, text, None).await {
            warn!(event = "status_message_failed", error = %err);
        }
    }
}

/// File stem for a job's working files. The job id keeps two jobs with the
/// same title from writing to the same path.
pub fn working_stem(title: &str, job_id: &JobId) -> String {
    format!("{}-{}", sanitize_filename(title), job_id.as_str())
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(event = "working_file_removed", path = %path.display()),
        Err(err) => debug!(event = "working_file_remove_failed", path = %path.display(), error = %err),
    }
}
