use dashmap::{mapref::entry::Entry, DashMap};
use std::{
    fmt,
    path::PathBuf,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use teloxide::types::{ChatId, MessageId};
use tracing::debug;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct JobId(String);

impl JobId {
    /// Chat id plus creation time in milliseconds. Only one job per chat can
    /// exist at a time, so this is unique for the life of the process.
    pub fn new(chat_id: ChatId) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self(format!("{}_{millis}", chat_id.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MediaFormat {
    Video,
    Audio,
}

impl MediaFormat {
    pub fn callback_tag(self) -> &'static str {
        match self {
            MediaFormat::Video => "mp4",
            MediaFormat::Audio => "audio",
        }
    }

    pub fn from_callback_tag(tag: &str) -> Option<Self> {
        match tag {
            "mp4" => Some(MediaFormat::Video),
            "audio" => Some(MediaFormat::Audio),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailureReason {
    /// An adapter or transport call failed; details are only logged.
    Adapter,
    TooLarge { size: u64, limit: u64 },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobState {
    AwaitingFormat,
    Starting,
    FetchingMedia,
    Converting,
    CheckingSize,
    Uploading,
    Done,
    Cancelled,
    Failed(FailureReason),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Done | JobState::Cancelled | JobState::Failed(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::AwaitingFormat => "awaiting_format",
            JobState::Starting => "starting",
            JobState::FetchingMedia => "fetching_media",
            JobState::Converting => "converting",
            JobState::CheckingSize => "checking_size",
            JobState::Uploading => "uploading",
            JobState::Done => "done",
            JobState::Cancelled => "cancelled",
            JobState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub source_url: String,
    pub format: MediaFormat,
    pub state: JobState,
    pub working_file: Option<PathBuf>,
}

impl Job {
    pub fn new(
        id: JobId,
        chat_id: ChatId,
        message_id: MessageId,
        source_url: String,
        format: MediaFormat,
    ) -> Self {
        Self {
            id,
            chat_id,
            message_id,
            source_url,
            format,
            state: JobState::Starting,
            working_file: None,
        }
    }

    pub fn transition(&mut self, next: JobState) {
        debug!(
            event = "job_transition",
            job_id = %self.id,
            from = self.state.name(),
            to = next.name()
        );
        self.state = next;
    }
}

/// Chat to active job mapping. An entry is the only record that a chat has a
/// download in flight; cancellation removes it and running jobs poll it.
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<DashMap<ChatId, JobId>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, chat_id: ChatId, job_id: &JobId) -> bool {
        match self.inner.entry(chat_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(job_id.clone());
                true
            }
        }
    }

    pub fn is_active(&self, chat_id: ChatId, job_id: &JobId) -> bool {
        self.inner
            .get(&chat_id)
            .map(|entry| entry.value() == job_id)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn has_active(&self, chat_id: ChatId) -> bool {
        self.inner.contains_key(&chat_id)
    }

    /// Returns whether an entry was removed.
    pub fn release(&self, chat_id: ChatId) -> bool {
        self.inner.remove(&chat_id).is_some()
    }

    pub fn release_job(&self, chat_id: ChatId, job_id: &JobId) -> bool {
        self.inner
            .remove_if(&chat_id, |_, current| current == job_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn guard(&self, chat_id: ChatId, job_id: JobId) -> JobGuard {
        JobGuard {
            registry: self.clone(),
            chat_id,
            job_id,
        }
    }
}

pub struct JobGuard {
    registry: JobRegistry,
    chat_id: ChatId,
    job_id: JobId,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let _ = self.registry.release_job(self.chat_id, &self.job_id);
    }
}
