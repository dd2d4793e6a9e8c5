use crate::{
    util::{format_duration, human_size},
    yt_dlp::VideoMetadata,
};

pub const INVALID_URL: &str =
    "❌ Please send a valid YouTube URL.\n\nExample: https://www.youtube.com/watch?v=dQw4w9WgXcQ";
pub const ANALYZING: &str = "🔍 Analyzing video...";
pub const METADATA_UNAVAILABLE: &str = "❌ Unable to get video information. This could be due to:\n\n\
    • Video is private or deleted\n\
    • Region restrictions\n\
    • YouTube rate limiting\n\
    • Network issues\n\n\
    Please try:\n\
    • A different video URL\n\
    • Waiting a few minutes and trying again";
pub const SESSION_EXPIRED: &str = "❌ Session expired. Please send the YouTube URL again.";
pub const ALREADY_ACTIVE: &str =
    "⏳ You already have an active download. Please wait for it to complete.";
pub const STARTING: &str = "⬇️ Starting download...";
pub const DOWNLOADING_FOR_CONVERSION: &str = "⬇️ Downloading video for conversion...";
pub const UPLOADING: &str = "📤 Uploading file...";
pub const FAILED: &str = "❌ Download failed. Please try again later.";
pub const CANCELLED_ACTIVE: &str = "❌ Active download cancelled.";
pub const NOTHING_TO_CANCEL: &str = "ℹ️ No active download to cancel.";
pub const PROMPT_DISMISSED: &str = "❌ Cancelled. Send another YouTube URL to start over.";
pub const STOPPED_BY_USER: &str = "❌ Download cancelled by user.";
pub const STOP_NOT_ACTIVE: &str = "No active download to cancel.";
pub const UNKNOWN_ACTION: &str = "This button is no longer valid.";

pub const VIDEO_BUTTON: &str = "📹 MP4 (Video)";
pub const CANCEL_BUTTON: &str = "❌ Cancel";
pub const STOP_BUTTON: &str = "❌ Cancel Download";

pub fn audio_button(audio_label: &str) -> String {
    format!("🎵 {audio_label} (Audio)")
}

pub fn downloading(percent: u8) -> String {
    format!("⬇️ Downloading video... {percent}%")
}

pub fn converting(audio_label: &str) -> String {
    format!("🔄 Converting to {audio_label}...")
}

pub fn too_large(size: u64, limit: u64) -> String {
    format!(
        "❌ File too large ({}). Maximum allowed: {}",
        human_size(size),
        human_size(limit)
    )
}

pub fn caption(title: &str, size: u64) -> String {
    format!("🎬 {title}\n📊 Size: {}", human_size(size))
}

pub fn video_found(metadata: &VideoMetadata) -> String {
    let duration = if metadata.duration_seconds > 0 {
        format_duration(metadata.duration_seconds)
    } else {
        "Unknown".to_string()
    };
    format!(
        "📹 Video Found!\n\nTitle: {}\nChannel: {}\nDuration: {duration}\n\nChoose your preferred format:",
        metadata.title, metadata.author
    )
}

pub fn welcome(max_file_size: u64, audio_label: &str) -> String {
    format!(
        "🎬 Welcome to YouTube Downloader Bot!\n\n\
         Send me any YouTube URL and I'll help you download it as:\n\
         • 📹 MP4 - Video with audio\n\
         • 🎵 {audio_label} - Audio only\n\n\
         How to use:\n\
         1. Send a YouTube URL\n\
         2. Choose your preferred format\n\
         3. Wait for the download\n\
         4. Enjoy your file!\n\n\
         Commands:\n\
         /help - Show this help message\n\
         /cancel - Cancel active download\n\n\
         Note: Files larger than {} cannot be delivered due to Telegram limits.",
        human_size(max_file_size)
    )
}

pub fn help(max_file_size: u64, audio_label: &str) -> String {
    format!(
        "🆘 Help & Instructions\n\n\
         Supported URLs:\n\
         • youtube.com/watch?v=...\n\
         • youtu.be/...\n\
         • m.youtube.com/watch?v=...\n\n\
         Available Formats:\n\
         • MP4 - Full video with audio\n\
         • {audio_label} - Audio only\n\n\
         File Size Limits:\n\
         • Maximum: {}\n\
         • Larger files are rejected\n\n\
         Tips:\n\
         • Shorter videos download faster\n\
         • Audio files are usually much smaller than MP4\n\
         • The bot works with most public YouTube videos\n\n\
         Commands:\n\
         /start - Welcome message\n\
         /help - This help message\n\
         /cancel - Cancel active download",
        human_size(max_file_size)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_found_formats_duration() {
        let metadata = VideoMetadata {
            title: "Example".into(),
            author: "Someone".into(),
            duration_seconds: 3725,
        };
        let text = video_found(&metadata);
        assert!(text.contains("Title: Example"));
        assert!(text.contains("Channel: Someone"));
        assert!(text.contains("Duration: 1:02:05"));
    }

    #[test]
    fn unknown_duration_is_spelled_out() {
        let metadata = VideoMetadata {
            title: "t".into(),
            author: "a".into(),
            duration_seconds: 0,
        };
        assert!(video_found(&metadata).contains("Duration: Unknown"));
    }

    #[test]
    fn too_large_names_both_sizes() {
        let text = too_large(60 * 1024 * 1024, 50 * 1024 * 1024);
        assert_eq!(text, "❌ File too large (60.00 MB). Maximum allowed: 50.00 MB");
    }

    #[test]
    fn welcome_mentions_limit_and_audio_format() {
        let text = welcome(50 * 1024 * 1024, "MP3");
        assert!(text.contains("50.00 MB"));
        assert!(text.contains("🎵 MP3 - Audio only"));
    }
}
