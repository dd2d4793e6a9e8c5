use crate::{error::AppError, ffmpeg::AudioFormat};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const TOKEN_PLACEHOLDER: &str = "your_bot_token_here";
const DEFAULT_PLAYER_CLIENTS: &str = "android,web,ios";
const SECS_PER_HOUR: u64 = 60 * 60;

#[derive(Clone, Debug)]
pub struct Config {
    pub bot_token: String,
    pub download_dir: PathBuf,
    pub max_file_size: u64,
    pub cleanup_interval: Duration,
    pub max_file_age: Duration,
    pub health_port: u16,
    pub audio_format: AudioFormat,
    pub player_clients: Vec<String>,
    pub force_ipv4: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup so tests do not
    /// have to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("TELEGRAM_BOT_TOKEN")
            .or_else(|| lookup("TELOXIDE_TOKEN"))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty() && token != TOKEN_PLACEHOLDER)
            .ok_or_else(|| {
                AppError::Config(
                    "TELEGRAM_BOT_TOKEN is not set; get a token from @BotFather".to_string(),
                )
            })?;

        let download_dir = lookup("DOWNLOAD_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .unwrap_or_else(|| "./downloads".to_string());

        let max_file_size_mb: u64 = parse_or(&lookup, "MAX_FILE_SIZE_MB", 50)?;
        if max_file_size_mb == 0 {
            return Err(AppError::Config(
                "MAX_FILE_SIZE_MB must be greater than 0".to_string(),
            ));
        }
        let cleanup_hours: u64 = parse_or(&lookup, "CLEANUP_INTERVAL_HOURS", 1)?;
        if cleanup_hours == 0 {
            return Err(AppError::Config(
                "CLEANUP_INTERVAL_HOURS must be greater than 0".to_string(),
            ));
        }
        let max_age_hours: u64 = parse_or(&lookup, "MAX_FILE_AGE_HOURS", 24)?;
        let health_port: u16 = parse_or(&lookup, "PORT", 3000)?;
        let audio_format: AudioFormat = parse_or(&lookup, "AUDIO_FORMAT", AudioFormat::Mp3)?;

        let player_clients: Vec<String> = lookup("YTDLP_PLAYER_CLIENTS")
            .unwrap_or_else(|| DEFAULT_PLAYER_CLIENTS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|client| !client.is_empty())
            .map(String::from)
            .collect();
        if player_clients.is_empty() {
            return Err(AppError::Config(
                "YTDLP_PLAYER_CLIENTS must name at least one client".to_string(),
            ));
        }

        let force_ipv4 = matches!(
            lookup("YTDLP_FORCE_IPV4").as_deref(),
            Some("1") | Some("true") | Some("TRUE")
        );

        Ok(Self {
            bot_token,
            download_dir: PathBuf::from(download_dir),
            max_file_size: scaled("MAX_FILE_SIZE_MB", max_file_size_mb, 1024 * 1024)?,
            cleanup_interval: Duration::from_secs(scaled(
                "CLEANUP_INTERVAL_HOURS",
                cleanup_hours,
                SECS_PER_HOUR,
            )?),
            max_file_age: Duration::from_secs(scaled(
                "MAX_FILE_AGE_HOURS",
                max_age_hours,
                SECS_PER_HOUR,
            )?),
            health_port,
            audio_format,
            player_clients,
            force_ipv4,
        })
    }
}

/// Converts a configured value to base units, rejecting values that overflow.
fn scaled(key: &str, value: u64, factor: u64) -> Result<u64, AppError> {
    value
        .checked_mul(factor)
        .ok_or_else(|| AppError::Config(format!("{key} is too large: {value}")))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        _ => Ok(default),
    }
}
