use crate::error::AppError;
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::{debug, error, info, instrument, trace, warn};

const YT_DLP: &str = "yt-dlp";
const STRATEGY_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Called with whole percents while media is being fetched.
pub type ProgressFn = dyn Fn(u8) + Send + Sync;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    pub author: String,
    pub duration_seconds: u64,
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, AppError>;

    /// Downloads `url` into `output_dir` as `<stem>.<container>` and returns
    /// the final path.
    async fn fetch_media(
        &self,
        url: &str,
        output_dir: &Path,
        stem: &str,
        container: &str,
        on_progress: &ProgressFn,
    ) -> Result<PathBuf, AppError>;
}

#[derive(Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
}

impl From<YtDlpInfo> for VideoMetadata {
    fn from(info: YtDlpInfo) -> Self {
        Self {
            title: info
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Unknown Title".to_string()),
            author: info
                .channel
                .or(info.uploader)
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| "Unknown Channel".to_string()),
            duration_seconds: info.duration.map(|d| d.max(0.0) as u64).unwrap_or(0),
        }
    }
}

/// One way of talking to the upstream platform.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchStrategy {
    pub player_client: String,
}

/// Ordered list of strategies; an operation is tried with each one in turn
/// until one succeeds.
#[derive(Clone, Debug)]
pub struct StrategyChain {
    strategies: Vec<FetchStrategy>,
    retry_delay: Duration,
}

impl StrategyChain {
    pub fn new(player_clients: &[String]) -> Self {
        Self {
            strategies: player_clients
                .iter()
                .map(|client| FetchStrategy {
                    player_client: client.clone(),
                })
                .collect(),
            retry_delay: STRATEGY_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, AppError>
    where
        F: FnMut(FetchStrategy) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut last_error = None;
        for (index, strategy) in self.strategies.iter().enumerate() {
            if index > 0 && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
            match attempt(strategy.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        event = "strategy_failed",
                        operation,
                        player_client = %strategy.player_client,
                        error = %err
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            AppError::Internal(format!("no fetch strategies configured for {operation}"))
        }))
    }
}

pub struct YtDlpClient {
    chain: StrategyChain,
    force_ipv4: bool,
}

impl YtDlpClient {
    pub fn new(chain: StrategyChain, force_ipv4: bool) -> Self {
        Self { chain, force_ipv4 }
    }

    fn base_command(&self, strategy: &FetchStrategy) -> Command {
        let mut cmd = Command::new(YT_DLP);
        cmd.arg("--extractor-args")
            .arg(format!("youtube:player_client={}", strategy.player_client))
            .arg("--no-playlist")
            .arg("--no-warnings");
        if self.force_ipv4 {
            cmd.arg("--force-ipv4");
        }
        debug!(event = "yt_dlp_command_ready", player_client = %strategy.player_client);
        cmd
    }

    async fn metadata_once(&self, strategy: &FetchStrategy, url: &str) -> Result<VideoMetadata, AppError> {
        let output = self
            .base_command(strategy)
            .arg("-J")
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                event = "fetch_metadata_failed",
                status = %output.status,
                stderr = %stderr.trim()
            );
            return Err(AppError::YtDlp(stderr.trim().to_string()));
        }

        let info: YtDlpInfo = serde_json::from_slice(&output.stdout)?;
        Ok(info.into())
    }

    async fn media_once(
        &self,
        strategy: &FetchStrategy,
        url: &str,
        output_dir: &Path,
        stem: &str,
        container: &str,
        on_progress: &ProgressFn,
    ) -> Result<PathBuf, AppError> {
        let template = output_dir.join(format!("{stem}.%(ext)s"));
        let expected = output_dir.join(format!("{stem}.{container}"));
        let selector = format!(
            "best[ext={container}][vcodec!=none][acodec!=none]/best[vcodec!=none][acodec!=none]/best"
        );

        let mut child = self
            .base_command(strategy)
            .arg("-f")
            .arg(&selector)
            .arg("--remux-video")
            .arg(container)
            .arg("--no-part")
            .arg("--newline")
            .arg("--progress")
            .arg("--print")
            .arg("after_move:filepath")
            .arg("-o")
            .arg(&template)
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::MissingOutput("stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::MissingOutput("stderr".into()))?;

        // Depending on the yt-dlp version progress lands on either stream.
        let read_stdout = async {
            let mut final_path: Option<PathBuf> = None;
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(percent) = parse_progress_line(&line) {
                    on_progress(percent);
                } else if !line.trim().is_empty() && !line.starts_with('[') {
                    final_path = Some(PathBuf::from(line.trim()));
                }
            }
            Ok::<_, AppError>(final_path)
        };
        let read_stderr = async {
            let mut collected = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Some(line) = lines.next_line().await? {
                trace!(event = "yt_dlp_stderr_line", line = line.as_str());
                if let Some(percent) = parse_progress_line(&line) {
                    on_progress(percent);
                } else {
                    collected.push_str(&line);
                    collected.push('\n');
                }
            }
            Ok::<_, AppError>(collected)
        };
        let (final_path, stderr) = tokio::try_join!(read_stdout, read_stderr)?;
        let status = child.wait().await?;

        if !status.success() {
            error!(event = "fetch_media_failed", status = %status, stderr = %stderr.trim());
            remove_partial(&expected).await;
            return Err(AppError::DownloadFailed(status));
        }

        let path = final_path.unwrap_or(expected);
        if !tokio::fs::try_exists(&path).await? {
            return Err(AppError::MissingOutput(path.display().to_string()));
        }
        Ok(path)
    }
}

async fn remove_partial(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        debug!(event = "partial_cleanup_skipped", path = %path.display(), error = %err);
    }
}

#[async_trait]
impl MediaFetcher for YtDlpClient {
    #[instrument(skip(self))]
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, AppError> {
        info!(event = "fetch_metadata_start", url = %url);
        let metadata = self
            .chain
            .run("fetch_metadata", |strategy| async move {
                self.metadata_once(&strategy, url).await
            })
            .await?;
        info!(event = "fetch_metadata_success", title = %metadata.title);
        Ok(metadata)
    }

    #[instrument(skip(self, on_progress))]
    async fn fetch_media(
        &self,
        url: &str,
        output_dir: &Path,
        stem: &str,
        container: &str,
        on_progress: &ProgressFn,
    ) -> Result<PathBuf, AppError> {
        info!(event = "fetch_media_start", url = %url, stem = %stem);
        tokio::fs::create_dir_all(output_dir).await?;
        let path = self
            .chain
            .run("fetch_media", |strategy| async move {
                self.media_once(&strategy, url, output_dir, stem, container, on_progress)
                    .await
            })
            .await?;
        info!(event = "fetch_media_complete", path = %path.display());
        Ok(path)
    }
}

/// Extracts the percentage from a `[download]  42.3% of ...` progress line.
pub fn parse_progress_line(line: &str) -> Option<u8> {
    let rest = line.trim_start().strip_prefix("[download]")?;
    let token = rest.split_whitespace().next()?;
    let value: f64 = token.strip_suffix('%')?.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0).floor() as u8)
}
