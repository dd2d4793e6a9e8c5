mod callback;
mod config;
mod error;
mod ffmpeg;
mod handlers;
mod health;
mod jobs;
mod orchestrator;
mod sweeper;
mod texts;
mod transport;
mod url_cache;
mod util;
mod yt_dlp;

use crate::error::AppError;
use config::Config;
use ffmpeg::Ffmpeg;
use handlers::{build_handler, AppServices, Command};
use health::HealthState;
use orchestrator::{Orchestrator, OrchestratorSettings};
use std::{sync::Arc, time::Duration};
use teloxide::{net::default_reqwest_settings, prelude::*, utils::command::BotCommands};
use transport::TelegramTransport;
use tracing::{error, info, warn, instrument, Instrument};
use yt_dlp::{StrategyChain, YtDlpClient};
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    if let Err(err) = run().await {
        eprintln!("fatal error: {err}");
        error!(error = %err, "Application terminated with fatal error");
        return Err(err);
    }
    info!("Application shutdown complete");
    Ok(())
}

#[instrument]
async fn run() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Initializing ytgrab-telegram bot");
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    tokio::fs::create_dir_all(&config.download_dir).await?;
    info!(
        download_dir = %config.download_dir.display(),
        max_file_size = config.max_file_size,
        audio_format = %config.audio_format,
        "Configuration loaded"
    );

    if let Err(err) = Ffmpeg::check_available().await {
        warn!(error = %err, "ffmpeg is not available; audio requests will fail");
    }

    let client = default_reqwest_settings()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| {
            error!(error = %e, "Failed to build HTTP client");
            e
        })?;
    info!("HTTP client configured successfully");

    let bot = Bot::with_client(config.bot_token.clone(), client);
    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(error = %err, "Failed to register bot commands");
    }
    info!("Telegram bot initialized");

    let fetcher = Arc::new(YtDlpClient::new(
        StrategyChain::new(&config.player_clients),
        config.force_ipv4,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        fetcher,
        Arc::new(Ffmpeg),
        Arc::new(TelegramTransport::new(bot.clone())),
        OrchestratorSettings {
            download_dir: config.download_dir.clone(),
            max_file_size: config.max_file_size,
            audio_format: config.audio_format,
        },
    ));
    info!("Application services initialized");

    tokio::spawn(
        sweeper::run(
            config.download_dir.clone(),
            config.cleanup_interval,
            config.max_file_age,
        )
        .in_current_span(),
    );

    let health_state = HealthState::new(
        orchestrator.registry().clone(),
        orchestrator.urls().clone(),
    );
    let health_port = config.health_port;
    tokio::spawn(
        async move {
            if let Err(err) = health::serve(health_port, health_state).await {
                error!(error = %err, "Health server stopped");
            }
        }
        .in_current_span(),
    );

    let handler = build_handler();
    let services = AppServices::new(orchestrator);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![services])
        .build();
    info!("Dispatcher built successfully");

    let shutdown_token = dispatcher.shutdown_token();
    tokio::spawn(
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown");
            if let Ok(wait) = shutdown_token.shutdown() {
                wait.await;
                info!("Graceful shutdown completed");
            } else {
                warn!("Failed to initiate graceful shutdown");
            }
        }
        .in_current_span(),
    );

    info!("Starting dispatcher event loop");
    dispatcher.dispatch().await;
    info!("Dispatcher stopped");
    Ok(())
}

#[cfg(unix)]
#[instrument]
async fn shutdown_signal() {
    let term = signal(SignalKind::terminate());
    let interrupt = signal(SignalKind::interrupt());
    match (term, interrupt) {
        (Ok(mut term), Ok(mut interrupt)) => {
            tokio::select! {
                _ = term.recv() => info!("Received SIGTERM signal"),
                _ = interrupt.recv() => info!("Received SIGINT signal"),
            }
        }
        (Ok(mut term), Err(err)) => {
            warn!(error = %err, "Failed to register SIGINT handler, falling back to SIGTERM only");
            let _ = term.recv().await;
            info!("Received SIGTERM signal");
        }
        (Err(err), Ok(mut interrupt)) => {
            warn!(error = %err, "Failed to register SIGTERM handler, falling back to SIGINT only");
            let _ = interrupt.recv().await;
            info!("Received SIGINT signal");
        }
        (Err(term_err), Err(int_err)) => {
            error!(sigterm_error = %term_err, sigint_error = %int_err, "Failed to register signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C");
        }
    }
}

#[cfg(not(unix))]
#[instrument]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C signal");
}
