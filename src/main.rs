use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_voice::playback::{NullOutput, PlaybackOutput, SystemClock};
use loqa_voice::{
    create_router, AppState, AudioBackendFactory, AudioSource, Config, FileStore, KeyValueStore,
    NatsConnector, PlaybackScheduler, QuotaTracker, SessionController, SessionHandle, WavOutput,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "loqa-voice")]
#[command(about = "Real-time voice conversation with the Loqa agent")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/loqa-voice")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Hold one voice session from the configured audio source
    Talk {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Send one text turn and print the reply
    Text { message: String },
    /// Show today's remaining voice turns
    Quota,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Loqa Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&cfg.storage.path)?);

    match cli.command {
        Command::Quota => {
            let mut quota = QuotaTracker::load(store, cfg.quota.daily_limit)?;
            let state = quota.state();
            println!(
                "{} of {} voice turns left today ({} used on {})",
                quota.remaining(),
                quota.limit(),
                state.count,
                state.day
            );
            Ok(())
        }
        Command::Serve => serve(&cfg, store).await,
        Command::Talk { seconds } => talk(&cfg, store, seconds).await,
        Command::Text { message } => {
            // Text turns never open the audio input, so no device is needed
            let handle = build_session(&cfg, store, AudioSource::File(PathBuf::new())).await?;
            let reply = handle.send_text_turn(message).await?;
            println!("{}", reply.text);
            handle.shutdown().await?;
            Ok(())
        }
    }
}

async fn build_session(
    cfg: &Config,
    store: Arc<dyn KeyValueStore>,
    source: AudioSource,
) -> Result<SessionHandle> {
    let session_config = cfg.to_session_config();

    let connector = NatsConnector::connect(&cfg.agent.nats_url, cfg.agent.subject_prefix.clone())
        .await
        .context("Failed to connect to the agent transport")?;

    let backend = AudioBackendFactory::create(source, session_config.backend.clone())?;

    let output: Box<dyn PlaybackOutput> = match &cfg.audio.output_wav {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            Box::new(WavOutput::create(path, cfg.audio.output_sample_rate, 1)?)
        }
        None => Box::new(NullOutput),
    };
    let scheduler = PlaybackScheduler::new(Arc::new(SystemClock::new()), output);

    let controller =
        SessionController::new(session_config, Arc::new(connector), backend, store, scheduler)?;
    Ok(SessionHandle::spawn(controller))
}

async fn serve(cfg: &Config, store: Arc<dyn KeyValueStore>) -> Result<()> {
    let handle = build_session(cfg, store, cfg.audio_source()).await?;
    let app = create_router(AppState::new(handle.clone()));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    handle.shutdown().await?;
    Ok(())
}

async fn talk(cfg: &Config, store: Arc<dyn KeyValueStore>, seconds: Option<u64>) -> Result<()> {
    let handle = build_session(cfg, store, cfg.audio_source()).await?;
    let mut messages = handle.subscribe_history().await?;
    let mut status = handle.watch_status();

    let session_id = handle.start().await?;
    info!("Talking in session {} (Ctrl-C to stop)", session_id);

    let deadline = async {
        match seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Time limit reached");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            Some(message) = messages.recv() => {
                println!("[{:?}] {}", message.role, message.text);
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.session_id.is_none() {
                    if let Some(error) = current.last_error {
                        warn!("Session ended: {}", error);
                    }
                    break;
                }
            }
        }
    }

    handle.stop().await?;
    let status = handle.status();
    info!("{} voice turns left today", status.remaining_quota);
    handle.shutdown().await?;
    Ok(())
}
