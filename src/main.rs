use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dinesa_concierge::{
    create_router, AppState, AudioDevicesFactory, ConciergeHandle, Config, GeminiLiveClient,
    VoiceSessionManager,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dinesa-concierge", version, about = "Voice concierge for the DineSA platform")]
struct Cli {
    /// Config file path (extension optional)
    #[arg(long, default_value = "config/concierge")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the toggle API over HTTP (default)
    Serve,
    /// Toggle the concierge from the terminal: Enter toggles, `q` quits
    Console,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("DineSA Concierge v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let session_config = cfg.session_config();
    if session_config.api_key.is_none() {
        warn!("No API key configured (GEMINI_API_KEY / API_KEY); sessions will fail to connect");
    }

    let devices = AudioDevicesFactory::create(
        cfg.audio.backend,
        cfg.audio.wav_input.clone(),
        cfg.audio.wav_output.clone(),
    )?;
    info!("Audio backend: {}", devices.name());

    let transport = Arc::new(GeminiLiveClient::new());
    let concierge = VoiceSessionManager::new(session_config, transport, devices).spawn();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&cfg, concierge).await,
        Command::Console => console(concierge).await,
    }
}

async fn serve(cfg: &Config, concierge: ConciergeHandle) -> Result<()> {
    let app = create_router(AppState::new(concierge.clone()));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    concierge.stop().await?;
    Ok(())
}

async fn console(concierge: ConciergeHandle) -> Result<()> {
    let mut status = concierge.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            println!("[{}] {}", snapshot.updated_at.format("%H:%M:%S"), snapshot.status);
        }
    });

    println!("Press Enter to toggle the concierge, `q` to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().eq_ignore_ascii_case("q") {
            break;
        }
        concierge.toggle().await?;
    }

    concierge.stop().await?;
    Ok(())
}
