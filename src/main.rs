use std::sync::Arc;

use clap::Parser;

use droidpilot::asr::AsrClient;
use droidpilot::config;
use droidpilot::device::adb::AdbChannel;
use droidpilot::device::channel::DeviceLease;
use droidpilot::errors::DroidPilotResult;
use droidpilot::llm::registry::ProviderRegistry;
use droidpilot::server::{self, AppState};

/// HTTP interface for the DroidPilot phone agent.
#[derive(Parser, Debug)]
#[command(name = "droidpilot", version)]
struct Args {
    /// Host to bind the HTTP server to
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the HTTP server to
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> DroidPilotResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let config = config::load_config()?;

    let host = args
        .host
        .or_else(|| std::env::var("HTTP_INTERFACE_HOST").ok())
        .unwrap_or_else(|| config.http.host.clone());
    let port = args
        .port
        .or_else(|| {
            std::env::var("HTTP_INTERFACE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
        })
        .unwrap_or(config.http.port);

    let registry = ProviderRegistry::from_config(&config.model);
    let channel = Arc::new(AdbChannel::new(&config.device));
    let asr = AsrClient::from_config(&config.asr);

    let state = Arc::new(AppState {
        registry,
        lease: DeviceLease::new(channel),
        asr,
        config,
    });

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    tracing::info!(host = %host, port, "HTTP server listening");
    tracing::info!("POST /task      — {{\"task\": \"...\"}}");
    tracing::info!("GET  /task/{{task}} — URL-encoded task text");
    tracing::info!("POST /asr       — {{\"audio_url\" | \"audio_base64\", \"audio_format\"}}");

    axum::serve(listener, server::router(state)).await?;
    Ok(())
}
