//! SafeSpace API server binary.
//!
//! Usage:
//!   safespace --config config.toml
//!   safespace --port 8000 --bind 0.0.0.0
//!   safespace --warm-index
//!
//! # Environment Variables
//!
//! - `SAFESPACE_BIND_ADDR` - Server bind address (default: 127.0.0.1)
//! - `OPENAI_API_KEY` - Routing, synthesis, document QA and vision
//! - `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_FROM_NUMBER` - Emergency calls
//! - `EMERGENCY_CONTACT` - Number called when the emergency capability fires
//! - `RUST_LOG` - Log filter

use clap::Parser;
use safespace_api::{serve, AppState};
use safespace_coordinator::CoordinatorConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "safespace", version, about = "SafeSpace triage-and-dispatch API server")]
struct Cli {
    /// Path to config.toml file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Bind address
    #[arg(short, long, env = "SAFESPACE_BIND_ADDR", default_value = "127.0.0.1")]
    bind: String,

    /// Load or build the document index in the background at startup
    #[arg(long)]
    warm_index: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,safespace_api=debug,safespace_coordinator=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if cli.bind == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0 exposes the API to all network interfaces. \
             Put it behind a reverse proxy with authentication."
        );
    }

    let config = match &cli.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            CoordinatorConfig::from_file(path)?
        }
        None => {
            tracing::info!("Using default configuration");
            CoordinatorConfig::default()
        }
    };

    let state = Arc::new(AppState::from_config(&config)?);

    if cli.warm_index {
        let coordinator = state.coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.warm_up().await {
                tracing::warn!(error = %e, "Document index warm-up failed, will retry on first use");
            }
        });
    }

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    serve(state, addr).await
}
