mod config;

use anyhow::Result;
use avhub_control_api::{spawn_projector_poll, AppState, ControlServer};
use avhub_device_christie::ChristieController;
use avhub_device_marantz::MarantzController;
use clap::Parser;
use config::HubConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "avhub")]
#[command(version, about = "Control hub for a Marantz receiver and a Christie projector")]
struct Args {
    /// Path to the TOML config file (default: ./avhub.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run both devices against built-in simulators
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,avhub=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = HubConfig::load(args.config.as_deref())?;
    if args.simulate {
        config.simulate_all();
    }
    tracing::debug!("Configuration: {:?}", config);

    let receiver = MarantzController::open(&config.receiver)?;
    tracing::info!("Receiver channel started on {}", config.receiver.port);

    let projector = ChristieController::open(&config.projector).await?;
    tracing::info!(
        "Projector channel ready for {}:{}",
        config.projector.address,
        config.projector.port
    );

    let state = AppState::new(receiver, projector);
    let poller = spawn_projector_poll(state.clone(), config.projector.poll_interval());

    let mut server = ControlServer::new(config.server.listen, state);
    let addr = server.start().await?;
    tracing::info!("AV hub ready on http://{}", addr);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    poller.abort();
    server.stop().await;

    Ok(())
}
