use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use stationlog_core::UserId;
use stationlog_server::{
    AppState, api,
    backup::BackupScheduler,
    config::{Config, RegistryConfig},
    registry::{
        DeviceRegistry, ReadingRegistry, SessionRegistry,
        memory::{InMemoryDeviceRegistry, InMemoryReadingRegistry, InMemorySessionRegistry},
        sqlite::{self, SqliteDeviceRegistry, SqliteReadingRegistry, SqliteSessionRegistry},
    },
};
use stationlog_vendor::VendorClient;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "stationlog-server")]
#[command(about = "Power station telemetry server")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "stationlog-server.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tracing=info,stationlog_server=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    info!(http_addr = %config.server.http_addr, "Starting stationlog-server");

    match &config.registry {
        RegistryConfig::Memory => {
            info!("Using in-memory registries");
            run_server(
                InMemoryDeviceRegistry::new(),
                InMemoryReadingRegistry::new(),
                InMemorySessionRegistry::new(),
                config,
            )
            .await?;
        }
        RegistryConfig::Sqlite { path } => {
            info!(path = ?path, "Using SQLite registries");
            let pool = sqlite::connect(path.to_string_lossy()).await?;
            run_server(
                SqliteDeviceRegistry::from_pool(pool.clone()),
                SqliteReadingRegistry::from_pool(pool.clone()),
                SqliteSessionRegistry::from_pool(pool),
                config,
            )
            .await?;
        }
    }

    Ok(())
}

async fn run_server<D, R, S>(
    devices: D,
    readings: R,
    sessions: S,
    config: Config,
) -> color_eyre::Result<()>
where
    D: DeviceRegistry,
    R: ReadingRegistry,
    S: SessionRegistry,
{
    for seed in &config.sessions {
        sessions.insert(&seed.token, UserId(seed.user_id)).await?;
    }
    if !config.sessions.is_empty() {
        info!(count = config.sessions.len(), "Registered configured sessions");
    }

    let vendor = Arc::new(VendorClient::new(
        &config.vendor.base_url,
        &config.vendor.access_key,
        &config.vendor.secret_key,
    )?);

    let state = AppState::new(
        devices,
        readings,
        sessions,
        vendor,
        jiff::SignedDuration::from_secs(config.devices.online_window_secs as i64),
    );

    let cancel = CancellationToken::new();

    let backup_handle = if config.backup.enabled {
        let scheduler = BackupScheduler::new(
            state.ingestion.clone(),
            Duration::from_secs(config.backup.interval_secs),
        )?;
        Some(tokio::spawn(scheduler.run(cancel.clone())))
    } else {
        info!("Backup scheduler disabled");
        None
    };

    let http_addr = config.server.http_addr;
    let app = api::router().with_state(state);
    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();

    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    cancel.cancel();
    if let Some(handle) = backup_handle
        && let Err(e) = handle.await
    {
        error!(error = ?e, "Backup scheduler task failed");
    }

    info!("stationlog-server shut down complete");
    Ok(())
}
