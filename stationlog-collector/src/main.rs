use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use stationlog_collector::{
    BackgroundSync, CollectionScheduler, Config, HttpIngestionClient, IngestionClient,
    MemoryRetryQueue, QueueConfig, RetryPolicy, RetryQueue, SchedulerSettings, SqliteRetryQueue,
    SyncMessage, status,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const STARTUP_SYNC_TAG: &str = "collect-readings";
const PERIODIC_SYNC_TAG: &str = "collect-readings-periodic";

#[derive(Parser)]
#[command(name = "stationlog-collector")]
#[command(about = "Scheduled power station collection")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "stationlog-collector.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tracing=info,stationlog_collector=info".to_owned());
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

    info!(
        server = %config.server.base_url,
        status_addr = %config.status.http_addr,
        "Starting stationlog-collector"
    );

    let client = Arc::new(HttpIngestionClient::new(
        &config.server.base_url,
        &config.server.session_token,
    )?);

    match &config.sync.queue {
        QueueConfig::Memory => {
            info!("Using in-memory retry queue");
            run_collector(client, MemoryRetryQueue::new(), config).await?;
        }
        QueueConfig::Sqlite { path } => {
            info!(path = ?path, "Using SQLite retry queue");
            let queue = SqliteRetryQueue::new(path.to_string_lossy()).await?;
            run_collector(client, queue, config).await?;
        }
    }

    Ok(())
}

async fn run_collector<C, Q>(client: Arc<C>, queue: Q, config: Config) -> color_eyre::Result<()>
where
    C: IngestionClient,
    Q: RetryQueue,
{
    let cancel = CancellationToken::new();

    let scheduler = CollectionScheduler::spawn(
        Arc::clone(&client),
        SchedulerSettings {
            min_interval: Duration::from_secs(config.scheduler.min_interval_secs),
            manual_min_spacing: Duration::from_secs(config.scheduler.manual_min_spacing_secs),
        },
        cancel.clone(),
    );
    if config.scheduler.autostart {
        scheduler
            .start(Duration::from_secs(config.scheduler.interval_secs))
            .await?;
    }

    let sync = BackgroundSync::new(
        queue,
        client,
        RetryPolicy {
            base_backoff: Duration::from_secs(config.sync.base_backoff_secs),
            max_backoff: Duration::from_secs(config.sync.max_backoff_secs),
            max_attempts: config.sync.max_attempts,
        },
    );
    sync.register_one_off(STARTUP_SYNC_TAG).await?;
    if let Some(every) = config.sync.periodic_interval_secs {
        sync.register_periodic(PERIODIC_SYNC_TAG, Duration::from_secs(every))
            .await?;
    }

    let events = sync.events();
    let mut completions = sync.subscribe();
    let listener_cancel = cancel.clone();
    let listener_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = listener_cancel.cancelled() => break,
                message = completions.recv() => match message {
                    Ok(SyncMessage::CollectionCompleted { tag, summary, .. }) => info!(
                        %tag,
                        imported = summary.imported,
                        skipped = summary.skipped,
                        "Deferred collection completed"
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        info!(missed = n, "Completion listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    let poll = Duration::from_secs(config.sync.poll_interval_secs);
    let sync_handle = tokio::spawn(sync.run(poll, cancel.clone()));

    let http_addr = config.status.http_addr;
    let app = status::router(scheduler, events);
    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "Status server listening");

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
    match sync_handle.await {
        Ok(Err(e)) => error!(error = %e, "Background sync did not start"),
        Err(e) => error!(error = ?e, "Background sync task failed"),
        Ok(Ok(())) => {}
    }
    let _ = listener_handle.await;

    info!("stationlog-collector shut down complete");
    Ok(())
}
