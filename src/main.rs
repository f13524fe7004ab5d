use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use m3u_stream_merger::{
    config::Config, database::Database, ingestor::IngestionWorker, ledger::ConcurrencyLedger,
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "m3u-stream-merger")]
#[command(version)]
#[command(about = "Multi-source IPTV playlist merger and stream proxy")]
struct Cli {
    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides environment)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("m3u_stream_merger={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting M3U stream merger v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    info!(
        "Configured {} upstream playlist(s), database {}",
        config.upstreams.len(),
        config.database.url
    );

    let database = Database::new(&config.database).await?;
    database.migrate().await?;

    let ledger = ConcurrencyLedger::new(&config.ledger)?;
    match &config.ledger.redis_url {
        Some(url) => info!("Concurrency ledger backed by Redis at {url}"),
        None => info!("Concurrency ledger is process-local (single instance only)"),
    }

    let (shutdown_tx, _) = broadcast::channel(1);

    for source in config.upstreams.clone() {
        let worker = IngestionWorker::new(
            source,
            database.clone(),
            config.ingestion.fetch_timeout,
        )?;
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        });
    }

    let server = WebServer::new(config, database, ledger)?;
    info!("Server is running on {}", server.addr());
    info!("Playlist endpoint: /playlist.m3u");
    info!("Stream endpoint: /stream/{{channel_id}}.mp4");

    server.serve(shutdown_tx).await?;

    info!("Shutdown complete");
    Ok(())
}
