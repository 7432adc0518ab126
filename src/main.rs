use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use glucoread::AcquisitionConfig;
use glucoread::AcquisitionEngine;
use glucoread::BluestTransport;
use glucoread::CsvFileSink;
use glucoread::ReadingStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Sync readings from a BLE glucose meter and serve the latest one over HTTP
#[derive(Parser, Debug)]
#[command(name = "glucoread")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Server port
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// File the latest readings are kept in
    #[arg(long, default_value = "sugar_readings.csv")]
    csv: PathBuf,

    /// Number of readings to keep, most recent first
    #[arg(long, default_value_t = ReadingStore::DEFAULT_CAPACITY)]
    keep: usize,

    /// Advertised name substring used when the meter does not advertise the glucose service
    #[arg(long, default_value = glucoread::config::DEFAULT_NAME_HINT)]
    name_hint: String,

    /// Seconds to stay connected while the meter sends its records
    #[arg(long, default_value = "10")]
    dwell_secs: u64,

    /// Open the dashboard in the default browser once the server is listening
    #[arg(long)]
    open: bool,

    /// Logging verbosity level, overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    tracing::info!("glucoread v{}", env!("CARGO_PKG_VERSION"));

    let restored = match glucoread::persistence::load(&cli.csv).await {
        Ok(readings) => readings,
        Err(err) => {
            tracing::warn!(%err, path = %cli.csv.display(), "ignoring readings file");
            Vec::new()
        }
    };
    tracing::info!(count = restored.len(), "restored readings");

    let (sink, writer) = CsvFileSink::spawn(&cli.csv, cli.keep, restored.clone());
    let store = ReadingStore::new(cli.keep).with_sink(Arc::new(sink));
    store.restore(restored);
    let store = Arc::new(store);

    let config = AcquisitionConfig {
        name_hint: cli.name_hint,
        dwell: Duration::from_secs(cli.dwell_secs),
        ..Default::default()
    };

    let (stop, shutdown) = watch::channel(false);

    let transport = BluestTransport::new().await?;
    let engine = AcquisitionEngine::new(transport, store.clone(), config);
    let acquisition = tokio::spawn(engine.run(shutdown.clone()));

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let mut local = listener.local_addr()?;
    if local.ip().is_unspecified() {
        local.set_ip(std::net::Ipv4Addr::LOCALHOST.into());
    }
    let url = format!("http://{local}");
    let server = tokio::spawn(glucoread::http::serve(listener, store.clone(), shutdown));

    if cli.open {
        if let Err(err) = glucoread::browser::open(&url) {
            tracing::warn!("could not open the dashboard in a browser: {err:#}");
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    stop.send(true)?;

    acquisition.await?;
    server.await??;

    // Dropping the last store drops the sink, which lets the writer finish
    drop(store);
    writer.await?;

    Ok(())
}
