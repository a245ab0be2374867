use anyhow::Context;
use backer_execution::Store;
use backer_server::{Api, Config, Ledger, Metrics, Persister, Syncer};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    sync_interval_ms: Option<u64>,

    /// Keep the ledger in memory only
    #[arg(long)]
    no_persist: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path).context("failed to load config")?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(sync_interval_ms) = args.sync_interval_ms {
        config.sync_interval_ms = sync_interval_ms;
    }
    if args.no_persist {
        config.persist = false;
    }
    let config = config.validate().context("invalid config")?;

    // Create logger
    let subscriber = tracing_subscriber::fmt().with_max_level(config.log_level);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Restore ledger
    let store = Arc::new(Store::new());
    let persister = Persister::new(store.clone(), config.snapshot_path.clone());
    match persister.restore() {
        Ok(true) => {}
        Ok(false) => info!("starting with an empty ledger"),
        Err(err) => warn!(?err, "ignoring unreadable snapshot"),
    }
    let metrics = Arc::new(Metrics::new());
    metrics.set_pending(store.retry_queue().len());

    // Start background tasks
    let writer = persister.start();
    let syncer = Syncer::start(
        store.clone(),
        persister.clone(),
        metrics.clone(),
        config.sync_interval,
    );

    let ledger = Arc::new(Ledger::new(store, persister.clone(), metrics));
    let app = Api::new(ledger).router();

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("axum server error")?;

    syncer.stop().await;
    writer.abort();
    persister.flush().context("failed to write final snapshot")?;
    Ok(())
}
